//! Cloud Firestore implementation of [`PresenceStore`].
//!
//! Talks to the Firestore v1 REST API:
//! - `documents:runQuery` to list assigned beacons
//! - `documents:commit` to update an owner's presence, with the activity
//!   timestamp set by the server and an `exists` precondition so a missing
//!   owner is reported instead of created
//!
//! Every request asks [`TokenSource`] for a bearer token, so minted or
//! externally refreshed tokens are picked up without a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::config::FirestoreConfig;
use crate::credentials::TokenSource;
use crate::store::{BeaconDocument, PresenceStore, StoreError, StoreResult};

/// Field names used in the beacon and owner collections.
mod fields {
    pub const ASSIGNED: &str = "isAssegnato";
    pub const ADDRESS: &str = "indirizzoMac";
    pub const DISPLAY_NAME: &str = "nomeBeacon";
    pub const OWNER: &str = "assignedChildId";
    pub const PRESENCE: &str = "statoPresenza";
    pub const LAST_ACTIVITY: &str = "ultimaAttivita";
}

/// Firestore REST client.
#[derive(Debug)]
pub struct FirestoreStore {
    client: reqwest::Client,
    api_root: String,
    database_path: String,
    beacon_collection: String,
    owner_collection: String,
    credentials: TokenSource,
}

impl FirestoreStore {
    /// Build a client for the database described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &FirestoreConfig, credentials: TokenSource) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("beacon-presence/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Request {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_root: config.base_url.as_str().trim_end_matches('/').to_string(),
            database_path: format!(
                "projects/{}/databases/{}",
                config.project_id, config.database
            ),
            beacon_collection: config.beacon_collection.clone(),
            owner_collection: config.owner_collection.clone(),
            credentials,
        })
    }

    fn documents_url(&self, method: &str) -> String {
        format!("{}/{}/documents:{method}", self.api_root, self.database_path)
    }

    fn owner_document_name(&self, owner_id: &str) -> String {
        format!(
            "{}/documents/{}/{owner_id}",
            self.database_path, self.owner_collection
        )
    }

    async fn post(&self, url: &str, body: &Value, document: &str) -> StoreResult<Value> {
        let token = self.credentials.access_token(&self.client).await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| StoreError::InvalidResponse {
                    message: e.to_string(),
                });
        }

        if status == StatusCode::UNAUTHORIZED {
            // Revoked or expired early; mint a new one next time.
            self.credentials.invalidate().await;
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &body, document))
    }
}

#[async_trait]
impl PresenceStore for FirestoreStore {
    #[instrument(skip(self), fields(collection = %self.beacon_collection))]
    async fn query_assigned_beacons(&self) -> StoreResult<Vec<BeaconDocument>> {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": self.beacon_collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": fields::ASSIGNED },
                        "op": "EQUAL",
                        "value": { "booleanValue": true }
                    }
                }
            }
        });

        let value = self
            .post(&self.documents_url("runQuery"), &body, &self.beacon_collection)
            .await?;
        let rows: Vec<QueryRow> =
            serde_json::from_value(value).map_err(|e| StoreError::InvalidResponse {
                message: e.to_string(),
            })?;

        let docs: Vec<BeaconDocument> = rows
            .into_iter()
            .filter_map(|row| row.document)
            .map(Document::into_beacon)
            .collect();
        debug!(count = docs.len(), "Beacon query returned");
        Ok(docs)
    }

    #[instrument(skip(self))]
    async fn update_owner_presence(&self, owner_id: &str, presence: &str) -> StoreResult<()> {
        let name = self.owner_document_name(owner_id);
        let body = json!({
            "writes": [{
                "update": {
                    "name": name,
                    "fields": {
                        fields::PRESENCE: { "stringValue": presence }
                    }
                },
                "updateMask": { "fieldPaths": [fields::PRESENCE] },
                "updateTransforms": [{
                    "fieldPath": fields::LAST_ACTIVITY,
                    "setToServerValue": "REQUEST_TIME"
                }],
                "currentDocument": { "exists": true }
            }]
        });

        self.post(&self.documents_url("commit"), &body, &name)
            .await
            .map(|_| ())
    }
}

/// One element of a `runQuery` response stream.
#[derive(Debug, Deserialize)]
struct QueryRow {
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: HashMap<String, Value>,
}

impl Document {
    fn into_beacon(self) -> BeaconDocument {
        let id = self
            .name
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        BeaconDocument {
            id,
            address: string_field(&self.fields, fields::ADDRESS),
            display_name: string_field(&self.fields, fields::DISPLAY_NAME),
            owner_id: string_field(&self.fields, fields::OWNER),
        }
    }
}

/// Read a typed Firestore value as text.
///
/// Reference values yield the referenced document id.
fn string_field(fields: &HashMap<String, Value>, key: &str) -> Option<String> {
    let value = fields.get(key)?;
    if let Some(s) = value.get("stringValue").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    value
        .get("referenceValue")
        .and_then(Value::as_str)
        .and_then(|r| r.rsplit('/').next())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Map an unsuccessful HTTP response to a [`StoreError`].
fn classify(status: StatusCode, body: &str, document: &str) -> StoreError {
    let message = serde_json::from_str::<ErrorBody>(body).map_or_else(
        |_| format!("HTTP {status}"),
        |b| {
            if b.error.status.is_empty() {
                b.error.message
            } else {
                format!("{}: {}", b.error.status, b.error.message)
            }
        },
    );

    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound {
            document: document.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied { message },
        StatusCode::TOO_MANY_REQUESTS => StoreError::Unavailable { message },
        s if s.is_server_error() => StoreError::Unavailable { message },
        _ => StoreError::Request { message },
    }
}
