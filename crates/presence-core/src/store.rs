//! Remote directory collaborator.
//!
//! The engine reads beacon assignments from, and writes owner presence to, a
//! remote document store. [`PresenceStore`] is the seam; [`crate::firestore`]
//! holds the production implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A beacon document as returned by the store, before validation.
///
/// Every field except `id` is optional here; the registry decides what is
/// admissible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconDocument {
    /// Document identifier in the beacon collection.
    pub id: String,
    /// Raw hardware address as stored.
    pub address: Option<String>,
    /// Human-readable beacon name.
    pub display_name: Option<String>,
    /// Reference to the owner document.
    pub owner_id: Option<String>,
}

/// Failure kinds of a store call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed document does not exist.
    #[error("Document not found: {document}")]
    NotFound {
        /// Path or id of the missing document.
        document: String,
    },

    /// Credentials were rejected or lack the required role.
    #[error("Permission denied by remote store: {message}")]
    PermissionDenied {
        /// Message reported by the store.
        message: String,
    },

    /// Quota exhaustion or a server-side outage.
    #[error("Remote store unavailable: {message}")]
    Unavailable {
        /// Message reported by the store.
        message: String,
    },

    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("Request to remote store failed: {message}")]
    Request {
        /// Transport error description.
        message: String,
    },

    /// The store answered with something we could not decode.
    #[error("Unexpected response from remote store: {message}")]
    InvalidResponse {
        /// Decode error description.
        message: String,
    },
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Remote document store holding beacon assignments and owner records.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Fetch every beacon document currently marked as assigned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query cannot be executed.
    async fn query_assigned_beacons(&self) -> StoreResult<Vec<BeaconDocument>>;

    /// Set the presence field of `owner_id` to `presence` and stamp its
    /// last-activity field with the server's clock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the owner document does not exist,
    /// or another [`StoreError`] if the write fails.
    async fn update_owner_presence(&self, owner_id: &str, presence: &str) -> StoreResult<()>;
}

#[async_trait]
impl<T> PresenceStore for Arc<T>
where
    T: PresenceStore + ?Sized,
{
    async fn query_assigned_beacons(&self) -> StoreResult<Vec<BeaconDocument>> {
        (**self).query_assigned_beacons().await
    }

    async fn update_owner_presence(&self, owner_id: &str, presence: &str) -> StoreResult<()> {
        (**self).update_owner_presence(owner_id, presence).await
    }
}

#[cfg(test)]
pub use memory::MemoryStore;

#[cfg(test)]
mod memory {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{BeaconDocument, PresenceStore, StoreError, StoreResult};

    /// In-memory store recording every presence update.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        beacons: Mutex<Vec<BeaconDocument>>,
        query_error: Mutex<Option<StoreError>>,
        missing_owners: HashSet<String>,
        failing_owners: HashSet<String>,
        updates: Mutex<Vec<(String, String)>>,
        queries: Mutex<usize>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_beacon(self, id: &str, address: &str, name: &str, owner: &str) -> Self {
            self.beacons.lock().unwrap().push(BeaconDocument {
                id: id.to_string(),
                address: Some(address.to_string()),
                display_name: Some(name.to_string()),
                owner_id: Some(owner.to_string()),
            });
            self
        }

        pub fn with_document(self, doc: BeaconDocument) -> Self {
            self.beacons.lock().unwrap().push(doc);
            self
        }

        pub fn with_missing_owner(mut self, owner: &str) -> Self {
            self.missing_owners.insert(owner.to_string());
            self
        }

        pub fn with_failing_owner(mut self, owner: &str) -> Self {
            self.failing_owners.insert(owner.to_string());
            self
        }

        pub fn fail_queries(&self, err: StoreError) {
            *self.query_error.lock().unwrap() = Some(err);
        }

        pub fn heal_queries(&self) {
            *self.query_error.lock().unwrap() = None;
        }

        pub fn set_beacons(&self, docs: Vec<BeaconDocument>) {
            *self.beacons.lock().unwrap() = docs;
        }

        /// Every `(owner_id, presence)` write attempted, in order.
        pub fn updates(&self) -> Vec<(String, String)> {
            self.updates.lock().unwrap().clone()
        }

        pub fn query_count(&self) -> usize {
            *self.queries.lock().unwrap()
        }
    }

    #[async_trait]
    impl PresenceStore for MemoryStore {
        async fn query_assigned_beacons(&self) -> StoreResult<Vec<BeaconDocument>> {
            *self.queries.lock().unwrap() += 1;
            if let Some(err) = self.query_error.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(self.beacons.lock().unwrap().clone())
        }

        async fn update_owner_presence(&self, owner_id: &str, presence: &str) -> StoreResult<()> {
            self.updates
                .lock()
                .unwrap()
                .push((owner_id.to_string(), presence.to_string()));
            if self.missing_owners.contains(owner_id) {
                return Err(StoreError::NotFound {
                    document: owner_id.to_string(),
                });
            }
            if self.failing_owners.contains(owner_id) {
                return Err(StoreError::Unavailable {
                    message: "quota exceeded".into(),
                });
            }
            Ok(())
        }
    }
}
