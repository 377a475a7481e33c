//! Bearer tokens for the Firestore REST API.
//!
//! Three sources, picked from [`FirestoreConfig`] in this order:
//! - a service-account key: OAuth2 access tokens are minted with a signed JWT
//!   assertion, cached, and minted again shortly before they expire
//! - a token file, re-read before every request (for an external refresher)
//! - an environment variable, read once at start-up (emulator, short runs)

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{ConfigError, ConfigResult, FirestoreConfig};
use crate::store::{StoreError, StoreResult};

/// OAuth2 scope granting Firestore access.
pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Tokens are replaced this long before the server says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a Google service-account key file that token minting needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Account the token is issued to.
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    /// Key id, sent as the JWT `kid`.
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// OAuth2 token endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Read and parse a key file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCredentials`] if the file cannot be read
    /// or is not a service-account key.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let invalid = |message: String| ConfigError::InvalidCredentials {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))
    }
}

/// Where request tokens come from.
pub enum TokenSource {
    /// One token for the life of the process.
    Fixed(String),
    /// A file holding the current token.
    File(PathBuf),
    /// Tokens minted from a service-account key.
    ServiceAccount(ServiceAccount),
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(_) => f.write_str("Fixed(..)"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::ServiceAccount(account) => f
                .debug_tuple("ServiceAccount")
                .field(&account.client_email)
                .finish(),
        }
    }
}

impl TokenSource {
    /// Pick the source configured in `config`.
    ///
    /// Files are checked here so that bad credentials stop the daemon at
    /// start-up instead of failing every cycle.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCredentials`] for an unusable file and
    /// [`ConfigError::MissingCredentials`] if nothing is configured.
    pub fn from_config(config: &FirestoreConfig) -> ConfigResult<Self> {
        if let Some(path) = &config.credentials_file {
            let key = ServiceAccountKey::from_file(path)?;
            return ServiceAccount::new(key)
                .map(Self::ServiceAccount)
                .map_err(|message| ConfigError::InvalidCredentials {
                    path: path.clone(),
                    message,
                });
        }

        if let Some(path) = &config.access_token_file {
            read_token_file(path).map_err(|message| ConfigError::InvalidCredentials {
                path: path.clone(),
                message,
            })?;
            return Ok(Self::File(path.clone()));
        }

        match std::env::var(&config.access_token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::Fixed(token.trim().to_string())),
            _ => Err(ConfigError::MissingCredentials {
                variable: config.access_token_env.clone(),
            }),
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Fixed(_) => "static token",
            Self::File(_) => "token file",
            Self::ServiceAccount(_) => "service account",
        }
    }

    /// A token valid for the next request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PermissionDenied`] if no token can be produced,
    /// or the transport error of a failed token request.
    pub async fn access_token(&self, client: &reqwest::Client) -> StoreResult<String> {
        match self {
            Self::Fixed(token) => Ok(token.clone()),
            Self::File(path) => {
                read_token_file(path).map_err(|message| StoreError::PermissionDenied {
                    message: format!("access token file {}: {message}", path.display()),
                })
            }
            Self::ServiceAccount(account) => account.access_token(client).await,
        }
    }

    /// Drop any cached token so the next request fetches a new one.
    pub async fn invalidate(&self) {
        if let Self::ServiceAccount(account) = self {
            *account.cached.lock().await = None;
        }
    }
}

fn read_token_file(path: &Path) -> Result<String, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let token = content.trim();
    if token.is_empty() {
        return Err("file is empty".to_string());
    }
    Ok(token.to_string())
}

/// Service-account signer with a cached access token.
pub struct ServiceAccount {
    client_email: String,
    key_id: Option<String>,
    token_uri: String,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenGrant {
    access_token: String,
    expires_in: u64,
}

impl ServiceAccount {
    /// Parse the private key of `key`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the key is not RSA PEM.
    pub fn new(key: ServiceAccountKey) -> Result<Self, String> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| format!("private key: {e}"))?;
        info!(account = %key.client_email, "Using service-account credentials");
        Ok(Self {
            client_email: key.client_email,
            key_id: key.private_key_id,
            token_uri: key.token_uri,
            signing_key,
            cached: Mutex::new(None),
        })
    }

    async fn access_token(&self, client: &reqwest::Client) -> StoreResult<String> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref() {
            if Instant::now() < current.refresh_at {
                return Ok(current.token.clone());
            }
        }

        let fresh = self.mint(client).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn mint(&self, client: &reqwest::Client) -> StoreResult<CachedToken> {
        let issued_at = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.key_id);
        let assertion = jsonwebtoken::encode(&header, &claims, &self.signing_key).map_err(|e| {
            StoreError::PermissionDenied {
                message: format!("cannot sign token request: {e}"),
            }
        })?;

        let response = client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| StoreError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("token endpoint returned {status}: {body}");
            return Err(if status.is_server_error() {
                StoreError::Unavailable { message }
            } else {
                StoreError::PermissionDenied { message }
            });
        }

        let grant: TokenGrant = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse {
                message: e.to_string(),
            })?;
        debug!(expires_in = grant.expires_in, "Minted Firestore access token");

        let lifetime = Duration::from_secs(grant.expires_in).saturating_sub(EXPIRY_MARGIN);
        Ok(CachedToken {
            token: grant.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}
