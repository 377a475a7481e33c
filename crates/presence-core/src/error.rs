//! Unified error types for the presence core library.
//!
//! This module provides a unified error type [`PresenceError`] that covers all
//! failure modes across the system. Each module also has its own specific
//! error type ([`ConfigError`], [`ScanError`], [`StoreError`]) for internal use.
//!
//! `PresenceError` only crosses the start-up path, where every error is
//! fatal. Once the scan loop runs, scan and store errors stay in their module
//! types and are logged by the cycle:
//!
//! - **Registry load**: the registry is retried later.
//! - **Scan**: the cycle is skipped.
//! - **Publish**: the write is dropped.
//!
//! # Example
//!
//! ```rust
//! use presence_core::error::{PresenceError, Result};
//!
//! fn require_project(project_id: &str) -> Result<()> {
//!     if project_id.is_empty() {
//!         return Err(PresenceError::ConfigValidationError("firestore.project_id is required".into()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::bluetooth::ScanError;
use crate::config::ConfigError;
use crate::store::StoreError;

/// The unified error type for all presence operations.
#[derive(Debug, Error)]
pub enum PresenceError {
    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    ConfigLoadError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// No credentials for the remote store.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable: {0}. Ensure bluetoothd is running and the adapter is powered on.")]
    BluetoothUnavailable(String),

    /// Discovery could not be run.
    #[error("Bluetooth scan failed: {0}")]
    BluetoothScanFailed(String),

    // =========================================================================
    // REMOTE STORE ERRORS
    // =========================================================================
    /// A document addressed by the engine does not exist.
    #[error("Remote document not found: {0}")]
    DocumentNotFound(String),

    /// The remote store rejected our credentials.
    #[error("Remote store denied access: {0}. Check the service account roles.")]
    StorePermissionDenied(String),

    /// The remote store is unreachable or failing.
    #[error("Remote store unavailable: {0}")]
    StoreUnavailable(String),
}

/// A specialized [`Result`] type for presence operations.
pub type Result<T> = std::result::Result<T, PresenceError>;

impl PresenceError {
    /// Returns a machine-readable error code for logs.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigLoadError(_) => "CONFIG_LOAD_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::MissingCredentials(_) => "MISSING_CREDENTIALS",
            Self::BluetoothUnavailable(_) => "BLUETOOTH_UNAVAILABLE",
            Self::BluetoothScanFailed(_) => "BLUETOOTH_SCAN_FAILED",
            Self::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            Self::StorePermissionDenied(_) => "STORE_PERMISSION_DENIED",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<ConfigError> for PresenceError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Load(e) => Self::ConfigLoadError(e.to_string()),
            ConfigError::NoConfigDir => {
                Self::ConfigLoadError("cannot determine configuration directory".into())
            }
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
            ConfigError::MissingCredentials { variable } => {
                Self::MissingCredentials(format!("environment variable {variable} is not set"))
            }
            ConfigError::InvalidCredentials { path, message } => {
                Self::MissingCredentials(format!("{}: {message}", path.display()))
            }
        }
    }
}

impl From<ScanError> for PresenceError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::AdapterUnavailable { message } => Self::BluetoothUnavailable(message),
            ScanError::DiscoveryFailed { message } => Self::BluetoothScanFailed(message),
        }
    }
}

impl From<StoreError> for PresenceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { document } => Self::DocumentNotFound(document),
            StoreError::PermissionDenied { message } => Self::StorePermissionDenied(message),
            StoreError::Unavailable { message }
            | StoreError::Request { message }
            | StoreError::InvalidResponse { message } => Self::StoreUnavailable(message),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            PresenceError::MissingCredentials("x".into()).error_code(),
            "MISSING_CREDENTIALS"
        );
        assert_eq!(
            PresenceError::BluetoothUnavailable("x".into()).error_code(),
            "BLUETOOTH_UNAVAILABLE"
        );
        assert_eq!(
            PresenceError::StorePermissionDenied("403".into()).error_code(),
            "STORE_PERMISSION_DENIED"
        );
    }

    #[test]
    fn test_from_invalid_credentials() {
        let err: PresenceError = ConfigError::InvalidCredentials {
            path: "/etc/beacon-presence/key.json".into(),
            message: "expected value at line 1 column 1".into(),
        }
        .into();
        assert_eq!(err.error_code(), "MISSING_CREDENTIALS");
        assert!(err.to_string().contains("/etc/beacon-presence/key.json"));
    }

    #[test]
    fn test_from_config_error() {
        let err: PresenceError = ConfigError::MultipleValidationErrors(vec![
            ConfigError::ValidationError {
                field: "scan.pause_secs".into(),
                message: "must be greater than zero".into(),
            },
            ConfigError::ValidationError {
                field: "firestore.project_id".into(),
                message: "is required".into(),
            },
        ])
        .into();

        assert_eq!(err.error_code(), "CONFIG_VALIDATION_ERROR");
        let text = err.to_string();
        assert!(text.contains("scan.pause_secs"));
        assert!(text.contains("firestore.project_id"));
    }

    #[test]
    fn test_from_store_and_scan_errors() {
        let err: PresenceError = StoreError::NotFound {
            document: "figli/ghost".into(),
        }
        .into();
        assert!(matches!(err, PresenceError::DocumentNotFound(ref d) if d == "figli/ghost"));

        let err: PresenceError = StoreError::Request {
            message: "connection refused".into(),
        }
        .into();
        assert_eq!(err.error_code(), "STORE_UNAVAILABLE");

        let err: PresenceError = ScanError::AdapterUnavailable {
            message: "hci0 powered off".into(),
        }
        .into();
        assert!(err.to_string().contains("powered on"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PresenceError>();
        assert_sync::<PresenceError>();
    }
}
