//! Start-up wiring: credentials, remote store, initial registry, adapter.
//!
//! Every failure here is fatal. Once [`start`] returns the controller, errors
//! are handled cycle by cycle and never stop the daemon.

use std::path::PathBuf;

use presence_core::registry::{self, Registry};
use presence_core::{
    default_config_path, BluerScanner, Config, CycleController, CycleSettings, FirestoreConfig,
    FirestoreStore, PresenceEngine, Result, TokenSource,
};
use tracing::info;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "PRESENCE_CONFIG";

/// The controller the daemon runs.
pub type Controller = CycleController<BluerScanner, FirestoreStore>;

/// Configuration file to load: `PRESENCE_CONFIG` if set, otherwise the
/// platform default.
///
/// # Errors
///
/// Returns an error if no override is set and the platform has no
/// configuration directory.
pub fn config_path() -> Result<PathBuf> {
    match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(default_config_path()?),
    }
}

/// Authenticated Firestore client.
///
/// # Errors
///
/// Returns [`presence_core::PresenceError::MissingCredentials`] if no usable
/// credentials are configured.
pub fn connect_store(config: &FirestoreConfig) -> Result<FirestoreStore> {
    let credentials = TokenSource::from_config(config)?;
    let kind = credentials.kind();
    let store = FirestoreStore::new(config, credentials)?;
    info!(
        project = %config.project_id,
        database = %config.database,
        credentials = kind,
        "Remote store client ready"
    );
    Ok(store)
}

/// First registry load. Unlike later reloads, a failure here is an error.
///
/// # Errors
///
/// Returns the store error converted into a [`presence_core::PresenceError`].
pub async fn initial_registry(store: &FirestoreStore) -> Result<Registry> {
    Ok(registry::try_load(store).await?)
}

/// Build everything the scan loop needs.
///
/// # Errors
///
/// Fails on missing credentials, an unreachable or refusing store, or a
/// missing Bluetooth adapter.
pub async fn start(config: &Config) -> Result<Controller> {
    let store = connect_store(&config.firestore)?;
    let registry = initial_registry(&store).await?;

    let scanner = BluerScanner::new(config.scan.adapter.as_deref()).await?;
    info!(adapter = scanner.adapter_name(), "Bluetooth adapter ready");

    Ok(CycleController::new(
        PresenceEngine::new(registry),
        scanner,
        store,
        CycleSettings::from(config),
        config.labels.clone(),
        config.timezone,
    ))
}
