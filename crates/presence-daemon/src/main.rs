//! # presence-daemon
//!
//! Watches assigned BLE beacons on board a vehicle and mirrors each owner's
//! presence to Cloud Firestore.
//!
//! ## Running
//!
//! ```bash
//! # Development
//! PRESENCE_FIRESTORE_TOKEN=$(gcloud auth print-access-token) \
//!   PRESENCE__FIRESTORE__PROJECT_ID=my-project \
//!   cargo run --package presence-daemon
//!
//! # Production (on Raspberry Pi)
//! PRESENCE_CONFIG=/etc/beacon-presence/config.toml ./presence-daemon
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use presence_core::Config;
use presence_daemon::{logging, shutdown, startup};
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let path = startup::config_path()?;
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    logging::init(&config.logging)?;

    info!(
        config = %path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting presence-daemon"
    );
    for advisory in config.advisories() {
        warn!("{advisory}");
    }

    let mut controller = match startup::start(&config).await {
        Ok(controller) => controller,
        Err(e) => {
            error!(code = e.error_code(), error = %e, "Start-up failed");
            return Err(e.into());
        }
    };

    info!(
        beacons = controller.engine().registry().len(),
        "Monitoring started"
    );
    controller.run_until(shutdown::signal()).await;
    info!("Monitoring stopped");

    Ok(())
}
