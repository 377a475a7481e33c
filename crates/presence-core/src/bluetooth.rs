//! Bluetooth Low Energy scanning.
//!
//! This module provides:
//! - The [`BeaconScanner`] seam the cycle controller scans through
//! - [`BluerScanner`], a BlueZ implementation (feature `bluetooth`)
//! - A scripted [`MockScanner`] for tests
//!
//! A scan answers one question: which addresses advertised during the window.
//! Signal strength is deliberately discarded.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::BeaconAddress;

/// Failure kinds of a scan. Both are recoverable: the cycle is skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    /// No usable adapter: missing, powered off, or bluetoothd unreachable.
    #[error("Bluetooth adapter unavailable: {message}")]
    AdapterUnavailable {
        /// Underlying cause.
        message: String,
    },

    /// The adapter exists but discovery could not be started or was cut short.
    #[error("Bluetooth discovery failed: {message}")]
    DiscoveryFailed {
        /// Underlying cause.
        message: String,
    },
}

/// Result alias for scanner operations.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Something that can listen for beacon advertisements.
#[async_trait]
pub trait BeaconScanner: Send {
    /// Listen for `duration` and return every address heard in that window.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] if the radio cannot be used.
    async fn scan(&mut self, duration: Duration) -> ScanResult<HashSet<BeaconAddress>>;
}

#[cfg(feature = "bluetooth")]
pub use bluez::BluerScanner;

#[cfg(feature = "bluetooth")]
mod bluez {
    use std::collections::HashSet;
    use std::time::Duration;

    use async_trait::async_trait;
    use bluer::{
        Adapter, AdapterEvent, Address, DeviceEvent, DeviceProperty, DiscoveryFilter,
        DiscoveryTransport, Session,
    };
    use futures::stream::SelectAll;
    use futures::{pin_mut, StreamExt};
    use tracing::{debug, trace};

    use super::{BeaconScanner, ScanError, ScanResult};
    use crate::types::BeaconAddress;

    /// BlueZ-backed scanner.
    pub struct BluerScanner {
        // Keeps the D-Bus connection alive for the adapter handle.
        _session: Session,
        adapter: Adapter,
    }

    impl BluerScanner {
        /// Connect to bluetoothd and select an adapter.
        ///
        /// Uses the adapter named `adapter_name` (e.g. `hci0`) if given,
        /// otherwise the system default.
        ///
        /// # Errors
        ///
        /// Returns [`ScanError::AdapterUnavailable`] if bluetoothd is not
        /// reachable or the adapter does not exist.
        pub async fn new(adapter_name: Option<&str>) -> ScanResult<Self> {
            let session = Session::new().await.map_err(unavailable)?;
            let adapter = match adapter_name {
                Some(name) => session.adapter(name).map_err(unavailable)?,
                None => session.default_adapter().await.map_err(unavailable)?,
            };
            debug!(adapter = adapter.name(), "Bluetooth adapter selected");

            Ok(Self {
                _session: session,
                adapter,
            })
        }

        /// Name of the selected adapter.
        #[must_use]
        pub fn adapter_name(&self) -> &str {
            self.adapter.name()
        }

        async fn ensure_powered(&self) -> ScanResult<()> {
            let powered = self.adapter.is_powered().await.map_err(unavailable)?;
            if powered {
                Ok(())
            } else {
                Err(ScanError::AdapterUnavailable {
                    message: format!(
                        "adapter {} is powered off, run 'bluetoothctl power on'",
                        self.adapter.name()
                    ),
                })
            }
        }

        async fn is_advertising(&self, addr: Address) -> bool {
            // BlueZ replays cached devices on discovery start; only those with a
            // live RSSI were actually heard.
            match self.adapter.device(addr) {
                Ok(device) => matches!(device.rssi().await, Ok(Some(_))),
                Err(_) => false,
            }
        }
    }

    #[async_trait]
    impl BeaconScanner for BluerScanner {
        async fn scan(&mut self, duration: Duration) -> ScanResult<HashSet<BeaconAddress>> {
            self.ensure_powered().await?;

            let filter = DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..DiscoveryFilter::default()
            };
            self.adapter
                .set_discovery_filter(filter)
                .await
                .map_err(discovery_failed)?;

            let discover = self
                .adapter
                .discover_devices()
                .await
                .map_err(discovery_failed)?
                .fuse();
            pin_mut!(discover);

            let mut heard: HashSet<Address> = HashSet::new();
            let mut change_events = SelectAll::new();
            let window = tokio::time::sleep(duration);
            pin_mut!(window);

            loop {
                tokio::select! {
                    () = &mut window => break,
                    Some(event) = discover.next() => {
                        if let AdapterEvent::DeviceAdded(addr) = event {
                            if self.is_advertising(addr).await {
                                heard.insert(addr);
                            }
                            match self.adapter.device(addr) {
                                Ok(device) => match device.events().await {
                                    Ok(events) => {
                                        change_events.push(Box::pin(events.map(move |evt| (addr, evt))));
                                    }
                                    Err(e) => trace!(%addr, error = %e, "Cannot watch device"),
                                },
                                Err(e) => trace!(%addr, error = %e, "Device vanished"),
                            }
                        }
                    }
                    Some((addr, DeviceEvent::PropertyChanged(property))) = change_events.next() => {
                        if matches!(property, DeviceProperty::Rssi(_)) {
                            heard.insert(addr);
                        }
                    }
                }
            }

            let addresses = heard
                .into_iter()
                .filter_map(|addr| BeaconAddress::parse(&addr.to_string()).ok())
                .collect::<HashSet<_>>();
            debug!(count = addresses.len(), "Scan window closed");
            Ok(addresses)
        }
    }

    #[allow(clippy::needless_pass_by_value)]
    fn unavailable(err: bluer::Error) -> ScanError {
        ScanError::AdapterUnavailable {
            message: err.to_string(),
        }
    }

    #[allow(clippy::needless_pass_by_value)]
    fn discovery_failed(err: bluer::Error) -> ScanError {
        ScanError::DiscoveryFailed {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
pub use mock::MockScanner;
