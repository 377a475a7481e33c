//! # presence-core
//!
//! Core logic for the beacon-presence tracking system.
//!
//! A vehicle-mounted Raspberry Pi scans for BLE beacons carried by children
//! and mirrors who is on board to Cloud Firestore. This crate provides:
//! - The beacon registry, loaded from the remote store
//! - Last-seen tracking and the timeout-based presence state machine
//! - Publishing of presence transitions to owner documents
//! - The scan cycle controller tying it all together
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`registry`] - Loading and validating watched beacons
//! - [`tracker`] - Last detection instant per beacon
//! - [`engine`] - Owned working set and the presence state machine
//! - [`publisher`] - Writing transitions to the remote store
//! - [`cycle`] - Scan, evaluate, publish, pause
//! - [`bluetooth`] - BLE scanning (BlueZ via `bluer`)
//! - [`store`] / [`firestore`] - Remote store seam and its Firestore REST client
//! - [`credentials`] - Bearer tokens: service-account minting, token file, env
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared domain types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod bluetooth;
pub mod config;
pub mod credentials;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod firestore;
pub mod publisher;
pub mod registry;
pub mod store;
pub mod tracker;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluerScanner;
pub use bluetooth::{BeaconScanner, ScanError, ScanResult};
pub use config::{
    default_config_path, Config, ConfigError, ConfigResult, FirestoreConfig, LoggingConfig,
    PresenceLabels, ScanConfig,
};
pub use credentials::{ServiceAccountKey, TokenSource};
pub use cycle::{CycleController, CycleOutcome, CycleReport, CycleSettings};
pub use engine::{Evaluation, PresenceEngine};
pub use error::{PresenceError, Result};
pub use firestore::FirestoreStore;
pub use publisher::{PublishOutcome, SyncPublisher};
pub use registry::Registry;
pub use store::{BeaconDocument, PresenceStore, StoreError, StoreResult};
pub use tracker::DetectionTracker;
pub use types::{BeaconAddress, BeaconRecord, PresenceState, Transition};
