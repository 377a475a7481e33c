//! Cycle controller: scan, detect, evaluate, publish, pause, repeat.
//!
//! Single task, no locks. One cycle always runs to completion (or is
//! abandoned on shutdown) before the next one starts.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bluetooth::{BeaconScanner, ScanError};
use crate::config::{Config, PresenceLabels};
use crate::engine::PresenceEngine;
use crate::publisher::{PublishOutcome, SyncPublisher};
use crate::registry;
use crate::store::PresenceStore;
use crate::types::{BeaconRecord, PresenceState, Transition};

/// Timing of the scan loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSettings {
    /// Length of each scan window.
    pub scan_duration: Duration,
    /// Pause after each cycle.
    pub pause: Duration,
    /// Presence timeout handed to the state machine.
    pub presence_timeout: Duration,
    /// Reload the registry this often even when it is populated.
    pub registry_refresh: Option<Duration>,
}

impl From<&Config> for CycleSettings {
    fn from(config: &Config) -> Self {
        Self {
            scan_duration: config.scan.duration(),
            pause: config.scan.pause(),
            presence_timeout: config.scan.presence_timeout(),
            registry_refresh: config.scan.registry_refresh(),
        }
    }
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Beacons in the registry.
    pub watched: usize,
    /// Registered beacons heard during the scan.
    pub detected: usize,
    /// State changes found.
    pub transitions: usize,
    /// Changes written to the store.
    pub published: usize,
    /// Changes whose owner document was missing.
    pub owner_missing: usize,
    /// Changes the store failed to write.
    pub failed: usize,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No beacons to watch, even after a reload. Nothing was scanned.
    Idle,
    /// The scan failed; no state was touched.
    ScanFailed(ScanError),
    /// Scan and evaluation ran.
    Completed(CycleReport),
}

/// Drives the presence engine with a scanner and a store.
pub struct CycleController<C, S> {
    engine: PresenceEngine,
    scanner: C,
    store: S,
    settings: CycleSettings,
    labels: PresenceLabels,
    timezone: Tz,
    last_reload: Instant,
}

impl<C, S> CycleController<C, S>
where
    C: BeaconScanner,
    S: PresenceStore,
{
    /// Controller over an already-loaded engine.
    pub fn new(
        engine: PresenceEngine,
        scanner: C,
        store: S,
        settings: CycleSettings,
        labels: PresenceLabels,
        timezone: Tz,
    ) -> Self {
        Self {
            engine,
            scanner,
            store,
            settings,
            labels,
            timezone,
            last_reload: Instant::now(),
        }
    }

    /// The engine being driven.
    pub const fn engine(&self) -> &PresenceEngine {
        &self.engine
    }

    /// Run one scan-evaluate-publish pass.
    ///
    /// Detections are stamped when the scan window closes, so a beacon heard
    /// early in the window counts as seen up to one scan duration later than
    /// it was. Harmless while the presence timeout exceeds the scan duration.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.refresh_registry().await;
        if self.engine.registry().is_empty() {
            info!("No beacons to watch; skipping scan");
            return CycleOutcome::Idle;
        }

        info!(
            watched = self.engine.registry().len(),
            local_time = %Utc::now().with_timezone(&self.timezone).format("%Y-%m-%d %H:%M:%S"),
            "Starting Bluetooth scan"
        );

        let heard = match self.scanner.scan(self.settings.scan_duration).await {
            Ok(heard) => heard,
            Err(e) => {
                error!(error = %e, "Bluetooth scan failed; skipping cycle");
                return CycleOutcome::ScanFailed(e);
            }
        };

        let now = Instant::now();
        let mut report = CycleReport {
            watched: self.engine.registry().len(),
            detected: self.engine.record_detections(&heard, now),
            ..CycleReport::default()
        };

        let transitions = self
            .engine
            .evaluate_all(now, self.settings.presence_timeout);
        report.transitions = transitions.len();

        let publisher = SyncPublisher::new(&self.store, &self.labels, self.timezone);
        for transition in &transitions {
            let Some(beacon) = self.engine.registry().get(&transition.address) else {
                continue;
            };
            match publisher.publish(beacon, transition, Utc::now()).await {
                PublishOutcome::Published => report.published += 1,
                PublishOutcome::OwnerNotFound => report.owner_missing += 1,
                PublishOutcome::Failed(_) => report.failed += 1,
            }
        }

        info!(
            heard = heard.len(),
            detected = report.detected,
            transitions = report.transitions,
            published = report.published,
            "Scan cycle completed"
        );
        CycleOutcome::Completed(report)
    }

    /// Run cycles until `shutdown` resolves, pausing between them.
    ///
    /// A cycle or pause in progress when `shutdown` fires is abandoned.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let span = info_span!("cycle", cycle_id = %Uuid::now_v7());
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested; abandoning current cycle");
                    return;
                }
                outcome = self.run_cycle().instrument(span) => {
                    debug!(?outcome, "Cycle finished");
                }
            }

            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    return;
                }
                () = tokio::time::sleep(self.settings.pause) => {}
            }
        }
    }

    async fn refresh_registry(&mut self) {
        let due = self
            .settings
            .registry_refresh
            .is_some_and(|every| self.last_reload.elapsed() >= every);

        if self.engine.registry().is_empty() {
            info!("No beacons loaded; reloading from remote store");
        } else if due {
            debug!("Periodic registry refresh");
        } else {
            return;
        }

        let registry = registry::load(&self.store).await;
        if registry.is_empty() && !self.engine.registry().is_empty() {
            // A failed or empty refresh must not stop monitoring known beacons.
            warn!("Registry refresh returned no beacons; keeping current registry");
        } else {
            let released: Vec<BeaconRecord> = self.engine.present_beacons().cloned().collect();
            self.engine.replace_registry(registry);
            self.release(&released).await;
        }
        self.last_reload = Instant::now();
    }

    /// Write `Absent` for beacons whose presence was discarded by a registry
    /// swap. Without it their owners would stay present remotely until the
    /// beacon is heard and lost again.
    async fn release(&self, beacons: &[BeaconRecord]) {
        if beacons.is_empty() {
            return;
        }
        info!(
            count = beacons.len(),
            "Registry replaced; marking previously present beacons absent"
        );

        let publisher = SyncPublisher::new(&self.store, &self.labels, self.timezone);
        for beacon in beacons {
            let transition = Transition {
                address: beacon.address.clone(),
                from: PresenceState::Present,
                to: PresenceState::Absent,
            };
            publisher.publish(beacon, &transition, Utc::now()).await;
        }
    }
}
