//! Sync publisher: mirrors presence transitions to owner documents.
//!
//! One write per transition, no retries, no rollback. The in-memory state
//! stays authoritative even when the write fails; the next transition of the
//! same beacon writes again.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::config::PresenceLabels;
use crate::store::{PresenceStore, StoreError};
use crate::types::{BeaconRecord, PresenceState, Transition};

/// Wall-clock format used in transition logs.
const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What happened to a single publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The owner document was updated.
    Published,
    /// The owner document does not exist.
    OwnerNotFound,
    /// The store rejected or never received the write.
    Failed(StoreError),
}

/// Writes presence transitions to the remote store.
pub struct SyncPublisher<'a, S: ?Sized> {
    store: &'a S,
    labels: &'a PresenceLabels,
    timezone: Tz,
}

impl<'a, S> SyncPublisher<'a, S>
where
    S: PresenceStore + ?Sized,
{
    /// Publisher writing through `store`, using `labels` as stored values and
    /// `timezone` for log timestamps.
    pub const fn new(store: &'a S, labels: &'a PresenceLabels, timezone: Tz) -> Self {
        Self {
            store,
            labels,
            timezone,
        }
    }

    /// Stored text for `state`.
    #[must_use]
    pub fn label(&self, state: PresenceState) -> &str {
        match state {
            PresenceState::Present => &self.labels.present,
            PresenceState::Absent => &self.labels.absent,
        }
    }

    /// Write `transition.to` to the owner of `beacon`.
    ///
    /// `at` is the local instant of the transition, used for logging only;
    /// the stored activity timestamp is assigned by the server.
    pub async fn publish(
        &self,
        beacon: &BeaconRecord,
        transition: &Transition,
        at: DateTime<Utc>,
    ) -> PublishOutcome {
        let presence = self.label(transition.to);

        match self.store.update_owner_presence(&beacon.owner_id, presence).await {
            Ok(()) => {
                info!(
                    beacon = %beacon.display_name,
                    address = %beacon.address,
                    owner_id = %beacon.owner_id,
                    from = self.label(transition.from),
                    to = presence,
                    local_time = %at.with_timezone(&self.timezone).format(LOCAL_TIME_FORMAT),
                    "Presence change written"
                );
                PublishOutcome::Published
            }
            Err(StoreError::NotFound { .. }) => {
                warn!(
                    beacon = %beacon.display_name,
                    address = %beacon.address,
                    owner_id = %beacon.owner_id,
                    "Owner document not found; presence change not written"
                );
                PublishOutcome::OwnerNotFound
            }
            Err(e) => {
                error!(
                    beacon = %beacon.display_name,
                    address = %beacon.address,
                    owner_id = %beacon.owner_id,
                    error = %e,
                    "Failed to write presence change"
                );
                PublishOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn beacon(owner: &str) -> BeaconRecord {
        BeaconRecord {
            address: "AA:BB:CC:DD:EE:01".parse().unwrap(),
            registry_id: "b1".into(),
            display_name: "Beacon1".into(),
            owner_id: owner.into(),
        }
    }

    fn arrival() -> Transition {
        Transition {
            address: "AA:BB:CC:DD:EE:01".parse().unwrap(),
            from: PresenceState::Absent,
            to: PresenceState::Present,
        }
    }

    #[tokio::test]
    async fn test_publish_writes_label() {
        let store = MemoryStore::new();
        let labels = PresenceLabels::default();
        let publisher = SyncPublisher::new(&store, &labels, chrono_tz::Europe::Rome);

        let outcome = publisher.publish(&beacon("child-1"), &arrival(), Utc::now()).await;

        assert_eq!(outcome, PublishOutcome::Published);
        assert_eq!(store.updates(), vec![("child-1".into(), "A bordo".into())]);
    }

    #[tokio::test]
    async fn test_publish_departure_uses_absent_label() {
        let store = MemoryStore::new();
        let labels = PresenceLabels {
            present: "on_board".into(),
            absent: "off_board".into(),
        };
        let publisher = SyncPublisher::new(&store, &labels, chrono_tz::UTC);
        let departure = Transition {
            from: PresenceState::Present,
            to: PresenceState::Absent,
            ..arrival()
        };

        publisher.publish(&beacon("child-1"), &departure, Utc::now()).await;
        assert_eq!(store.updates(), vec![("child-1".into(), "off_board".into())]);
    }

    #[tokio::test]
    async fn test_publish_classifies_failures() {
        let store = MemoryStore::new()
            .with_missing_owner("ghost")
            .with_failing_owner("flaky");
        let labels = PresenceLabels::default();
        let publisher = SyncPublisher::new(&store, &labels, chrono_tz::UTC);

        let missing = publisher.publish(&beacon("ghost"), &arrival(), Utc::now()).await;
        assert_eq!(missing, PublishOutcome::OwnerNotFound);

        let failed = publisher.publish(&beacon("flaky"), &arrival(), Utc::now()).await;
        assert!(matches!(
            failed,
            PublishOutcome::Failed(StoreError::Unavailable { .. })
        ));

        // One attempt each, no retries.
        assert_eq!(store.updates().len(), 2);
    }
}
