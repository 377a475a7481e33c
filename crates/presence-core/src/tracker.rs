//! Detection tracker: last-seen instant per registered beacon.

use std::collections::BTreeMap;

use tokio::time::Instant;

use crate::registry::Registry;
use crate::types::BeaconAddress;

/// Most recent detection of every registered beacon.
///
/// `None` is the "never seen" sentinel and compares earlier than any real
/// instant. Only addresses from the registry the tracker was built for are
/// tracked.
#[derive(Debug, Clone, Default)]
pub struct DetectionTracker {
    last_seen: BTreeMap<BeaconAddress, Option<Instant>>,
}

impl DetectionTracker {
    /// One never-seen entry per registered beacon.
    #[must_use]
    pub fn for_registry(registry: &Registry) -> Self {
        Self {
            last_seen: registry.addresses().map(|a| (a.clone(), None)).collect(),
        }
    }

    /// Mark every known address in `addresses` as seen at `now`.
    ///
    /// Unknown addresses are ignored. Returns how many tracked beacons matched.
    pub fn record_detections<'a, I>(&mut self, addresses: I, now: Instant) -> usize
    where
        I: IntoIterator<Item = &'a BeaconAddress>,
    {
        let mut matched = 0;
        for address in addresses {
            if let Some(entry) = self.last_seen.get_mut(address) {
                *entry = Some(now);
                matched += 1;
            }
        }
        matched
    }

    /// Last detection of `address`, or `None` if never seen or not tracked.
    #[must_use]
    pub fn last_seen(&self, address: &BeaconAddress) -> Option<Instant> {
        self.last_seen.get(address).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::BeaconDocument;

    fn registry(addresses: &[&str]) -> Registry {
        Registry::from_documents(addresses.iter().enumerate().map(|(i, a)| BeaconDocument {
            id: format!("b{i}"),
            address: Some((*a).to_string()),
            display_name: Some(format!("Beacon{i}")),
            owner_id: Some(format!("owner-{i}")),
        }))
    }

    #[test]
    fn test_new_entries_are_never_seen() {
        let tracker = DetectionTracker::for_registry(&registry(&["AA:BB:CC:DD:EE:01"]));
        let addr = "AA:BB:CC:DD:EE:01".parse().unwrap();
        assert_eq!(tracker.last_seen(&addr), None);
        assert_eq!(tracker.last_seen.len(), 1);
    }

    #[test]
    fn test_record_ignores_unknown_addresses() {
        let mut tracker =
            DetectionTracker::for_registry(&registry(&["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02"]));
        let known: BeaconAddress = "AA:BB:CC:DD:EE:01".parse().unwrap();
        let stranger: BeaconAddress = "11:22:33:44:55:66".parse().unwrap();
        let now = Instant::now();

        let matched = tracker.record_detections([&known, &stranger], now);

        assert_eq!(matched, 1);
        assert_eq!(tracker.last_seen(&known), Some(now));
        assert_eq!(tracker.last_seen(&stranger), None);
        assert!(!tracker.last_seen.contains_key(&stranger));
        assert_eq!(tracker.last_seen.len(), 2);
    }

    #[test]
    fn test_later_detection_overwrites() {
        let mut tracker = DetectionTracker::for_registry(&registry(&["AA:BB:CC:DD:EE:01"]));
        let addr: BeaconAddress = "AA:BB:CC:DD:EE:01".parse().unwrap();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(10);

        tracker.record_detections([&addr], t0);
        tracker.record_detections([&addr], t1);
        assert_eq!(tracker.last_seen(&addr), Some(t1));
    }
}
