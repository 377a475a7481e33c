//! Presence engine: the owned working set and the presence state machine.
//!
//! Each registered beacon has exactly two states, `Absent` (initial) and
//! `Present`. A beacon is present iff it was seen no longer than the presence
//! timeout ago. There is no hysteresis and no terminal state.
//!
//! Operating precondition: the presence timeout must exceed the pause between
//! scans, or a beacon heard on every cycle will flap to absent in between.
//! The engine does not enforce this; [`crate::config::Config::advisories`]
//! warns about it.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::registry::Registry;
use crate::tracker::DetectionTracker;
use crate::types::{BeaconAddress, BeaconRecord, PresenceState, Transition};

/// Result of evaluating one beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// State computed for this instant.
    pub state: PresenceState,
    /// State stored before this evaluation.
    pub previous: PresenceState,
    /// `true` iff `state != previous`.
    pub changed: bool,
}

/// Registry, detection entries and presence states, owned together.
///
/// The three maps always share the same key set; [`replace_registry`]
/// rebuilds all of them in one step.
///
/// [`replace_registry`]: PresenceEngine::replace_registry
#[derive(Debug, Clone, Default)]
pub struct PresenceEngine {
    registry: Registry,
    tracker: DetectionTracker,
    states: BTreeMap<BeaconAddress, PresenceState>,
}

impl PresenceEngine {
    /// Engine watching the beacons of `registry`, all absent and never seen.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        let mut engine = Self::default();
        engine.replace_registry(registry);
        engine
    }

    /// Swap in a new registry, discarding every detection and state.
    ///
    /// Beacons present in both the old and new registry start over as well.
    pub fn replace_registry(&mut self, registry: Registry) {
        self.tracker = DetectionTracker::for_registry(&registry);
        self.states = registry
            .addresses()
            .map(|a| (a.clone(), PresenceState::Absent))
            .collect();
        self.registry = registry;
    }

    /// The registry currently watched.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record that `addresses` were heard at `now`. Unknown addresses are ignored.
    pub fn record_detections<'a, I>(&mut self, addresses: I, now: Instant) -> usize
    where
        I: IntoIterator<Item = &'a BeaconAddress>,
    {
        self.tracker.record_detections(addresses, now)
    }

    /// Last detection of `address`; `None` means never seen.
    #[must_use]
    pub fn last_seen(&self, address: &BeaconAddress) -> Option<Instant> {
        self.tracker.last_seen(address)
    }

    /// Stored state of `address`, if registered.
    #[must_use]
    pub fn state(&self, address: &BeaconAddress) -> Option<PresenceState> {
        self.states.get(address).copied()
    }

    /// Registered beacons whose stored state is `Present`.
    pub fn present_beacons(&self) -> impl Iterator<Item = &BeaconRecord> {
        self.states
            .iter()
            .filter(|(_, state)| **state == PresenceState::Present)
            .filter_map(|(address, _)| self.registry.get(address))
    }

    /// Compute the state of `address` at `now` and store it.
    ///
    /// Returns `None` if the address is not registered.
    pub fn evaluate(
        &mut self,
        address: &BeaconAddress,
        now: Instant,
        timeout: Duration,
    ) -> Option<Evaluation> {
        step(&self.tracker, &mut self.states, address, now, timeout)
    }

    /// Evaluate every registered beacon in address order and return the ones
    /// whose state changed.
    pub fn evaluate_all(&mut self, now: Instant, timeout: Duration) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for address in self.registry.addresses() {
            if let Some(eval) = step(&self.tracker, &mut self.states, address, now, timeout) {
                if eval.changed {
                    transitions.push(Transition {
                        address: address.clone(),
                        from: eval.previous,
                        to: eval.state,
                    });
                }
            }
        }
        transitions
    }
}

/// The presence rule: seen, and no longer ago than `timeout`.
#[must_use]
pub fn is_present(last_seen: Option<Instant>, now: Instant, timeout: Duration) -> bool {
    last_seen.is_some_and(|seen| now.saturating_duration_since(seen) <= timeout)
}

fn step(
    tracker: &DetectionTracker,
    states: &mut BTreeMap<BeaconAddress, PresenceState>,
    address: &BeaconAddress,
    now: Instant,
    timeout: Duration,
) -> Option<Evaluation> {
    let stored = states.get_mut(address)?;
    let state = PresenceState::from_present(is_present(tracker.last_seen(address), now, timeout));
    let previous = std::mem::replace(stored, state);
    Some(Evaluation {
        state,
        previous,
        changed: state != previous,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BeaconDocument;

    const TIMEOUT: Duration = Duration::from_secs(20);

    fn registry(addresses: &[&str]) -> Registry {
        Registry::from_documents(addresses.iter().enumerate().map(|(i, a)| BeaconDocument {
            id: format!("b{i}"),
            address: Some((*a).to_string()),
            display_name: Some(format!("Beacon{i}")),
            owner_id: Some(format!("owner-{i}")),
        }))
    }

    fn addr(s: &str) -> BeaconAddress {
        s.parse().unwrap()
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_is_present_boundaries() {
        let t0 = Instant::now();
        assert!(!is_present(None, t0, TIMEOUT));
        assert!(is_present(Some(t0), t0, TIMEOUT));
        assert!(is_present(Some(t0), t0 + TIMEOUT, TIMEOUT));
        assert!(!is_present(Some(t0), t0 + TIMEOUT + Duration::from_millis(1), TIMEOUT));
    }

    #[test]
    fn test_new_beacons_start_absent() {
        let engine = PresenceEngine::new(registry(&["AA:BB:CC:DD:EE:01"]));
        assert_eq!(engine.state(&addr("AA:BB:CC:DD:EE:01")), Some(PresenceState::Absent));
        assert_eq!(engine.last_seen(&addr("AA:BB:CC:DD:EE:01")), None);
    }

    #[test]
    fn test_never_seen_beacon_does_not_transition() {
        let mut engine = PresenceEngine::new(registry(&["AA:BB:CC:DD:EE:01"]));
        let eval = engine
            .evaluate(&addr("AA:BB:CC:DD:EE:01"), Instant::now(), TIMEOUT)
            .unwrap();
        assert_eq!(eval.state, PresenceState::Absent);
        assert!(!eval.changed);
    }

    #[test]
    fn test_unknown_address_is_not_evaluated() {
        let mut engine = PresenceEngine::new(registry(&["AA:BB:CC:DD:EE:01"]));
        assert!(engine
            .evaluate(&addr("11:22:33:44:55:66"), Instant::now(), TIMEOUT)
            .is_none());
    }

    #[test]
    fn test_state_matches_timeout_rule_at_every_instant() {
        let a = addr("AA:BB:CC:DD:EE:01");
        let mut engine = PresenceEngine::new(registry(&[a.as_str()]));
        let t0 = Instant::now();
        engine.record_detections([&a], t0);

        for offset in [0, 1, 10, 19, 20, 21, 30, 100] {
            let now = t0 + secs(offset);
            let eval = engine.evaluate(&a, now, TIMEOUT).unwrap();
            let expected = PresenceState::from_present(now - t0 <= TIMEOUT);
            assert_eq!(eval.state, expected, "offset {offset}s");
            assert_eq!(engine.state(&a), Some(expected));
        }
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let a = addr("AA:BB:CC:DD:EE:01");
        let mut engine = PresenceEngine::new(registry(&[a.as_str()]));
        let t0 = Instant::now();
        engine.record_detections([&a], t0);

        let first = engine.evaluate(&a, t0, TIMEOUT).unwrap();
        let second = engine.evaluate(&a, t0, TIMEOUT).unwrap();
        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(second.state, PresenceState::Present);
    }

    #[test]
    fn test_present_absent_present_scenario() {
        let a = addr("AA:BB:CC:DD:EE:01");
        let mut engine = PresenceEngine::new(registry(&[a.as_str()]));
        let t0 = Instant::now();

        engine.record_detections([&a], t0);
        let eval = engine.evaluate(&a, t0, TIMEOUT).unwrap();
        assert_eq!((eval.previous, eval.state), (PresenceState::Absent, PresenceState::Present));
        assert!(eval.changed);

        let eval = engine.evaluate(&a, t0 + secs(25), TIMEOUT).unwrap();
        assert_eq!((eval.previous, eval.state), (PresenceState::Present, PresenceState::Absent));
        assert!(eval.changed);

        engine.record_detections([&a], t0 + secs(30));
        let eval = engine.evaluate(&a, t0 + secs(30), TIMEOUT).unwrap();
        assert_eq!((eval.previous, eval.state), (PresenceState::Absent, PresenceState::Present));
        assert!(eval.changed);
    }

    #[test]
    fn test_present_beacons_follow_stored_state() {
        let a = addr("AA:BB:CC:DD:EE:01");
        let b = addr("AA:BB:CC:DD:EE:02");
        let mut engine = PresenceEngine::new(registry(&[a.as_str(), b.as_str()]));
        let t0 = Instant::now();
        assert_eq!(engine.present_beacons().count(), 0);

        engine.record_detections([&b], t0);
        engine.evaluate_all(t0, TIMEOUT);
        let present: Vec<_> = engine.present_beacons().map(|r| r.address.clone()).collect();
        assert_eq!(present, vec![b.clone()]);

        engine.evaluate_all(t0 + secs(30), TIMEOUT);
        assert_eq!(engine.present_beacons().count(), 0);
    }

    #[test]
    fn test_evaluate_all_reports_only_changes() {
        let a = addr("AA:BB:CC:DD:EE:01");
        let b = addr("AA:BB:CC:DD:EE:02");
        let mut engine = PresenceEngine::new(registry(&[a.as_str(), b.as_str()]));
        let t0 = Instant::now();

        engine.record_detections([&a, &b], t0);
        assert_eq!(engine.evaluate_all(t0, TIMEOUT).len(), 2);

        engine.record_detections([&b], t0 + secs(15));
        let transitions = engine.evaluate_all(t0 + secs(25), TIMEOUT);
        assert_eq!(
            transitions,
            vec![Transition {
                address: a,
                from: PresenceState::Present,
                to: PresenceState::Absent,
            }]
        );
        assert!(engine.evaluate_all(t0 + secs(25), TIMEOUT).is_empty());
    }

    #[test]
    fn test_replace_registry_drops_old_state() {
        let a = addr("AA:BB:CC:DD:EE:01");
        let b = addr("AA:BB:CC:DD:EE:02");
        let mut engine = PresenceEngine::new(registry(&[a.as_str(), b.as_str()]));
        let t0 = Instant::now();
        engine.record_detections([&a, &b], t0);
        engine.evaluate_all(t0, TIMEOUT);

        engine.replace_registry(registry(&[b.as_str()]));

        assert_eq!(engine.state(&a), None);
        assert_eq!(engine.last_seen(&a), None);
        assert!(engine.evaluate(&a, t0, TIMEOUT).is_none());
        // Survivors are rebuilt, not merged.
        assert_eq!(engine.state(&b), Some(PresenceState::Absent));
        assert_eq!(engine.last_seen(&b), None);
        assert_eq!(engine.registry().len(), 1);
    }
}
