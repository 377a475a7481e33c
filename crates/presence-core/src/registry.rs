//! Beacon registry.
//!
//! The set of beacons eligible for monitoring, keyed by address and loaded
//! from the remote store. A record is admitted whole or not at all.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::store::{BeaconDocument, PresenceStore, StoreResult};
use crate::types::{BeaconAddress, BeaconRecord};

/// Why a beacon document was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// No hardware address.
    #[error("missing address")]
    MissingAddress,

    /// Address present but malformed.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    /// No display name.
    #[error("missing display name")]
    MissingDisplayName,

    /// No owner reference, or an empty one.
    #[error("missing owner reference")]
    MissingOwner,

    /// Owner reference that cannot name a single document.
    #[error("invalid owner reference '{0}'")]
    InvalidOwner(String),

    /// Another document in the same load already claimed this address.
    #[error("address {0} already registered by another beacon")]
    DuplicateAddress(BeaconAddress),
}

/// Beacons currently being watched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    beacons: BTreeMap<BeaconAddress, BeaconRecord>,
}

impl Registry {
    /// Build a registry from raw documents, skipping (and logging) invalid ones.
    ///
    /// When two documents share an address the first one wins.
    pub fn from_documents<I>(docs: I) -> Self
    where
        I: IntoIterator<Item = BeaconDocument>,
    {
        let mut beacons = BTreeMap::new();
        for doc in docs {
            match validate(&doc) {
                Ok(record) if beacons.contains_key(&record.address) => {
                    warn!(
                        document = %doc.id,
                        reason = %RejectReason::DuplicateAddress(record.address),
                        "Skipping beacon document"
                    );
                }
                Ok(record) => {
                    beacons.insert(record.address.clone(), record);
                }
                Err(reason) => {
                    warn!(document = %doc.id, %reason, "Skipping beacon document");
                }
            }
        }
        Self { beacons }
    }

    /// Look up a beacon by address.
    #[must_use]
    pub fn get(&self, address: &BeaconAddress) -> Option<&BeaconRecord> {
        self.beacons.get(address)
    }

    /// Returns `true` if `address` is registered.
    #[must_use]
    pub fn contains(&self, address: &BeaconAddress) -> bool {
        self.beacons.contains_key(address)
    }

    /// Number of registered beacons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    /// Returns `true` if no beacon is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Registered addresses in order.
    pub fn addresses(&self) -> impl Iterator<Item = &BeaconAddress> {
        self.beacons.keys()
    }
}

/// Check that a document carries every field a [`BeaconRecord`] needs.
///
/// # Errors
///
/// Returns the first [`RejectReason`] found.
pub fn validate(doc: &BeaconDocument) -> Result<BeaconRecord, RejectReason> {
    let raw_address = non_empty(doc.address.as_deref()).ok_or(RejectReason::MissingAddress)?;
    let address = BeaconAddress::parse(raw_address)
        .map_err(|_| RejectReason::InvalidAddress(raw_address.to_string()))?;
    let display_name =
        non_empty(doc.display_name.as_deref()).ok_or(RejectReason::MissingDisplayName)?;
    let owner_id = non_empty(doc.owner_id.as_deref()).ok_or(RejectReason::MissingOwner)?;
    if owner_id.contains('/') {
        return Err(RejectReason::InvalidOwner(owner_id.to_string()));
    }

    Ok(BeaconRecord {
        address,
        registry_id: doc.id.clone(),
        display_name: display_name.to_string(),
        owner_id: owner_id.to_string(),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Fetch assigned beacons and build a registry.
///
/// # Errors
///
/// Propagates the store error if the query fails. Invalid documents are not
/// errors; they are skipped.
pub async fn try_load<S>(store: &S) -> StoreResult<Registry>
where
    S: PresenceStore + ?Sized,
{
    let docs = store.query_assigned_beacons().await?;
    let fetched = docs.len();
    let registry = Registry::from_documents(docs);
    info!(
        fetched,
        admitted = registry.len(),
        "Loaded assigned beacons from remote store"
    );
    if registry.is_empty() {
        warn!("No assigned beacons found; scanning stays idle until beacons are assigned");
    }
    Ok(registry)
}

/// Fetch assigned beacons, falling back to an empty registry on failure.
///
/// Never fails: the error is logged and the caller retries on a later cycle.
pub async fn load<S>(store: &S) -> Registry
where
    S: PresenceStore + ?Sized,
{
    match try_load(store).await {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "Failed to load beacons from remote store");
            Registry::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};

    fn doc(id: &str, address: Option<&str>, name: Option<&str>, owner: Option<&str>) -> BeaconDocument {
        BeaconDocument {
            id: id.to_string(),
            address: address.map(str::to_string),
            display_name: name.map(str::to_string),
            owner_id: owner.map(str::to_string),
        }
    }

    #[test]
    fn test_validate_accepts_complete_document() {
        let record = validate(&doc(
            "b1",
            Some("c4:7c:8d:6a:1b:02"),
            Some("Beacon1"),
            Some("child-7"),
        ))
        .unwrap();
        assert_eq!(record.address.as_str(), "C4:7C:8D:6A:1B:02");
        assert_eq!(record.registry_id, "b1");
        assert_eq!(record.display_name, "Beacon1");
        assert_eq!(record.owner_id, "child-7");
    }

    #[test]
    fn test_validate_rejections() {
        let addr = Some("AA:BB:CC:DD:EE:01");
        assert_eq!(
            validate(&doc("x", None, Some("n"), Some("o"))),
            Err(RejectReason::MissingAddress)
        );
        assert_eq!(
            validate(&doc("x", Some("not-a-mac"), Some("n"), Some("o"))),
            Err(RejectReason::InvalidAddress("not-a-mac".into()))
        );
        assert_eq!(
            validate(&doc("x", addr, Some("  "), Some("o"))),
            Err(RejectReason::MissingDisplayName)
        );
        assert_eq!(
            validate(&doc("x", addr, Some("n"), Some(""))),
            Err(RejectReason::MissingOwner)
        );
        assert_eq!(
            validate(&doc("x", addr, Some("n"), None)),
            Err(RejectReason::MissingOwner)
        );
        assert_eq!(
            validate(&doc("x", addr, Some("n"), Some("figli/abc"))),
            Err(RejectReason::InvalidOwner("figli/abc".into()))
        );
    }

    #[test]
    fn test_malformed_record_does_not_block_siblings() {
        let registry = Registry::from_documents(vec![
            doc("good", Some("AA:BB:CC:DD:EE:01"), Some("A"), Some("owner-a")),
            doc("no-owner", Some("AA:BB:CC:DD:EE:02"), Some("B"), None),
            doc("also-good", Some("AA:BB:CC:DD:EE:03"), Some("C"), Some("owner-c")),
        ]);

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&"AA:BB:CC:DD:EE:01".parse().unwrap()));
        assert!(!registry.contains(&"AA:BB:CC:DD:EE:02".parse().unwrap()));
        assert!(registry.contains(&"AA:BB:CC:DD:EE:03".parse().unwrap()));
    }

    #[test]
    fn test_duplicate_address_first_wins() {
        let registry = Registry::from_documents(vec![
            doc("first", Some("aa:bb:cc:dd:ee:01"), Some("A"), Some("owner-a")),
            doc("second", Some("AA:BB:CC:DD:EE:01"), Some("B"), Some("owner-b")),
        ]);

        assert_eq!(registry.len(), 1);
        let record = registry.get(&"AA:BB:CC:DD:EE:01".parse().unwrap()).unwrap();
        assert_eq!(record.registry_id, "first");
    }

    #[tokio::test]
    async fn test_load_swallows_store_errors() {
        let store = MemoryStore::new().with_beacon("b1", "AA:BB:CC:DD:EE:01", "A", "owner-a");
        store.fail_queries(StoreError::PermissionDenied {
            message: "missing role".into(),
        });

        let registry = load(&store).await;
        assert!(registry.is_empty());

        assert!(matches!(
            try_load(&store).await,
            Err(StoreError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_admits_valid_documents() {
        let store = MemoryStore::new()
            .with_beacon("b1", "AA:BB:CC:DD:EE:01", "A", "owner-a")
            .with_document(doc("b2", Some("AA:BB:CC:DD:EE:02"), None, Some("owner-b")));

        let registry = load(&store).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.addresses().map(BeaconAddress::as_str).collect::<Vec<_>>(),
            vec!["AA:BB:CC:DD:EE:01"]
        );
    }
}
