//! Shared domain types.
//!
//! Beacon addresses, registry records and the two-valued presence state used
//! throughout the engine. Only the publisher converts a [`PresenceState`] to
//! text.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// MAC address pattern: six hex octets separated by `:` or `-`.
static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2})([:-][0-9A-Fa-f]{2}){5}$").expect("valid MAC regex")
});

/// Returns `true` if `value` looks like a Bluetooth MAC address.
#[must_use]
pub fn is_valid_mac_address(value: &str) -> bool {
    MAC_ADDRESS_RE.is_match(value)
}

/// Canonical Bluetooth hardware address of a beacon.
///
/// Always stored upper-case with `:` separators so that addresses coming from
/// the remote store and from the radio compare equal regardless of how either
/// side formats them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BeaconAddress(String);

impl BeaconAddress {
    /// Parse and normalise an address.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidAddress`] if the input is not six hex octets.
    pub fn parse(value: &str) -> Result<Self, InvalidAddress> {
        let trimmed = value.trim();
        if !is_valid_mac_address(trimmed) {
            return Err(InvalidAddress(value.to_string()));
        }
        Ok(Self(trimmed.replace('-', ":").to_ascii_uppercase()))
    }

    /// The canonical textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BeaconAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BeaconAddress {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BeaconAddress {
    type Error = InvalidAddress;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BeaconAddress> for String {
    fn from(address: BeaconAddress) -> Self {
        address.0
    }
}

/// Error returned when a string is not a valid Bluetooth address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid Bluetooth address: '{0}'. Expected format XX:XX:XX:XX:XX:XX")]
pub struct InvalidAddress(pub String);

/// A watched beacon and the owner whose presence it represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconRecord {
    /// Hardware address, the registry key.
    pub address: BeaconAddress,

    /// Identifier of the backing beacon document in the remote store.
    pub registry_id: String,

    /// Human-readable label, used for logging only.
    pub display_name: String,

    /// Identifier of the owner document whose presence field is updated.
    /// Never empty.
    pub owner_id: String,
}

/// Derived presence of a beacon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    /// Detected within the presence timeout.
    Present,
    /// Not detected within the presence timeout, or never detected.
    #[default]
    Absent,
}

impl PresenceState {
    /// Map a boolean "is within timeout" to a state.
    #[must_use]
    pub const fn from_present(present: bool) -> Self {
        if present {
            Self::Present
        } else {
            Self::Absent
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => f.write_str("present"),
            Self::Absent => f.write_str("absent"),
        }
    }
}

/// A change of derived presence for one beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Beacon whose state changed.
    pub address: BeaconAddress,
    /// State before this evaluation.
    pub from: PresenceState,
    /// State after this evaluation.
    pub to: PresenceState,
}
