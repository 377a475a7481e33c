//! Application configuration management.
//!
//! Handles loading and validating the daemon configuration:
//! - Scan timing (scan window, pause between cycles, presence timeout)
//! - Firestore project, collections and credentials
//! - Presence labels written to owner documents
//! - Logging and timezone settings
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `PRESENCE__SECTION__KEY` environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Prefix of environment overrides (`PRESENCE__SCAN__PAUSE_SECS=15`).
pub const ENV_PREFIX: &str = "PRESENCE";

/// Default Firestore REST root.
pub const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1/";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file or environment could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// No platform configuration directory could be determined.
    #[error("Cannot determine configuration directory")]
    NoConfigDir,

    /// A single field failed validation.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("Configuration has {} errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),

    /// The credentials environment variable is unset or empty.
    #[error("Firestore access token not found in environment variable {variable}")]
    MissingCredentials {
        /// Name of the variable that was consulted.
        variable: String,
    },

    /// A credentials file exists but cannot be used.
    #[error("Unusable credentials in {}: {message}", path.display())]
    InvalidCredentials {
        /// File that was read.
        path: PathBuf,
        /// What is wrong with it.
        message: String,
    },
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scan timing.
    pub scan: ScanConfig,

    /// Remote store connection.
    pub firestore: FirestoreConfig,

    /// Text written to owner documents for each presence state.
    pub labels: PresenceLabels,

    /// Log output.
    pub logging: LoggingConfig,

    /// Timezone used for wall-clock timestamps in logs.
    #[serde(with = "timezone_serde")]
    pub timezone: Tz,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            firestore: FirestoreConfig::default(),
            labels: PresenceLabels::default(),
            logging: LoggingConfig::default(),
            timezone: chrono_tz::Europe::Rome,
        }
    }
}

/// Scan cycle timing.
///
/// `presence_timeout_secs` should exceed `pause_secs`, otherwise a beacon that
/// is heard every cycle can still be reported absent between two scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Length of each scan window.
    pub duration_secs: u64,

    /// Pause between the end of one cycle and the start of the next.
    pub pause_secs: u64,

    /// Maximum time since last detection for a beacon to count as present.
    pub presence_timeout_secs: u64,

    /// HCI adapter name (e.g. `hci0`). Uses the default adapter if unset.
    pub adapter: Option<String>,

    /// Reload the beacon registry this often even when it is not empty.
    pub registry_refresh_secs: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            duration_secs: 5,
            pause_secs: 10,
            presence_timeout_secs: 20,
            adapter: None,
            registry_refresh_secs: None,
        }
    }
}

impl ScanConfig {
    /// Scan window.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Pause between cycles.
    #[must_use]
    pub const fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }

    /// Presence timeout.
    #[must_use]
    pub const fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_secs)
    }

    /// Periodic registry refresh interval, if enabled.
    #[must_use]
    pub fn registry_refresh(&self) -> Option<Duration> {
        self.registry_refresh_secs.map(Duration::from_secs)
    }
}

/// Firestore connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirestoreConfig {
    /// Google Cloud project id.
    pub project_id: String,

    /// Database id, usually `(default)`.
    pub database: String,

    /// REST API root. Point at the emulator for local testing.
    pub base_url: Url,

    /// Collection holding beacon documents.
    pub beacon_collection: String,

    /// Collection holding owner documents.
    pub owner_collection: String,

    /// Service-account key (JSON). Access tokens are minted from it and
    /// refreshed before they expire. Takes precedence over the token options.
    pub credentials_file: Option<PathBuf>,

    /// File holding a bearer token, re-read before every request.
    pub access_token_file: Option<PathBuf>,

    /// Environment variable holding a bearer token, used when neither file
    /// is configured.
    pub access_token_env: String,

    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            database: "(default)".to_string(),
            base_url: Url::parse(DEFAULT_FIRESTORE_URL).expect("valid default URL"),
            beacon_collection: "beacon".to_string(),
            owner_collection: "figli".to_string(),
            credentials_file: None,
            access_token_file: None,
            access_token_env: "PRESENCE_FIRESTORE_TOKEN".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl FirestoreConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Presence values as stored in owner documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceLabels {
    /// Written when the beacon becomes present.
    pub present: String,
    /// Written when the beacon becomes absent.
    pub absent: String,
}

impl Default for PresenceLabels {
    fn default() -> Self {
        Self {
            present: "A bordo".to_string(),
            absent: "Sceso".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSON file logs plus plain stdout instead of pretty stdout.
    pub production: bool,

    /// Directory for rolling log files. Platform default if unset.
    pub directory: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `path` (if it exists) and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`Config::load`], but with an explicit environment map instead of
    /// the process environment when `env` is `Some`.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_with_env(path: &Path, env: Option<HashMap<String, String>>) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check hard constraints, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a single problem or
    /// [`ConfigError::MultipleValidationErrors`] for several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        };

        check(self.scan.duration_secs > 0, "scan.duration_secs", "must be greater than zero");
        check(self.scan.pause_secs > 0, "scan.pause_secs", "must be greater than zero");
        check(
            self.scan.presence_timeout_secs > 0,
            "scan.presence_timeout_secs",
            "must be greater than zero",
        );
        check(
            self.scan.registry_refresh_secs != Some(0),
            "scan.registry_refresh_secs",
            "must be greater than zero when set",
        );
        check(!self.firestore.project_id.trim().is_empty(), "firestore.project_id", "is required");
        check(!self.firestore.database.trim().is_empty(), "firestore.database", "is required");
        check(
            is_collection_id(&self.firestore.beacon_collection),
            "firestore.beacon_collection",
            "must be a non-empty collection id without '/'",
        );
        check(
            is_collection_id(&self.firestore.owner_collection),
            "firestore.owner_collection",
            "must be a non-empty collection id without '/'",
        );
        check(
            self.firestore.request_timeout_secs > 0,
            "firestore.request_timeout_secs",
            "must be greater than zero",
        );
        check(!self.labels.present.is_empty(), "labels.present", "cannot be empty");
        check(!self.labels.absent.is_empty(), "labels.absent", "cannot be empty");
        check(
            self.labels.present != self.labels.absent,
            "labels",
            "present and absent labels must differ",
        );

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Soft constraints that do not stop the daemon but usually indicate a
    /// mistake. Each entry is a human-readable warning.
    #[must_use]
    pub fn advisories(&self) -> Vec<String> {
        let scan = &self.scan;
        let mut warnings = Vec::new();
        if scan.presence_timeout_secs <= scan.pause_secs {
            warnings.push(format!(
                "presence timeout ({}s) does not exceed the pause between scans ({}s); \
                 present beacons will flap to absent between cycles",
                scan.presence_timeout_secs, scan.pause_secs
            ));
        }
        let cycle_budget = scan.pause_secs.saturating_add(scan.presence_timeout_secs);
        if scan.duration_secs >= cycle_budget {
            warnings.push(format!(
                "scan duration ({}s) is not shorter than pause + timeout ({cycle_budget}s)",
                scan.duration_secs
            ));
        }
        warnings
    }
}

fn is_collection_id(value: &str) -> bool {
    !value.trim().is_empty() && !value.contains('/')
}

/// Default configuration file location.
///
/// On Raspberry Pi: `/etc/beacon-presence/config.toml`
/// For development: the platform config directory.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] if no directory can be determined.
pub fn default_config_path() -> ConfigResult<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/etc/beacon-presence/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "beacon-presence")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

mod timezone_serde {
    use chrono_tz::Tz;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(tz.name())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Tz, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
