//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment
//! variables. An example configuration file can be found in the `configs/`
//! directory located in the repository root.

use std::{fmt, path::Path};

use config::{Config, ConfigError, Environment, File};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::context::ContextDescriptor;

/// An error related to loading and validation of settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically
/// named settings field.
#[derive(Debug, Validate, Deserialize)]
pub struct Settings {
    pub api: ApiSettings,
    #[validate]
    pub round: RoundSettings,
    pub transport: TransportSettings,
    #[validate]
    pub selection: SelectionSettings,
    #[validate]
    pub privacy: PrivacySettings,
    #[validate]
    pub model: ModelSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation
    /// failed. A settings error is fatal: the run never starts.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    /// The environment override source. Variables carry the `FEDFLEET_`
    /// prefix and separate nesting levels with a double underscore, e.g.
    /// `FEDFLEET_ROUND__COUNT=6`.
    fn environment() -> Environment {
        Environment::with_prefix("fedfleet")
            .prefix_separator("_")
            .separator("__")
    }
}

/// Network settings for the coordinator.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    /// The address the coordinator listens on for participant connections.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// bind_address = "127.0.0.1:8080"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDFLEET_API__BIND_ADDRESS=127.0.0.1:8080
    /// ```
    pub bind_address: std::net::SocketAddr,
}

/// The round time settings.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RoundSettingsTime {
    /// The registration window, in seconds. `AwaitingParticipants` holds open
    /// for at most this long, or until the target participant count is
    /// reached, whichever comes first.
    pub registration: u64,
    /// The collection deadline, in seconds. `Collecting` waits at most this
    /// long for updates from the selected participants.
    pub collection: u64,
}

/// The round settings.
#[derive(Debug, Validate, Deserialize, Clone)]
#[validate(schema(function = "validate_round"))]
pub struct RoundSettings {
    /// The total number of rounds in the run.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// count = 6
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDFLEET_ROUND__COUNT=6
    /// ```
    pub count: u64,

    /// The target number of participants selected per round. A round may run
    /// with fewer when the registry is smaller; selection size is always
    /// `min(participants, registry size)`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// participants = 4
    /// ```
    pub participants: usize,

    /// The minimal number of updates that must have arrived by the
    /// collection deadline for the round to aggregate. Fewer updates abandon
    /// the round, leaving the global model unchanged.
    ///
    /// Must satisfy `1 <= min_updates <= participants`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// min_updates = 3
    /// ```
    pub min_updates: usize,

    /// The round time settings.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round.time]
    /// registration = 15
    /// collection = 30
    /// ```
    pub time: RoundSettingsTime,
}

impl RoundSettings {
    fn validate_round(&self) -> Result<(), ValidationError> {
        if self.count == 0 || self.participants == 0 {
            return Err(ValidationError::new("degenerate round settings"));
        }
        if self.min_updates == 0 || self.min_updates > self.participants {
            return Err(ValidationError::new(
                "min_updates must lie in 1..=participants",
            ));
        }
        if self.time.registration == 0 || self.time.collection == 0 {
            return Err(ValidationError::new("round times must be positive"));
        }
        Ok(())
    }
}

/// A wrapper for validate derive.
fn validate_round(s: &RoundSettings) -> Result<(), ValidationError> {
    s.validate_round()
}

/// Transport settings.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TransportSettings {
    /// The per-operation send timeout towards one participant, in seconds.
    /// A send that does not complete within this bound marks the channel
    /// broken and evicts the participant.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [transport]
    /// send_timeout = 5
    /// ```
    pub send_timeout: u64,
}

/// Participant selection settings.
#[derive(Debug, Validate, Deserialize, Clone)]
#[validate(schema(function = "validate_selection"))]
pub struct SelectionSettings {
    /// The weight of the recency criterion: participants that have not been
    /// selected recently score higher.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [selection]
    /// recency_weight = 0.5
    /// ```
    pub recency_weight: f64,

    /// The weight of the context-similarity criterion: participants whose
    /// declared context overlaps the round's target context score higher.
    pub similarity_weight: f64,

    /// The target context rounds are scored against. When absent, the
    /// similarity criterion contributes its full weight to every candidate
    /// and selection degrades to recency-based rotation.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [selection.target_context]
    /// region = "north"
    /// capabilities = ["routing", "music"]
    /// ```
    #[serde(default)]
    pub target_context: Option<ContextDescriptor>,
}

impl SelectionSettings {
    fn validate_selection(&self) -> Result<(), ValidationError> {
        if self.recency_weight < 0. || self.similarity_weight < 0. {
            return Err(ValidationError::new("selection weights must be >= 0"));
        }
        if self.recency_weight + self.similarity_weight <= 0. {
            return Err(ValidationError::new(
                "at least one selection weight must be positive",
            ));
        }
        Ok(())
    }
}

/// A wrapper for validate derive.
fn validate_selection(s: &SelectionSettings) -> Result<(), ValidationError> {
    s.validate_selection()
}

/// Differential-privacy settings for the aggregation noise.
#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_privacy"))]
pub struct PrivacySettings {
    /// The privacy budget. The noise scale is `sensitivity / epsilon`: a
    /// smaller budget yields larger noise.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [privacy]
    /// epsilon = 1.0
    /// ```
    pub epsilon: f64,

    /// The sensitivity of the aggregate. Setting it to `0` disables the
    /// noise entirely.
    pub sensitivity: f64,

    /// A fixed seed for the noise generator. Leave this out in production;
    /// set it for reproducible runs and tests.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl PrivacySettings {
    fn validate_privacy(&self) -> Result<(), ValidationError> {
        if !(self.epsilon > 0.) {
            return Err(ValidationError::new("epsilon must be > 0"));
        }
        if !(self.sensitivity >= 0.) {
            return Err(ValidationError::new("sensitivity must be >= 0"));
        }
        Ok(())
    }
}

/// A wrapper for validate derive.
fn validate_privacy(s: &PrivacySettings) -> Result<(), ValidationError> {
    s.validate_privacy()
}

/// Model settings.
#[derive(Debug, Validate, Deserialize, Clone, Copy)]
pub struct ModelSettings {
    /// The number of weights of the model. Fixed for the lifetime of a run;
    /// submitted deltas of any other length are rejected.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [model]
    /// length = 32
    /// ```
    #[validate(range(min = 1))]
    pub length: usize,
}

/// Logging settings.
#[derive(Debug, Deserialize)]
pub struct LoggingSettings {
    /// A comma-separated list of logging directives.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDFLEET_LOG__FILTER=info
    /// ```
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
