//! Runtime configuration management.
//!
//! A fixed schema of setting keys, each with a kind and validation rule.
//! Values live behind a `parking_lot::RwLock` and every change bumps a
//! version recorded in a bounded history. Services read the live values
//! through the typed getters instead of the startup [`Config`].

use crate::config::{Config, is_valid_timezone};
use crate::error::{ApiError, FieldError};
use chrono::{DateTime, NaiveTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;


/// Versions kept in the history.
pub const MAX_HISTORY: usize = 50;

/// Stream heartbeat interval key.
pub const HEARTBEAT_SECS: &str = "stream.heartbeat_secs";
/// Option chain cache lifetime key.
pub const CHAIN_CACHE_TTL_SECS: &str = "option_chain.cache_ttl_secs";
/// Synthetic chain width key.
pub const STRIKES_PER_SIDE: &str = "option_chain.strikes_per_side";
/// Pricing rate key.
pub const RISK_FREE_RATE: &str = "option_chain.risk_free_rate";
/// Pricing fallback volatility key.
pub const DEFAULT_IV: &str = "option_chain.default_iv";
/// Order entry switch key.
pub const TRADING_ENABLED: &str = "trading.enabled";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// How an update combines with the current values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Given values only; every other key returns to its default.
    Replace,
    /// Given values overwrite, others are unchanged.
    #[default]
    Merge,
    /// Given values apply only to keys still at their default.
    KeepExisting,
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(Self::Replace),
            "merge" => Ok(Self::Merge),
            "keep_existing" => Ok(Self::KeepExisting),
            other => Err(format!(
                "invalid merge strategy '{other}', expected replace, merge or keep_existing"
            )),
        }
    }
}

/// String formats checked by pattern fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// IANA timezone name.
    Timezone,
    /// 24-hour `hh:mm`.
    HhMm,
    /// `http://` or `https://` URL.
    Url,
}

impl Pattern {
    fn matches(self, value: &str) -> bool {
        match self {
            Self::Timezone => is_valid_timezone(value),
            Self::HhMm => {
                value.len() == 5 && NaiveTime::parse_from_str(value, "%H:%M").is_ok()
            }
            Self::Url => value
                .strip_prefix("https://")
                .or_else(|| value.strip_prefix("http://"))
                .is_some_and(|rest| {
                    !rest.is_empty() && !rest.starts_with('/') && !rest.contains(char::is_whitespace)
                }),
        }
    }
}

/// Kind and rule of a setting.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Whole number in `min..=max`.
    Integer {
        /// Lowest allowed value.
        min: i64,
        /// Highest allowed value.
        max: i64,
    },
    /// Number in `min..=max`.
    Float {
        /// Lowest allowed value.
        min: f64,
        /// Highest allowed value.
        max: f64,
    },
    /// `true` or `false`.
    Boolean,
    /// One of a fixed set of strings.
    Enum {
        /// Allowed values.
        values: Vec<String>,
    },
    /// String matching a named format.
    Pattern {
        /// Expected format.
        pattern: Pattern,
    },
}

impl FieldKind {
    fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            Self::Integer { min, max } => match value.as_i64() {
                Some(v) if (*min..=*max).contains(&v) => Ok(()),
                Some(v) => Err(format!("{v} is outside {min}..={max}")),
                None => Err("must be an integer".to_string()),
            },
            Self::Float { min, max } => match value.as_f64() {
                Some(v) if v >= *min && v <= *max => Ok(()),
                Some(v) => Err(format!("{v} is outside {min}..={max}")),
                None => Err("must be a number".to_string()),
            },
            Self::Boolean => value
                .is_boolean()
                .then_some(())
                .ok_or_else(|| "must be true or false".to_string()),
            Self::Enum { values } => match value.as_str() {
                Some(v) if values.iter().any(|allowed| allowed == v) => Ok(()),
                _ => Err(format!("must be one of: {}", values.join(", "))),
            },
            Self::Pattern { pattern } => match value.as_str() {
                Some(v) if pattern.matches(v) => Ok(()),
                _ => Err(format!("must be a valid {}", pattern_name(*pattern))),
            },
        }
    }
}

fn pattern_name(pattern: Pattern) -> &'static str {
    match pattern {
        Pattern::Timezone => "timezone",
        Pattern::HhMm => "hh:mm time",
        Pattern::Url => "http(s) URL",
    }
}

/// One entry of the settings schema.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SettingField {
    /// Dotted key.
    pub key: String,
    /// What the setting controls.
    pub description: String,
    /// Kind and rule.
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Default value.
    pub default: Value,
}

/// Current values and their version.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SettingsSnapshot {
    /// Incremented on every change.
    pub version: u64,
    /// Time of the last change.
    pub updated_at: DateTime<Utc>,
    /// Value of every key.
    pub values: BTreeMap<String, Value>,
}

/// A recorded version.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SettingsVersion {
    /// Version number.
    pub version: u64,
    /// User who made the change (None for system changes).
    pub changed_by: Option<Uuid>,
    /// When the change happened.
    pub changed_at: DateTime<Utc>,
    /// How the change was applied.
    pub merge_strategy: Option<MergeStrategy>,
    /// Full value set after the change.
    pub values: BTreeMap<String, Value>,
}

struct Inner {
    values: BTreeMap<String, Value>,
    version: u64,
    updated_at: DateTime<Utc>,
    history: VecDeque<SettingsVersion>,
}

/// Schema-validated runtime settings.
pub struct SettingsStore {
    schema: Vec<SettingField>,
    inner: RwLock<Inner>,
}

fn build_schema(config: &Config) -> Vec<SettingField> {
    let field = |key: &str, description: &str, kind, default| SettingField {
        key: key.to_string(),
        description: description.to_string(),
        kind,
        default,
    };
    vec![
        field(
            HEARTBEAT_SECS,
            "Seconds between stream heartbeats",
            FieldKind::Integer { min: 1, max: 300 },
            json!(config.stream.heartbeat_secs),
        ),
        field(
            CHAIN_CACHE_TTL_SECS,
            "Lifetime of a cached option chain",
            FieldKind::Integer { min: 0, max: 3600 },
            json!(config.option_chain.cache_ttl_secs),
        ),
        field(
            STRIKES_PER_SIDE,
            "Strikes generated on each side of ATM",
            FieldKind::Integer { min: 1, max: 50 },
            json!(config.option_chain.strikes_per_side),
        ),
        field(
            RISK_FREE_RATE,
            "Annualized risk-free rate used for greeks",
            FieldKind::Float { min: 0.0, max: 0.25 },
            json!(config.option_chain.risk_free_rate),
        ),
        field(
            DEFAULT_IV,
            "Volatility used when a leg has none",
            FieldKind::Float { min: 0.01, max: 3.0 },
            json!(config.option_chain.default_iv),
        ),
        field(
            TRADING_ENABLED,
            "Platform-wide order entry switch",
            FieldKind::Boolean,
            json!(true),
        ),
        field(
            "market.timezone",
            "Exchange timezone",
            FieldKind::Pattern {
                pattern: Pattern::Timezone,
            },
            json!(config.market.timezone),
        ),
        field(
            "market.open_time",
            "Session open (exchange time)",
            FieldKind::Pattern {
                pattern: Pattern::HhMm,
            },
            json!("09:15"),
        ),
        field(
            "market.close_time",
            "Session close (exchange time)",
            FieldKind::Pattern {
                pattern: Pattern::HhMm,
            },
            json!("15:30"),
        ),
        field(
            "integrations.openalgo_host",
            "Broker bridge base URL",
            FieldKind::Pattern {
                pattern: Pattern::Url,
            },
            json!("http://127.0.0.1:5000"),
        ),
        field(
            "logging.level",
            "Log verbosity",
            FieldKind::Enum {
                values: LOG_LEVELS.iter().map(|l| l.to_string()).collect(),
            },
            json!(
                LOG_LEVELS
                    .into_iter()
                    .find(|l| config.logging.level.eq_ignore_ascii_case(l))
                    .unwrap_or("info")
            ),
        ),
    ]
}

impl SettingsStore {
    /// Creates the store with defaults taken from the startup configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let schema = build_schema(config);
        let values = schema
            .iter()
            .map(|f| (f.key.clone(), f.default.clone()))
            .collect();
        Self {
            schema,
            inner: RwLock::new(Inner {
                values,
                version: 1,
                updated_at: Utc::now(),
                history: VecDeque::new(),
            }),
        }
    }

    /// The settings schema.
    #[must_use]
    pub fn schema(&self) -> &[SettingField] {
        &self.schema
    }

    /// Current values.
    #[must_use]
    pub fn get(&self) -> SettingsSnapshot {
        let inner = self.inner.read();
        SettingsSnapshot {
            version: inner.version,
            updated_at: inner.updated_at,
            values: inner.values.clone(),
        }
    }

    /// Current version number.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Recorded versions, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<SettingsVersion> {
        self.inner.read().history.iter().rev().cloned().collect()
    }

    fn field(&self, key: &str) -> Option<&SettingField> {
        self.schema.iter().find(|f| f.key == key)
    }

    /// Checks `values` against the schema, collecting every problem.
    ///
    /// # Errors
    /// Returns `Validation` listing unknown keys and invalid values.
    pub fn validate(&self, values: &Map<String, Value>) -> Result<(), ApiError> {
        let errors: Vec<FieldError> = values
            .iter()
            .filter_map(|(key, value)| match self.field(key) {
                None => Some(FieldError::new(key, "unknown setting")),
                Some(field) => field
                    .kind
                    .check(value)
                    .err()
                    .map(|message| FieldError::new(key, message)),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(errors))
        }
    }

    /// Validates and applies `values` using `strategy`.
    ///
    /// # Errors
    /// Returns `Validation` when any key is unknown or any value invalid; in
    /// that case nothing changes.
    pub fn update(
        &self,
        values: Map<String, Value>,
        strategy: MergeStrategy,
        changed_by: Option<Uuid>,
    ) -> Result<SettingsSnapshot, ApiError> {
        self.validate(&values)?;

        let mut inner = self.inner.write();
        let mut next = match strategy {
            MergeStrategy::Replace => self.defaults(),
            MergeStrategy::Merge | MergeStrategy::KeepExisting => inner.values.clone(),
        };
        for (key, value) in values {
            let at_default = self
                .field(&key)
                .is_some_and(|f| inner.values.get(&key) == Some(&f.default));
            if strategy != MergeStrategy::KeepExisting || at_default {
                next.insert(key, value);
            }
        }

        let snapshot = Self::commit(&mut inner, next, changed_by, Some(strategy));
        info!(version = snapshot.version, ?strategy, "Settings updated");
        Ok(snapshot)
    }

    /// Restores every default.
    pub fn reset(&self, changed_by: Option<Uuid>) -> SettingsSnapshot {
        let mut inner = self.inner.write();
        let snapshot = Self::commit(&mut inner, self.defaults(), changed_by, None);
        info!(version = snapshot.version, "Settings reset to defaults");
        snapshot
    }

    fn defaults(&self) -> BTreeMap<String, Value> {
        self.schema
            .iter()
            .map(|f| (f.key.clone(), f.default.clone()))
            .collect()
    }

    fn commit(
        inner: &mut Inner,
        values: BTreeMap<String, Value>,
        changed_by: Option<Uuid>,
        merge_strategy: Option<MergeStrategy>,
    ) -> SettingsSnapshot {
        let now = Utc::now();
        inner.version += 1;
        inner.updated_at = now;
        inner.values = values;
        inner.history.push_back(SettingsVersion {
            version: inner.version,
            changed_by,
            changed_at: now,
            merge_strategy,
            values: inner.values.clone(),
        });
        while inner.history.len() > MAX_HISTORY {
            inner.history.pop_front();
        }
        SettingsSnapshot {
            version: inner.version,
            updated_at: now,
            values: inner.values.clone(),
        }
    }

    // ========================================================================
    // Typed getters
    // ========================================================================

    /// Live value of a key.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<Value> {
        self.inner.read().values.get(key).cloned()
    }

    /// Integer setting, or `fallback` if unset or negative.
    #[must_use]
    pub fn u64_or(&self, key: &str, fallback: u64) -> u64 {
        self.value(key).and_then(|v| v.as_u64()).unwrap_or(fallback)
    }

    /// Number setting, or `fallback` if unset.
    #[must_use]
    pub fn f64_or(&self, key: &str, fallback: f64) -> f64 {
        self.value(key).and_then(|v| v.as_f64()).unwrap_or(fallback)
    }

    /// Boolean setting, or `fallback` if unset.
    #[must_use]
    pub fn bool_or(&self, key: &str, fallback: bool) -> bool {
        self.value(key).and_then(|v| v.as_bool()).unwrap_or(fallback)
    }
}
