//! Side-table configuration.
//!
//! A [`DimTableConfig`] can be deserialized with serde or parsed from the
//! flat key/value options of a table definition's WITH clause:
//!
//! ```text
//! table         = 'dim_customer'
//! connector     = 'parquet'
//! reload        = '5m'            -- or 'once'
//! join.type     = 'left'
//! match.mode    = 'prefix'
//! key.separator = ':'
//! alias.name    = 'info:name'     -- logical name = external column
//! auth.user     = 'reader'        -- forwarded to the loader untouched
//! path          = '/data/customers.parquet'
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::lookup::alias::AliasMap;
use crate::lookup::join::{LookupJoinType, MatchMode};

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required option is absent.
    #[error("missing required option: {0}")]
    Missing(String),

    /// An option has an unusable value.
    #[error("invalid value '{value}' for '{key}': {reason}")]
    Invalid {
        /// Option name.
        key: String,
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Connector type backing a side table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ConnectorType {
    /// Static in-memory rows.
    #[default]
    Static,
    /// Local Parquet file.
    Parquet,
    /// `PostgreSQL` table.
    Postgres,
    /// Custom connector type.
    Custom(String),
}

impl FromStr for ConnectorType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ConfigError::invalid("connector", s, "connector type cannot be empty"));
        }
        Ok(match s.trim().to_lowercase().as_str() {
            "static" | "memory" => Self::Static,
            "parquet" | "file-parquet" => Self::Parquet,
            "postgres" | "postgresql" | "pg" => Self::Postgres,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl TryFrom<String> for ConnectorType {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Parquet => write!(f, "parquet"),
            Self::Postgres => write!(f, "postgres"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// When the side table is re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ReloadPolicy {
    /// Load once at startup; the data is static.
    #[default]
    Once,
    /// Reload on a fixed interval.
    Every(Duration),
}

impl FromStr for ReloadPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("once") || trimmed.eq_ignore_ascii_case("never") {
            return Ok(Self::Once);
        }
        let interval = parse_duration("reload", trimmed)?;
        if interval.is_zero() {
            return Err(ConfigError::invalid("reload", s, "interval must be positive"));
        }
        Ok(Self::Every(interval))
    }
}

impl TryFrom<String> for ReloadPolicy {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Parses `500ms`, `30s`, `5m`, `1h`, `1d`. A bare number is milliseconds.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming `key` if `s` is not a duration.
pub fn parse_duration(key: &str, s: &str) -> Result<Duration, ConfigError> {
    let lower = s.trim().to_lowercase();
    let (num, unit_ms) = if let Some(n) = lower.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = lower.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = lower.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = lower.strip_suffix('h') {
        (n, 3_600_000)
    } else if let Some(n) = lower.strip_suffix('d') {
        (n, 86_400_000)
    } else {
        (lower.as_str(), 1)
    };
    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, s, "expected a duration like 30s, 5m or 1h"))?;
    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| ConfigError::invalid(key, s, "duration overflows"))
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| parse_duration("reload_timeout", &s))
        .transpose()
        .map_err(serde::de::Error::custom)
}

/// Complete configuration of one side table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct DimTableConfig {
    /// Table identifier in the external system.
    pub table: String,
    /// Connector backing the table.
    pub connector: ConnectorType,
    /// Reload schedule.
    pub reload: ReloadPolicy,
    /// Abort a reload that runs longer than this.
    #[serde(deserialize_with = "deserialize_opt_duration")]
    pub reload_timeout: Option<Duration>,
    /// Join type.
    pub join_type: LookupJoinType,
    /// Key matching strategy.
    pub match_mode: MatchMode,
    /// Separator placed between equality values in the lookup key.
    pub key_separator: String,
    /// Rowkey expression overriding plain concatenation.
    pub rowkey: Option<String>,
    /// Logical field name → external column identifier.
    pub aliases: BTreeMap<String, String>,
    /// Authentication parameters, opaque to the cache.
    pub auth: HashMap<String, String>,
    /// Remaining connector-specific options.
    pub options: HashMap<String, String>,
}

impl DimTableConfig {
    /// Parses the flat options of a table definition.
    ///
    /// Option names are case-insensitive. `alias.*` and `auth.*` keys are
    /// collected into [`aliases`](Self::aliases) and [`auth`](Self::auth);
    /// unknown keys land in [`options`](Self::options). The logical name
    /// after `alias.` keeps its case, since it names a side field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `table` is absent and
    /// [`ConfigError::Invalid`] for unparseable values.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut table = None;

        for (raw_key, value) in options {
            let raw_key = raw_key.trim();
            let key = raw_key.to_lowercase();
            match key.as_str() {
                "table" | "table.name" | "tablename" => table = Some(value.trim().to_string()),
                "connector" | "type" => config.connector = value.parse()?,
                "reload" | "reload.interval" | "cache.ttl" => config.reload = value.parse()?,
                "reload.timeout" => {
                    config.reload_timeout = Some(parse_duration("reload.timeout", value)?);
                }
                "join.type" | "jointype" => config.join_type = value.parse()?,
                "match.mode" | "matchmode" => config.match_mode = value.parse()?,
                "key.separator" => config.key_separator.clone_from(value),
                "rowkey" => config.rowkey = Some(value.trim().to_string()),
                _ => {
                    if let Some(name) = strip_prefix_ignore_case(raw_key, "alias.") {
                        config.aliases.insert(name.to_string(), value.clone());
                    } else if let Some(param) = key.strip_prefix("auth.") {
                        config.auth.insert(param.to_string(), value.clone());
                    } else {
                        config.options.insert(key, value.clone());
                    }
                }
            }
        }

        config.table = match table {
            Some(t) if !t.is_empty() => t,
            _ => return Err(ConfigError::Missing("table".into())),
        };
        Ok(config)
    }

    /// Builds the alias map declared by this config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if two names alias one column.
    pub fn alias_map(&self) -> Result<AliasMap, ConfigError> {
        AliasMap::new(self.aliases.iter().map(|(n, c)| (n.as_str(), c.as_str())))
    }

    /// Connector option `key`, if set.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Connector option `key`, or [`ConfigError::Missing`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if the option is absent.
    pub fn require_option(&self, key: &str) -> Result<&str, ConfigError> {
        self.option(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }
}

/// `raw` without `prefix`, matching the prefix ASCII case-insensitively.
fn strip_prefix_ignore_case<'a>(raw: &'a str, prefix: &str) -> Option<&'a str> {
    raw.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .and_then(|_| raw.get(prefix.len()..))
}
