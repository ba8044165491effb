//! Stream-to-side-table lookup join.
//!
//! A [`JoinEngine`] enriches each stream row with the matching side-table
//! rows from the current snapshot of a [`SnapshotCache`]. It is shared by
//! reference across workers; `process` takes `&self` and never waits on a
//! reload.
//!
//! | Match mode | Key found      | Key absent / null equality value |
//! |------------|----------------|----------------------------------|
//! | Exact      | one row        | Inner: none, LeftOuter: one null-padded row |
//! | Prefix     | one row per match | Inner: none, LeftOuter: one null-padded row |

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::lookup::config::{ConfigError, DimTableConfig};
use crate::lookup::key::{EqualityBinding, KeyError, RowKeyBuilder};
use crate::lookup::row::{Field, Row, RowSchema};
use crate::lookup::snapshot::{ReferenceRecord, SnapshotCache};
use crate::lookup::value::ScalarValue;

/// Join type for lookup joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum LookupJoinType {
    /// Inner join: only emit rows with a match.
    #[default]
    Inner,
    /// Left outer join: emit every stream row, nulls for non-matches.
    LeftOuter,
}

impl fmt::Display for LookupJoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "Inner"),
            Self::LeftOuter => write!(f, "LeftOuter"),
        }
    }
}

impl FromStr for LookupJoinType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inner" => Ok(Self::Inner),
            "left" | "left-outer" | "left_outer" | "leftouter" | "left outer" => {
                Ok(Self::LeftOuter)
            }
            _ => Err(ConfigError::Invalid {
                key: "join.type".into(),
                value: s.to_string(),
                reason: "expected inner or left".into(),
            }),
        }
    }
}

impl TryFrom<String> for LookupJoinType {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// How a built key is matched against the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum MatchMode {
    /// The key must equal a row key.
    #[default]
    Exact,
    /// Every row whose key starts with the built key matches.
    Prefix,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "Exact"),
            Self::Prefix => write!(f, "Prefix"),
        }
    }
}

impl FromStr for MatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "prefix" | "pre-rowkey" | "pre_rowkey" | "prerowkey" => Ok(Self::Prefix),
            _ => Err(ConfigError::Invalid {
                key: "match.mode".into(),
                value: s.to_string(),
                reason: "expected exact or prefix".into(),
            }),
        }
    }
}

impl TryFrom<String> for MatchMode {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Errors from building a [`JoinEngine`].
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    /// No snapshot has been loaded for the side table yet.
    #[error("side table not loaded: {0}")]
    NotReady(String),

    /// The output layout or binding does not fit the input schema.
    #[error("invalid output layout: {0}")]
    Layout(String),

    /// The lookup key cannot be built.
    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

/// One column of the enriched output row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputColumn {
    /// Passthrough of the stream field at this position.
    Input(usize),
    /// Side-table field, looked up by name in the matched record.
    Side(Field),
}

/// Static description of a lookup join.
#[derive(Debug, Clone, Default)]
pub struct JoinConfig {
    /// Equality conditions, in key order.
    pub binding: EqualityBinding,
    /// Output row layout.
    pub output: Vec<OutputColumn>,
    /// Join type.
    pub join_type: LookupJoinType,
    /// Key matching strategy.
    pub match_mode: MatchMode,
    /// Separator between equality values in the built key.
    pub key_separator: String,
    /// Rowkey expression replacing plain concatenation.
    pub rowkey: Option<String>,
}

impl JoinConfig {
    /// Creates a config with default join type and match mode.
    #[must_use]
    pub fn new(binding: EqualityBinding, output: Vec<OutputColumn>) -> Self {
        Self {
            binding,
            output,
            ..Self::default()
        }
    }

    /// Takes join type, match mode and key layout from a table config.
    #[must_use]
    pub fn with_table_config(mut self, table: &DimTableConfig) -> Self {
        self.join_type = table.join_type;
        self.match_mode = table.match_mode;
        self.key_separator.clone_from(&table.key_separator);
        self.rowkey.clone_from(&table.rowkey);
        self
    }

    /// Sets the join type.
    #[must_use]
    pub fn join_type(mut self, join_type: LookupJoinType) -> Self {
        self.join_type = join_type;
        self
    }

    /// Sets the match mode.
    #[must_use]
    pub fn match_mode(mut self, match_mode: MatchMode) -> Self {
        self.match_mode = match_mode;
        self
    }
}

/// Receives enriched rows.
pub trait Collector {
    /// Accepts one output row.
    fn collect(&mut self, row: Row);
}

impl Collector for Vec<Row> {
    fn collect(&mut self, row: Row) {
        self.push(row);
    }
}

impl Collector for UnboundedSender<Row> {
    fn collect(&mut self, row: Row) {
        // Receiver gone means the downstream is shutting down.
        let _ = self.send(row);
    }
}

/// Per-engine record counters.
#[derive(Debug, Default)]
pub struct JoinMetrics {
    records_processed: AtomicU64,
    records_emitted: AtomicU64,
    null_key_records: AtomicU64,
    records_dropped: AtomicU64,
}

impl JoinMetrics {
    /// Stream rows processed.
    #[must_use]
    pub fn records_processed(&self) -> u64 {
        self.records_processed.load(Ordering::Relaxed)
    }

    /// Output rows emitted.
    #[must_use]
    pub fn records_emitted(&self) -> u64 {
        self.records_emitted.load(Ordering::Relaxed)
    }

    /// Stream rows with a null or missing equality value.
    #[must_use]
    pub fn null_key_records(&self) -> u64 {
        self.null_key_records.load(Ordering::Relaxed)
    }

    /// Stream rows that produced no output (inner join, no match).
    #[must_use]
    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }
}

/// Lookup join against a snapshot-cached side table.
pub struct JoinEngine {
    cache: Arc<SnapshotCache>,
    binding: EqualityBinding,
    key_builder: RowKeyBuilder,
    output: Vec<OutputColumn>,
    output_schema: RowSchema,
    // Per output column: passthrough of a time attribute.
    normalize: Vec<bool>,
    join_type: LookupJoinType,
    match_mode: MatchMode,
    metrics: JoinMetrics,
}

impl JoinEngine {
    /// Builds an engine over `cache` for rows shaped like `input_schema`.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::NotReady`] if the cache has not been loaded,
    /// [`JoinError::Layout`] if no equality field is bound or an index is
    /// outside `input_schema`, and
    /// [`JoinError::Key`] for a bad rowkey expression.
    pub fn new(
        cache: Arc<SnapshotCache>,
        input_schema: &RowSchema,
        config: JoinConfig,
    ) -> Result<Self, JoinError> {
        if !cache.is_ready() {
            return Err(JoinError::NotReady(cache.table().to_string()));
        }

        if config.binding.is_empty() {
            return Err(JoinError::Layout(format!(
                "no equality fields bound for '{}'",
                cache.table()
            )));
        }
        for field in config.binding.fields() {
            if field.stream_index >= input_schema.len() {
                return Err(JoinError::Layout(format!(
                    "equality field '{}' reads input column {} of {}",
                    field.side_field,
                    field.stream_index,
                    input_schema.len()
                )));
            }
        }

        let mut fields = Vec::with_capacity(config.output.len());
        let mut normalize = Vec::with_capacity(config.output.len());
        for column in &config.output {
            match column {
                OutputColumn::Input(idx) => {
                    let field = input_schema.field(*idx).ok_or_else(|| {
                        JoinError::Layout(format!(
                            "output reads input column {idx} of {}",
                            input_schema.len()
                        ))
                    })?;
                    normalize.push(field.field_type.is_time_indicator());
                    fields.push(Field::new(field.name.clone(), field.field_type.output_type()));
                }
                OutputColumn::Side(field) => {
                    normalize.push(false);
                    fields.push(field.clone());
                }
            }
        }

        let key_builder = match &config.rowkey {
            Some(expr) => RowKeyBuilder::parse(expr, &config.binding)?,
            None => RowKeyBuilder::with_separator(&config.binding, &config.key_separator),
        };

        tracing::debug!(
            table = cache.table(),
            join_type = %config.join_type,
            match_mode = %config.match_mode,
            equality_fields = config.binding.len(),
            "lookup join engine created"
        );

        Ok(Self {
            cache,
            binding: config.binding,
            key_builder,
            output: config.output,
            output_schema: RowSchema::new(fields),
            normalize,
            join_type: config.join_type,
            match_mode: config.match_mode,
            metrics: JoinMetrics::default(),
        })
    }

    /// Schema of the rows this engine emits.
    #[must_use]
    pub fn output_schema(&self) -> &RowSchema {
        &self.output_schema
    }

    /// Join type.
    #[must_use]
    pub fn join_type(&self) -> LookupJoinType {
        self.join_type
    }

    /// Match mode.
    #[must_use]
    pub fn match_mode(&self) -> MatchMode {
        self.match_mode
    }

    /// The cache lookups are served from.
    #[must_use]
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    /// Record counters.
    #[must_use]
    pub fn metrics(&self) -> &JoinMetrics {
        &self.metrics
    }

    /// Joins one stream row, pushing the output rows into `out`.
    ///
    /// Returns the number of rows emitted.
    pub fn process<C: Collector + ?Sized>(&self, input: &Row, out: &mut C) -> usize {
        self.metrics.records_processed.fetch_add(1, Ordering::Relaxed);

        let Some(key) = self.lookup_key(input) else {
            self.metrics.null_key_records.fetch_add(1, Ordering::Relaxed);
            return self.emit_unmatched(input, out);
        };

        let emitted = match self.match_mode {
            MatchMode::Exact => match self.cache.lookup_exact(&key) {
                Some(record) => {
                    out.collect(self.fill_data(input, Some(&*record)));
                    1
                }
                None => 0,
            },
            MatchMode::Prefix => {
                let scan = self.cache.lookup_prefix(&key);
                let mut n = 0;
                for record in scan.iter() {
                    out.collect(self.fill_data(input, Some(&**record)));
                    n += 1;
                }
                self.cache.metrics().record_prefix_matches(n as u64);
                n
            }
        };

        if emitted == 0 {
            return self.emit_unmatched(input, out);
        }
        self.metrics
            .records_emitted
            .fetch_add(emitted as u64, Ordering::Relaxed);
        emitted
    }

    /// Builds one output row from `input` and an optional matched record.
    ///
    /// Side fields are null when `record` is `None` or lacks the field.
    #[must_use]
    pub fn fill_data(&self, input: &Row, record: Option<&ReferenceRecord>) -> Row {
        let values = self
            .output
            .iter()
            .zip(&self.normalize)
            .map(|(column, &normalize)| match column {
                OutputColumn::Input(idx) => {
                    let value = input.get(*idx).cloned().unwrap_or(ScalarValue::Null);
                    if normalize {
                        value.normalize_time_indicator()
                    } else {
                        value
                    }
                }
                OutputColumn::Side(field) => record
                    .and_then(|r| r.get(&field.name))
                    .cloned()
                    .unwrap_or(ScalarValue::Null),
            })
            .collect();
        Row::new(values)
    }

    /// `None` when an equality value is null or the key cannot be built.
    fn lookup_key(&self, input: &Row) -> Option<String> {
        let mut values = Vec::with_capacity(self.binding.len());
        for field in self.binding.fields() {
            match input.get(field.stream_index) {
                Some(v) if !v.is_null() => values.push((field.side_field.as_str(), v)),
                _ => return None,
            }
        }
        match self.key_builder.build_key(values.as_slice()) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::trace!(table = self.cache.table(), error = %e, "treating row as null key");
                None
            }
        }
    }

    fn emit_unmatched<C: Collector + ?Sized>(&self, input: &Row, out: &mut C) -> usize {
        match self.join_type {
            LookupJoinType::LeftOuter => {
                out.collect(self.fill_data(input, None));
                self.metrics.records_emitted.fetch_add(1, Ordering::Relaxed);
                1
            }
            LookupJoinType::Inner => {
                self.metrics.records_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }
}

impl fmt::Debug for JoinEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinEngine")
            .field("table", &self.cache.table())
            .field("join_type", &self.join_type)
            .field("match_mode", &self.match_mode)
            .field("key_builder", &self.key_builder)
            .field("output_columns", &self.output.len())
            .finish_non_exhaustive()
    }
}
