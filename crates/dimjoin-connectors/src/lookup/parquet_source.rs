//! Parquet file reference table.
//!
//! Every reload re-reads the whole file. The row key is built from the
//! configured key columns, joined with the key separator, and every column
//! of the file becomes a cell whose identifier is the column name.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dimjoin_connectors::lookup::parquet_source::{ParquetTableLoader, ParquetTableLoaderConfig};
//!
//! let loader = ParquetTableLoader::new(ParquetTableLoaderConfig {
//!     path: "/data/customers.parquet".into(),
//!     key_columns: vec!["customer_id".into()],
//!     ..Default::default()
//! });
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow_array::cast::AsArray;
use arrow_array::types::{
    Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow_array::{Array, RecordBatch};
use arrow_cast::display::{ArrayFormatter, FormatOptions};
use arrow_schema::{DataType, TimeUnit};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use dimjoin_core::lookup::{
    ConfigError, DimTableConfig, LoadError, ReferenceTableLoader, ScalarValue, SnapshotBuilder,
};

use super::static_source::StaticRow;

/// Configuration for [`ParquetTableLoader`].
#[derive(Debug, Clone)]
pub struct ParquetTableLoaderConfig {
    /// Path to the Parquet file (local filesystem).
    pub path: String,
    /// Columns that form the row key, in key order.
    pub key_columns: Vec<String>,
    /// Separator between key column values.
    pub key_separator: String,
    /// Batch size for reading the Parquet file (default: 8192).
    pub batch_size: usize,
}

impl Default for ParquetTableLoaderConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            key_columns: Vec::new(),
            key_separator: String::new(),
            batch_size: 8192,
        }
    }
}

impl ParquetTableLoaderConfig {
    /// Reads `path`, `key.columns` (comma separated) and `batch.size` from
    /// the table options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `path` or `key.columns` is missing or
    /// `batch.size` is not a positive integer.
    pub fn from_table_config(table: &DimTableConfig) -> Result<Self, ConfigError> {
        let path = table.require_option("path")?.to_string();
        let key_columns: Vec<String> = table
            .require_option("key.columns")?
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if key_columns.is_empty() {
            return Err(ConfigError::Missing("key.columns".into()));
        }
        let batch_size = match table.option("batch.size") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    key: "batch.size".into(),
                    value: raw.to_string(),
                    reason: "expected a positive integer".into(),
                })?,
            None => Self::default().batch_size,
        };
        Ok(Self {
            path,
            key_columns,
            key_separator: table.key_separator.clone(),
            batch_size,
        })
    }
}

/// A [`ReferenceTableLoader`] that reads a Parquet file.
pub struct ParquetTableLoader {
    config: ParquetTableLoaderConfig,
    /// Rows read by the last successful scan.
    last_row_count: AtomicU64,
}

impl fmt::Debug for ParquetTableLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParquetTableLoader")
            .field("config", &self.config)
            .field("last_row_count", &self.last_row_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl ParquetTableLoader {
    /// Creates a loader. The file is not opened until the first scan.
    #[must_use]
    pub fn new(config: ParquetTableLoaderConfig) -> Self {
        Self {
            config,
            last_row_count: AtomicU64::new(0),
        }
    }

    /// The loader configuration.
    #[must_use]
    pub fn config(&self) -> &ParquetTableLoaderConfig {
        &self.config
    }
}

impl ReferenceTableLoader for ParquetTableLoader {
    async fn scan_all(&self, sink: &mut SnapshotBuilder) -> Result<(), LoadError> {
        let config = self.config.clone();
        let rows = tokio::task::spawn_blocking(move || read_file(&config))
            .await
            .map_err(|e| LoadError::Internal(format!("parquet read task: {e}")))??;

        self.last_row_count
            .store(rows.len() as u64, Ordering::Relaxed);
        for (key, cells) in rows {
            sink.push_row(key, cells);
        }
        Ok(())
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn source_name(&self) -> &str {
        "parquet"
    }

    fn estimated_row_count(&self) -> Option<u64> {
        match self.last_row_count.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }
}

/// Reads every row of the file. The file handle is closed when the reader
/// goes out of scope, on success and on error alike.
fn read_file(config: &ParquetTableLoaderConfig) -> Result<Vec<StaticRow>, LoadError> {
    let file = std::fs::File::open(&config.path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LoadError::NotAvailable(format!("{}: {e}", config.path)),
        _ => LoadError::Connection(format!("open {}: {e}", config.path)),
    })?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| LoadError::Decode(format!("parquet reader: {e}")))?;
    let schema = builder.schema().clone();

    let key_indices: Vec<usize> = config
        .key_columns
        .iter()
        .map(|name| {
            schema
                .index_of(name)
                .map_err(|_| LoadError::Query(format!("key column not found: {name}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let column_names: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();

    let reader = builder
        .with_batch_size(config.batch_size)
        .build()
        .map_err(|e| LoadError::Decode(format!("build reader: {e}")))?;

    let mut rows = Vec::new();
    let mut null_keys = 0u64;
    for batch_result in reader {
        let batch = batch_result.map_err(|e| LoadError::Decode(format!("read batch: {e}")))?;
        for row in 0..batch.num_rows() {
            let Some(key) = row_key(&batch, &key_indices, &config.key_separator, row)? else {
                null_keys += 1;
                continue;
            };
            let cells = batch
                .columns()
                .iter()
                .zip(&column_names)
                .map(|(col, name)| Ok((name.clone(), to_scalar(col.as_ref(), row)?)))
                .collect::<Result<Vec<(String, ScalarValue)>, LoadError>>()?;
            rows.push((key, cells));
        }
    }

    if null_keys > 0 {
        tracing::warn!(path = %config.path, null_keys, "skipped rows with a null key column");
    }
    Ok(rows)
}

/// Key of `row`, built from the key column values the same way stream
/// lookup keys are, or `None` if any key column is null.
fn row_key(
    batch: &RecordBatch,
    key_indices: &[usize],
    separator: &str,
    row: usize,
) -> Result<Option<String>, LoadError> {
    let mut key = String::new();
    for (i, &col_idx) in key_indices.iter().enumerate() {
        let value = to_scalar(batch.column(col_idx).as_ref(), row)?;
        if value.is_null() {
            return Ok(None);
        }
        if i > 0 {
            key.push_str(separator);
        }
        value.write_key(&mut key);
    }
    Ok(Some(key))
}

/// Converts one Arrow cell. Types without a direct counterpart use the
/// Arrow display form.
fn to_scalar(col: &dyn Array, row: usize) -> Result<ScalarValue, LoadError> {
    if col.is_null(row) {
        return Ok(ScalarValue::Null);
    }
    let value = match col.data_type() {
        DataType::Boolean => ScalarValue::Bool(col.as_boolean().value(row)),
        DataType::Int8 => ScalarValue::Int64(col.as_primitive::<Int8Type>().value(row).into()),
        DataType::Int16 => ScalarValue::Int64(col.as_primitive::<Int16Type>().value(row).into()),
        DataType::Int32 => ScalarValue::Int64(col.as_primitive::<Int32Type>().value(row).into()),
        DataType::Int64 => ScalarValue::Int64(col.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => ScalarValue::Int64(col.as_primitive::<UInt8Type>().value(row).into()),
        DataType::UInt16 => ScalarValue::Int64(col.as_primitive::<UInt16Type>().value(row).into()),
        DataType::UInt32 => ScalarValue::Int64(col.as_primitive::<UInt32Type>().value(row).into()),
        DataType::UInt64 => {
            let v = col.as_primitive::<UInt64Type>().value(row);
            i64::try_from(v).map_or_else(|_| ScalarValue::Utf8(v.to_string()), ScalarValue::Int64)
        }
        DataType::Float32 => {
            ScalarValue::Float64(col.as_primitive::<Float32Type>().value(row).into())
        }
        DataType::Float64 => ScalarValue::Float64(col.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => ScalarValue::Utf8(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => ScalarValue::Utf8(col.as_string::<i64>().value(row).to_string()),
        DataType::Binary => ScalarValue::Binary(col.as_binary::<i32>().value(row).to_vec()),
        DataType::LargeBinary => ScalarValue::Binary(col.as_binary::<i64>().value(row).to_vec()),
        DataType::Timestamp(unit, _) => ScalarValue::Timestamp(match unit {
            TimeUnit::Second => col
                .as_primitive::<TimestampSecondType>()
                .value(row)
                .saturating_mul(1_000_000),
            TimeUnit::Millisecond => col
                .as_primitive::<TimestampMillisecondType>()
                .value(row)
                .saturating_mul(1_000),
            TimeUnit::Microsecond => col.as_primitive::<TimestampMicrosecondType>().value(row),
            TimeUnit::Nanosecond => col.as_primitive::<TimestampNanosecondType>().value(row) / 1_000,
        }),
        _ => {
            let formatter = ArrayFormatter::try_new(col, &FormatOptions::default())
                .map_err(|e| LoadError::Decode(format!("format value: {e}")))?;
            ScalarValue::Utf8(formatter.value(row).to_string())
        }
    };
    Ok(value)
}
