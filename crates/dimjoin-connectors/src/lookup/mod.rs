//! Reference table loaders.
//!
//! Each loader implements
//! [`ReferenceTableLoader`](dimjoin_core::lookup::ReferenceTableLoader).
//! [`TableLoader`] picks one from a table's [`ConnectorType`].

use dimjoin_core::lookup::{
    ConfigError, ConnectorType, DimTableConfig, LoadError, ReferenceTableLoader, SnapshotBuilder,
};

/// Parquet file loader.
#[cfg(feature = "parquet")]
pub mod parquet_source;
/// `PostgreSQL` table loader.
#[cfg(feature = "postgres")]
pub mod postgres_source;
/// In-memory loader.
pub mod static_source;

#[cfg(feature = "parquet")]
pub use parquet_source::{ParquetTableLoader, ParquetTableLoaderConfig};
#[cfg(feature = "postgres")]
pub use postgres_source::{PostgresTableLoader, PostgresTableLoaderConfig};
pub use static_source::{StaticRow, StaticTableLoader};

/// Any built-in loader, selected by connector type.
#[derive(Debug)]
pub enum TableLoader {
    /// In-memory rows.
    Static(StaticTableLoader),
    /// Parquet file.
    #[cfg(feature = "parquet")]
    Parquet(ParquetTableLoader),
    /// `PostgreSQL` table.
    #[cfg(feature = "postgres")]
    Postgres(PostgresTableLoader),
}

impl TableLoader {
    /// Builds the loader named by `table.connector`.
    ///
    /// A `static` table starts empty; fill it through
    /// [`StaticTableLoader::push_row`] before the refresher starts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for missing connector options, an invalid
    /// connection string, or a connector that is unknown or not compiled in.
    pub fn from_config(table: &DimTableConfig) -> Result<Self, ConfigError> {
        match &table.connector {
            ConnectorType::Static => Ok(Self::Static(StaticTableLoader::new(table.table.clone()))),
            #[cfg(feature = "parquet")]
            ConnectorType::Parquet => Ok(Self::Parquet(ParquetTableLoader::new(
                ParquetTableLoaderConfig::from_table_config(table)?,
            ))),
            #[cfg(feature = "postgres")]
            ConnectorType::Postgres => {
                let config = PostgresTableLoaderConfig::from_table_config(table)?;
                PostgresTableLoader::new(config)
                    .map(Self::Postgres)
                    .map_err(|e| ConfigError::Invalid {
                        key: "connection".into(),
                        value: String::new(),
                        reason: e.to_string(),
                    })
            }
            other => Err(ConfigError::Invalid {
                key: "connector".into(),
                value: other.to_string(),
                reason: "connector not available in this build".into(),
            }),
        }
    }
}

impl ReferenceTableLoader for TableLoader {
    async fn scan_all(&self, sink: &mut SnapshotBuilder) -> Result<(), LoadError> {
        match self {
            Self::Static(l) => l.scan_all(sink).await,
            #[cfg(feature = "parquet")]
            Self::Parquet(l) => l.scan_all(sink).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(l) => l.scan_all(sink).await,
        }
    }

    fn source_name(&self) -> &str {
        match self {
            Self::Static(l) => l.source_name(),
            #[cfg(feature = "parquet")]
            Self::Parquet(l) => l.source_name(),
            #[cfg(feature = "postgres")]
            Self::Postgres(l) => l.source_name(),
        }
    }

    fn estimated_row_count(&self) -> Option<u64> {
        match self {
            Self::Static(l) => l.estimated_row_count(),
            #[cfg(feature = "parquet")]
            Self::Parquet(l) => l.estimated_row_count(),
            #[cfg(feature = "postgres")]
            Self::Postgres(l) => l.estimated_row_count(),
        }
    }
}
