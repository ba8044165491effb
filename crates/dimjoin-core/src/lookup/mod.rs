//! # Lookup Module
//!
//! Full-snapshot side-table cache and the lookup join built on it.
//!
//! ## Module Overview
//!
//! - [`key`]: equality bindings and lookup key construction
//! - [`snapshot`]: immutable snapshots and the atomically swapped cache
//! - [`source`]: `ReferenceTableLoader` trait and scan resource scoping
//! - [`refresh`]: initial and scheduled reloads
//! - [`join`]: `JoinEngine`, join type and match mode

/// Column identifier ↔ logical name mapping.
pub mod alias;
/// Side-table configuration.
pub mod config;
pub mod join;
pub mod key;
pub mod refresh;
/// Positional stream rows.
pub mod row;
pub mod snapshot;
pub mod source;
/// Scalar values shared by rows and snapshots.
pub mod value;

// Re-export commonly used types
pub use alias::{qualified_column, AliasMap, InverseAliasMap};
pub use config::{ConfigError, ConnectorType, DimTableConfig, ReloadPolicy};
pub use join::{
    Collector, JoinConfig, JoinEngine, JoinError, JoinMetrics, LookupJoinType, MatchMode,
    OutputColumn,
};
pub use key::{EqualityBinding, EqualityField, KeyError, KeyValues, RowKeyBuilder};
pub use refresh::{CacheRefresher, RefresherHandle, ReloadStats};
pub use row::{Field, FieldType, Row, RowSchema};
pub use snapshot::{
    CacheMetrics, PrefixScan, ReferenceRecord, Snapshot, SnapshotBuilder, SnapshotCache,
};
pub use source::{LoadError, ReferenceTableLoader, ReleaseError, ResourceScope};
pub use value::ScalarValue;
