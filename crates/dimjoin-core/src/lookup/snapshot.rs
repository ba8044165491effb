//! Immutable side-table snapshots behind an atomically swapped pointer.
//!
//! A [`Snapshot`] is one complete in-memory copy of the side table. It is
//! assembled privately in a [`SnapshotBuilder`] and becomes visible only
//! when the refresher publishes it into the [`SnapshotCache`], which swaps
//! a single [`ArcSwap`] pointer. Readers load the pointer once per lookup
//! and keep the `Arc` for as long as they need it, so a reload never
//! changes a snapshot under a reader and never exposes a partial one.
//!
//! ```text
//!  refresher                       workers
//!  ─────────                       ───────
//!  SnapshotBuilder (private)       cache.current_snapshot() ─┐
//!    push_row() × N                                          │ Arc<Snapshot v3>
//!  cache.publish(builder) ──▶ ArcSwap ──▶ v4                 │ (still valid)
//!                                          ▲                 ▼
//!                                          └── next lookup sees v4
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::lookup::alias::InverseAliasMap;
use crate::lookup::value::ScalarValue;

/// One row of the side table, keyed by logical field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceRecord {
    fields: FxHashMap<String, ScalarValue>,
}

impl ReferenceRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `field`, if the row has it.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&ScalarValue> {
        self.fields.get(field)
    }

    /// Sets `field` to `value`.
    pub fn insert(&mut self, field: impl Into<String>, value: ScalarValue) {
        self.fields.insert(field.into(), value);
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates `(field, value)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, ScalarValue)> for ReferenceRecord {
    fn from_iter<I: IntoIterator<Item = (K, ScalarValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// A complete, immutable copy of the side table.
#[derive(Debug, Default)]
pub struct Snapshot {
    version: u64,
    loaded_at: Option<SystemTime>,
    rows: IndexMap<String, Arc<ReferenceRecord>>,
}

impl Snapshot {
    /// Publication number. `0` is the empty snapshot present at startup.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// When the rows were loaded. `None` for the startup snapshot.
    #[must_use]
    pub fn loaded_at(&self) -> Option<SystemTime> {
        self.loaded_at
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the snapshot holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Exact-key lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Arc<ReferenceRecord>> {
        self.rows.get(key)
    }

    /// Rows whose key starts with `prefix`, in load order.
    ///
    /// Walks every key of the snapshot.
    pub fn prefix_iter<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Arc<ReferenceRecord>)> + 'a {
        self.rows
            .iter()
            .filter(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// All rows in load order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<ReferenceRecord>)> {
        self.rows.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Private buffer a reload fills before publication.
///
/// Loaders push raw rows with external column identifiers; the builder
/// maps every identifier through the [`InverseAliasMap`]. A row key seen
/// twice keeps the last row scanned.
#[derive(Debug)]
pub struct SnapshotBuilder {
    inverse: Arc<InverseAliasMap>,
    rows: IndexMap<String, Arc<ReferenceRecord>>,
    unmapped_columns: u64,
    overwritten_rows: u64,
}

impl SnapshotBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(inverse: Arc<InverseAliasMap>) -> Self {
        Self {
            inverse,
            rows: IndexMap::new(),
            unmapped_columns: 0,
            overwritten_rows: 0,
        }
    }

    /// Adds one scanned row.
    ///
    /// Columns without a logical name are skipped.
    pub fn push_row<K, I, C>(&mut self, key: K, columns: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (C, ScalarValue)>,
        C: AsRef<str>,
    {
        let mut record = ReferenceRecord::new();
        for (column, value) in columns {
            let column = column.as_ref();
            match self.inverse.resolve(column) {
                Some(name) => record.insert(name, value),
                None => {
                    self.unmapped_columns += 1;
                    tracing::trace!(column, "skipping column without alias");
                }
            }
        }
        self.push_record(key, record);
    }

    /// Adds a row whose fields already carry logical names.
    pub fn push_record(&mut self, key: impl Into<String>, record: ReferenceRecord) {
        if self.rows.insert(key.into(), Arc::new(record)).is_some() {
            self.overwritten_rows += 1;
        }
    }

    /// Rows buffered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cells dropped because their column had no alias.
    #[must_use]
    pub fn unmapped_columns(&self) -> u64 {
        self.unmapped_columns
    }

    /// Rows replaced by a later row with the same key.
    #[must_use]
    pub fn overwritten_rows(&self) -> u64 {
        self.overwritten_rows
    }

    fn finish(self, version: u64) -> Snapshot {
        Snapshot {
            version,
            loaded_at: Some(SystemTime::now()),
            rows: self.rows,
        }
    }
}

/// Lookup counters for a [`SnapshotCache`].
#[derive(Debug, Default)]
pub struct CacheMetrics {
    exact_hits: AtomicU64,
    exact_misses: AtomicU64,
    prefix_scans: AtomicU64,
    prefix_matches: AtomicU64,
    publications: AtomicU64,
    reloads_succeeded: AtomicU64,
    reloads_failed: AtomicU64,
}

impl CacheMetrics {
    /// Exact lookups that found a row.
    #[must_use]
    pub fn exact_hits(&self) -> u64 {
        self.exact_hits.load(Ordering::Relaxed)
    }

    /// Exact lookups that found nothing.
    #[must_use]
    pub fn exact_misses(&self) -> u64 {
        self.exact_misses.load(Ordering::Relaxed)
    }

    /// Prefix scans started.
    #[must_use]
    pub fn prefix_scans(&self) -> u64 {
        self.prefix_scans.load(Ordering::Relaxed)
    }

    /// Rows produced by prefix scans, as counted by their consumers.
    #[must_use]
    pub fn prefix_matches(&self) -> u64 {
        self.prefix_matches.load(Ordering::Relaxed)
    }

    /// Snapshots published.
    #[must_use]
    pub fn publications(&self) -> u64 {
        self.publications.load(Ordering::Relaxed)
    }

    /// Reloads that ended in a publication.
    #[must_use]
    pub fn reloads_succeeded(&self) -> u64 {
        self.reloads_succeeded.load(Ordering::Relaxed)
    }

    /// Reloads that failed and left the previous snapshot in place.
    #[must_use]
    pub fn reloads_failed(&self) -> u64 {
        self.reloads_failed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_prefix_matches(&self, n: u64) {
        self.prefix_matches.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_reload(&self, success: bool) {
        if success {
            self.reloads_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reloads_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Exact-lookup hit ratio (0.0 – 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.exact_hits();
        let total = hits + self.exact_misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Lazy, restartable view of the rows matching a key prefix.
///
/// Holds the snapshot that was current when the scan was requested; a
/// concurrent reload does not affect it.
#[derive(Debug, Clone)]
pub struct PrefixScan {
    snapshot: Arc<Snapshot>,
    prefix: String,
}

impl PrefixScan {
    /// Iterates the matching records. Each call starts over.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ReferenceRecord>> + '_ {
        self.snapshot.prefix_iter(&self.prefix).map(|(_, r)| r)
    }

    /// Iterates `(key, record)` pairs of the matching rows.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Arc<ReferenceRecord>)> + '_ {
        self.snapshot.prefix_iter(&self.prefix)
    }

    /// The prefix being matched.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The snapshot being scanned.
    #[must_use]
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }
}

/// Shared handle to the current side-table snapshot.
///
/// Reads are a single atomic pointer load and never wait on a reload.
/// Only [`CacheRefresher`](crate::lookup::refresh::CacheRefresher)
/// publishes.
pub struct SnapshotCache {
    table: String,
    current: ArcSwap<Snapshot>,
    next_version: AtomicU64,
    metrics: CacheMetrics,
}

impl SnapshotCache {
    /// Creates a cache holding the empty startup snapshot.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            current: ArcSwap::from_pointee(Snapshot::default()),
            next_version: AtomicU64::new(1),
            metrics: CacheMetrics::default(),
        }
    }

    /// Side table this cache mirrors.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether a loaded snapshot has been published.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.current.load().version > 0
    }

    /// The snapshot in effect right now.
    #[must_use]
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Exact-key lookup against the current snapshot.
    #[must_use]
    pub fn lookup_exact(&self, key: &str) -> Option<Arc<ReferenceRecord>> {
        let found = self.current.load().get(key).cloned();
        if found.is_some() {
            self.metrics.exact_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.exact_misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Prefix lookup against the current snapshot.
    #[must_use]
    pub fn lookup_prefix(&self, prefix: &str) -> PrefixScan {
        self.metrics.prefix_scans.fetch_add(1, Ordering::Relaxed);
        PrefixScan {
            snapshot: self.current.load_full(),
            prefix: prefix.to_string(),
        }
    }

    /// Lookup counters.
    #[must_use]
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Seals `builder` and makes it the current snapshot.
    pub(crate) fn publish(&self, builder: SnapshotBuilder) -> Arc<Snapshot> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let snapshot = Arc::new(builder.finish(version));
        self.current.store(Arc::clone(&snapshot));
        self.metrics.publications.fetch_add(1, Ordering::Relaxed);
        snapshot
    }
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.current.load();
        f.debug_struct("SnapshotCache")
            .field("table", &self.table)
            .field("version", &snap.version)
            .field("rows", &snap.len())
            .field("hits", &self.metrics.exact_hits())
            .field("misses", &self.metrics.exact_misses())
            .finish()
    }
}
