//! In-memory reference table (the `static` connector).
//!
//! Rows are supplied in code and can be replaced between reloads. Queued
//! failures make the next scans fail, which is how reload resilience is
//! exercised without an external system.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use dimjoin_core::lookup::{LoadError, ReferenceTableLoader, ScalarValue, SnapshotBuilder};

/// One scanned row: row key plus `(column identifier, value)` cells.
pub type StaticRow = (String, Vec<(String, ScalarValue)>);

/// A [`ReferenceTableLoader`] over rows held in memory.
#[derive(Debug)]
pub struct StaticTableLoader {
    name: String,
    rows: RwLock<Vec<StaticRow>>,
    failures: Mutex<VecDeque<LoadError>>,
    scans: AtomicU64,
}

impl StaticTableLoader {
    /// Creates an empty table called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            scans: AtomicU64::new(0),
        }
    }

    /// Adds a row, builder style.
    #[must_use]
    pub fn with_row<K, I, C>(self, key: K, cells: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (C, ScalarValue)>,
        C: Into<String>,
    {
        self.push_row(key, cells);
        self
    }

    /// Adds a row seen by the next scans.
    pub fn push_row<K, I, C>(&self, key: K, cells: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (C, ScalarValue)>,
        C: Into<String>,
    {
        let cells = cells.into_iter().map(|(c, v)| (c.into(), v)).collect();
        self.rows.write().push((key.into(), cells));
    }

    /// Replaces the whole table for the next scans.
    pub fn replace_rows(&self, rows: Vec<StaticRow>) {
        *self.rows.write() = rows;
    }

    /// Makes the next scan fail with `error`. Queued failures are
    /// consumed one per scan, in order.
    pub fn fail_next(&self, error: LoadError) {
        self.failures.lock().push_back(error);
    }

    /// Number of scans started so far.
    #[must_use]
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }
}

impl ReferenceTableLoader for StaticTableLoader {
    async fn scan_all(&self, sink: &mut SnapshotBuilder) -> Result<(), LoadError> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        if let Some(e) = self.failures.lock().pop_front() {
            return Err(e);
        }

        let rows = self.rows.read();
        for (key, cells) in rows.iter() {
            sink.push_row(key.clone(), cells.iter().cloned());
        }
        Ok(())
    }

    fn source_name(&self) -> &str {
        &self.name
    }

    fn estimated_row_count(&self) -> Option<u64> {
        Some(self.rows.read().len() as u64)
    }
}
