//! Reference table loader trait and scan-scoped resource handling.
//!
//! A [`ReferenceTableLoader`] reads the whole side table once per reload
//! and streams every row into a [`SnapshotBuilder`]. It uses RPITIT
//! (Rust 1.75+) for zero-overhead async, like the other connector traits
//! in this workspace.
//!
//! Loaders must give back every external resource they acquired
//! (connections, scanners, file handles) before returning, whether the
//! scan succeeded or not. [`ResourceScope`] collects the release actions
//! of one scan and runs them in reverse acquisition order; a release that
//! fails is logged and never replaces the scan's own result.

use std::future::Future;
use std::time::Duration;

use crate::lookup::snapshot::SnapshotBuilder;

/// Errors from a full-table scan. Any of them aborts the whole reload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// Connection to the external system failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Authentication against the external system failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The scan query failed.
    #[error("query failed: {0}")]
    Query(String),

    /// A scanned value could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The reload did not finish in time.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The source is not available (e.g., table missing).
    #[error("not available: {0}")]
    NotAvailable(String),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

/// Failure while releasing a scan resource. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to release {resource}: {message}")]
pub struct ReleaseError {
    /// Resource being released (e.g. `"scanner"`, `"connection"`).
    pub resource: String,
    /// What went wrong.
    pub message: String,
}

impl ReleaseError {
    /// Creates a release error.
    pub fn new(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

/// Full-table reader for one side table.
///
/// ## Implementing
///
/// `scan_all` pushes every row of the table into `sink` using the
/// table's external column identifiers; alias mapping happens in the
/// builder. It should fail with a descriptive [`LoadError`] rather than
/// pass through opaque client errors, and must release its resources on
/// every exit path.
pub trait ReferenceTableLoader: Send + Sync {
    /// Scans the entire table into `sink`.
    fn scan_all(
        &self,
        sink: &mut SnapshotBuilder,
    ) -> impl Future<Output = Result<(), LoadError>> + Send;

    /// Source name for logging and metrics.
    fn source_name(&self) -> &str;

    /// Optional row count estimate, reported when a reload starts.
    fn estimated_row_count(&self) -> Option<u64> {
        None
    }
}

impl<L: ReferenceTableLoader> ReferenceTableLoader for std::sync::Arc<L> {
    fn scan_all(
        &self,
        sink: &mut SnapshotBuilder,
    ) -> impl Future<Output = Result<(), LoadError>> + Send {
        (**self).scan_all(sink)
    }

    fn source_name(&self) -> &str {
        (**self).source_name()
    }

    fn estimated_row_count(&self) -> Option<u64> {
        (**self).estimated_row_count()
    }
}

type ReleaseFn = Box<dyn FnOnce() -> Result<(), ReleaseError> + Send>;

/// Release actions for the resources of one scan.
///
/// Actions registered with [`defer`](Self::defer) run in reverse order on
/// [`close`](Self::close), or on drop if the scan bailed out early.
pub struct ResourceScope {
    source: String,
    pending: Vec<(String, ReleaseFn)>,
    failures: usize,
}

impl ResourceScope {
    /// Creates an empty scope for `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            pending: Vec::new(),
            failures: 0,
        }
    }

    /// Registers the release action of a freshly acquired resource.
    pub fn defer<F>(&mut self, resource: impl Into<String>, release: F)
    where
        F: FnOnce() -> Result<(), ReleaseError> + Send + 'static,
    {
        self.pending.push((resource.into(), Box::new(release)));
    }

    /// Reports the outcome of a release performed by the caller, e.g. an
    /// async teardown that cannot be expressed as a deferred closure.
    pub fn record(&mut self, result: Result<(), ReleaseError>) {
        if let Err(e) = result {
            self.failures += 1;
            tracing::warn!(
                source = %self.source,
                resource = %e.resource,
                error = %e.message,
                "resource release failed"
            );
        }
    }

    /// Number of resources still waiting to be released.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Releases everything, newest first, and returns how many releases
    /// failed over the life of the scope.
    pub fn close(mut self) -> usize {
        self.release_all();
        self.failures
    }

    fn release_all(&mut self) {
        while let Some((resource, release)) = self.pending.pop() {
            tracing::trace!(source = %self.source, %resource, "releasing");
            let result = release();
            self.record(result);
        }
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceScope")
            .field("source", &self.source)
            .field("pending", &self.pending.len())
            .field("failures", &self.failures)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn tracker() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_close_releases_in_reverse_order() {
        let order = tracker();
        let mut scope = ResourceScope::new("test");
        for name in ["connection", "table", "scanner"] {
            let order = Arc::clone(&order);
            scope.defer(name, move || {
                order.lock().unwrap().push(name);
                Ok(())
            });
        }
        assert_eq!(scope.pending(), 3);
        assert_eq!(scope.close(), 0);
        assert_eq!(*order.lock().unwrap(), vec!["scanner", "table", "connection"]);
    }

    #[test]
    fn test_failed_release_is_counted_and_others_still_run() {
        let order = tracker();
        let mut scope = ResourceScope::new("test");
        {
            let order = Arc::clone(&order);
            scope.defer("connection", move || {
                order.lock().unwrap().push("connection");
                Ok(())
            });
        }
        scope.defer("scanner", || Err(ReleaseError::new("scanner", "socket closed")));
        assert_eq!(scope.close(), 1);
        assert_eq!(*order.lock().unwrap(), vec!["connection"]);
    }

    #[test]
    fn test_drop_releases_on_early_exit() {
        let order = tracker();
        {
            let mut scope = ResourceScope::new("test");
            let order = Arc::clone(&order);
            scope.defer("connection", move || {
                order.lock().unwrap().push("connection");
                Ok(())
            });
            // Scope dropped without close(), as on a `?` early return.
        }
        assert_eq!(*order.lock().unwrap(), vec!["connection"]);
    }

    #[test]
    fn test_record_counts_external_failures() {
        let mut scope = ResourceScope::new("test");
        scope.record(Ok(()));
        scope.record(Err(ReleaseError::new("connection task", "panicked")));
        assert_eq!(scope.close(), 1);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            LoadError::Connection("refused".into()).to_string(),
            "connection failed: refused"
        );
        assert_eq!(
            ReleaseError::new("scanner", "io").to_string(),
            "failed to release scanner: io"
        );
    }
}
