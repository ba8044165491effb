//! Snapshot reload orchestration.
//!
//! A [`CacheRefresher`] owns the write side of a [`SnapshotCache`]. Every
//! reload scans the whole side table into a private [`SnapshotBuilder`]
//! and publishes it with one pointer swap; a failed reload publishes
//! nothing.
//!
//! [`CacheRefresher::start`] performs the initial load before returning,
//! so no lookup can run against the empty startup snapshot. With
//! [`ReloadPolicy::Every`] it then spawns a background task:
//!
//! ```text
//! start() ──▶ reload() ──Err──▶ startup fails
//!                │ Ok
//!                ▼
//!        spawn refresh task ──▶ loop { tick ─▶ reload() ─Err─▶ warn, keep previous }
//!                                     ▲
//!                  cancel token ──────┘ break
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::lookup::alias::{AliasMap, InverseAliasMap};
use crate::lookup::config::{ConfigError, DimTableConfig, ReloadPolicy};
use crate::lookup::snapshot::{SnapshotBuilder, SnapshotCache};
use crate::lookup::source::{LoadError, ReferenceTableLoader};

/// Outcome of a successful reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadStats {
    /// Version of the published snapshot.
    pub version: u64,
    /// Rows in the published snapshot.
    pub rows: usize,
    /// Cells dropped for lack of an alias.
    pub unmapped_columns: u64,
    /// Rows replaced by a later row with the same key.
    pub overwritten_rows: u64,
    /// Wall time of the scan and publication.
    pub elapsed: Duration,
}

/// Reloads one side table into its [`SnapshotCache`].
pub struct CacheRefresher<L> {
    loader: Arc<L>,
    cache: Arc<SnapshotCache>,
    inverse: Arc<InverseAliasMap>,
    policy: ReloadPolicy,
    timeout: Option<Duration>,
    // Serializes scheduled and on-demand reloads.
    in_flight: Mutex<()>,
}

impl<L: ReferenceTableLoader> CacheRefresher<L> {
    /// Creates a refresher publishing into `cache`.
    pub fn new(
        loader: L,
        cache: Arc<SnapshotCache>,
        aliases: &AliasMap,
        policy: ReloadPolicy,
    ) -> Self {
        Self {
            loader: Arc::new(loader),
            cache,
            inverse: Arc::new(aliases.inverse()),
            policy,
            timeout: None,
            in_flight: Mutex::new(()),
        }
    }

    /// Creates a refresher and a fresh cache from a table configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configured aliases are ambiguous.
    pub fn from_config(loader: L, config: &DimTableConfig) -> Result<Self, ConfigError> {
        let aliases = config.alias_map()?;
        let cache = Arc::new(SnapshotCache::new(config.table.clone()));
        let refresher = Self::new(loader, cache, &aliases, config.reload);
        Ok(match config.reload_timeout {
            Some(timeout) => refresher.with_timeout(timeout),
            None => refresher,
        })
    }

    /// Aborts any reload that runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The cache this refresher publishes into.
    #[must_use]
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    /// The reload schedule.
    #[must_use]
    pub fn policy(&self) -> ReloadPolicy {
        self.policy
    }

    /// Scans the whole side table and publishes it.
    ///
    /// On failure nothing is published and the previous snapshot stays
    /// current.
    ///
    /// # Errors
    ///
    /// Returns the loader's [`LoadError`], or [`LoadError::Timeout`] if
    /// the configured timeout elapsed first.
    pub async fn reload(&self) -> Result<ReloadStats, LoadError> {
        let _guard = self.in_flight.lock().await;
        let table = self.cache.table();
        let source = self.loader.source_name();
        let started = Instant::now();
        tracing::debug!(
            table,
            source,
            estimated_rows = self.loader.estimated_row_count(),
            "reloading side table"
        );

        let mut builder = SnapshotBuilder::new(Arc::clone(&self.inverse));
        let scan = self.loader.scan_all(&mut builder);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, scan)
                .await
                .unwrap_or(Err(LoadError::Timeout(limit))),
            None => scan.await,
        };

        if let Err(e) = result {
            self.cache.metrics().record_reload(false);
            return Err(e);
        }

        let unmapped_columns = builder.unmapped_columns();
        let overwritten_rows = builder.overwritten_rows();
        let snapshot = self.cache.publish(builder);
        self.cache.metrics().record_reload(true);

        let stats = ReloadStats {
            version: snapshot.version(),
            rows: snapshot.len(),
            unmapped_columns,
            overwritten_rows,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            table,
            source,
            rows = stats.rows,
            version = stats.version,
            unmapped_columns,
            overwritten_rows,
            elapsed_ms = u64::try_from(stats.elapsed.as_millis()).unwrap_or(u64::MAX),
            "snapshot published"
        );
        Ok(stats)
    }
}

impl<L: ReferenceTableLoader + 'static> CacheRefresher<L> {
    /// Performs the initial load and starts the reload schedule.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the initial load's [`LoadError`]; no task is spawned then.
    pub async fn start(self) -> Result<RefresherHandle<L>, LoadError> {
        let refresher = Arc::new(self);
        if let Err(e) = refresher.reload().await {
            tracing::error!(
                table = refresher.cache.table(),
                error = %e,
                "initial side table load failed"
            );
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let task = match refresher.policy {
            ReloadPolicy::Once => None,
            ReloadPolicy::Every(period) => Some(tokio::spawn(run_schedule(
                Arc::clone(&refresher),
                period,
                cancel.clone(),
            ))),
        };

        Ok(RefresherHandle {
            refresher,
            cancel,
            task,
        })
    }
}

async fn run_schedule<L: ReferenceTableLoader>(
    refresher: Arc<CacheRefresher<L>>,
    period: Duration,
    cancel: CancellationToken,
) {
    // The initial load already happened; first tick is one period out.
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = refresher.reload().await {
                    tracing::warn!(
                        table = refresher.cache.table(),
                        error = %e,
                        "scheduled reload failed, keeping previous snapshot"
                    );
                }
            }
        }
    }
    tracing::debug!(table = refresher.cache.table(), "refresh task stopped");
}

/// Handle to a started refresher.
///
/// Dropping the handle cancels the schedule without waiting for it.
pub struct RefresherHandle<L> {
    refresher: Arc<CacheRefresher<L>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<L: ReferenceTableLoader + 'static> RefresherHandle<L> {
    /// The cache kept current by this refresher.
    #[must_use]
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        self.refresher.cache()
    }

    /// Whether a background schedule is running.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Reloads immediately, outside the schedule.
    ///
    /// # Errors
    ///
    /// Returns the reload's [`LoadError`]; the previous snapshot is kept.
    pub async fn reload_now(&self) -> Result<ReloadStats, LoadError> {
        self.refresher.reload().await
    }

    /// Stops the schedule and waits for an in-flight reload to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(
                    table = self.refresher.cache.table(),
                    error = %e,
                    "refresh task ended abnormally"
                );
            }
        }
    }
}

impl<L> Drop for RefresherHandle<L> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<L> std::fmt::Debug for CacheRefresher<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRefresher")
            .field("table", &self.cache.table())
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<L> std::fmt::Debug for RefresherHandle<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefresherHandle")
            .field("refresher", &self.refresher)
            .field("scheduled", &self.task.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::value::ScalarValue;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Emits one row whose `gen` field is the scan count; can be told to fail.
    #[derive(Default)]
    struct CountingLoader {
        scans: AtomicU64,
        fail: AtomicBool,
        stall: bool,
    }

    impl ReferenceTableLoader for CountingLoader {
        async fn scan_all(&self, sink: &mut SnapshotBuilder) -> Result<(), LoadError> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let generation = self.scans.fetch_add(1, Ordering::SeqCst) + 1;
            let generation = i64::try_from(generation).unwrap();
            sink.push_row("k", [("gen", ScalarValue::Int64(generation))]);
            if self.fail.load(Ordering::SeqCst) {
                return Err(LoadError::Connection("refused".into()));
            }
            Ok(())
        }

        fn source_name(&self) -> &str {
            "counting"
        }
    }

    fn refresher(loader: CountingLoader, policy: ReloadPolicy) -> CacheRefresher<CountingLoader> {
        CacheRefresher::new(
            loader,
            Arc::new(SnapshotCache::new("dim")),
            &AliasMap::identity(),
            policy,
        )
    }

    fn generation(cache: &SnapshotCache) -> Option<ScalarValue> {
        cache.lookup_exact("k").and_then(|r| r.get("gen").cloned())
    }

    #[tokio::test]
    async fn test_reload_publishes_snapshot() {
        let r = refresher(CountingLoader::default(), ReloadPolicy::Once);
        let stats = r.reload().await.unwrap();
        assert_eq!(stats.version, 1);
        assert_eq!(stats.rows, 1);
        assert_eq!(generation(r.cache()), Some(ScalarValue::Int64(1)));
        assert_eq!(r.cache().metrics().reloads_succeeded(), 1);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_snapshot() {
        let r = refresher(CountingLoader::default(), ReloadPolicy::Once);
        r.reload().await.unwrap();
        let before = r.cache().current_snapshot();

        r.loader.fail.store(true, Ordering::SeqCst);
        let err = r.reload().await.unwrap_err();
        assert_eq!(err, LoadError::Connection("refused".into()));

        let after = r.cache().current_snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(generation(r.cache()), Some(ScalarValue::Int64(1)));
        assert_eq!(r.cache().metrics().reloads_failed(), 1);
    }

    #[tokio::test]
    async fn test_initial_failure_propagates() {
        let loader = CountingLoader::default();
        loader.fail.store(true, Ordering::SeqCst);
        let r = refresher(loader, ReloadPolicy::Every(Duration::from_secs(1)));
        let cache = Arc::clone(r.cache());

        let err = r.start().await.unwrap_err();
        assert!(matches!(err, LoadError::Connection(_)));
        assert!(!cache.is_ready());
    }

    #[tokio::test]
    async fn test_once_policy_spawns_nothing() {
        let handle = refresher(CountingLoader::default(), ReloadPolicy::Once)
            .start()
            .await
            .unwrap();
        assert!(handle.cache().is_ready());
        assert!(!handle.is_scheduled());

        let stats = handle.reload_now().await.unwrap();
        assert_eq!(stats.version, 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_reloads_and_survives_failures() {
        let handle = refresher(
            CountingLoader::default(),
            ReloadPolicy::Every(Duration::from_secs(10)),
        )
        .start()
        .await
        .unwrap();
        assert!(handle.is_scheduled());

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(handle.cache().current_snapshot().version(), 2);

        handle.refresher.loader.fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.cache().current_snapshot().version(), 2);
        assert_eq!(handle.cache().metrics().reloads_failed(), 1);
        assert!(handle.is_scheduled());

        handle.refresher.loader.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.cache().current_snapshot().version(), 3);
        assert_eq!(generation(handle.cache()), Some(ScalarValue::Int64(4)));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_timeout() {
        let loader = CountingLoader {
            stall: true,
            ..CountingLoader::default()
        };
        let r = refresher(loader, ReloadPolicy::Once).with_timeout(Duration::from_secs(5));
        let err = r.reload().await.unwrap_err();
        assert_eq!(err, LoadError::Timeout(Duration::from_secs(5)));
        assert!(!r.cache().is_ready());
    }

    #[test]
    fn test_from_config() {
        let mut options = std::collections::HashMap::new();
        options.insert("table".to_string(), "customers".to_string());
        options.insert("reload".to_string(), "1m".to_string());
        options.insert("reload.timeout".to_string(), "10s".to_string());
        let config = DimTableConfig::from_options(&options).unwrap();

        let r = CacheRefresher::from_config(CountingLoader::default(), &config).unwrap();
        assert_eq!(r.cache().table(), "customers");
        assert_eq!(r.policy(), ReloadPolicy::Every(Duration::from_secs(60)));
        assert_eq!(r.timeout, Some(Duration::from_secs(10)));
    }
}
