//! Time-bounded cache of the compute inventory.
//!
//! The cache holds the last full instance list together with the moment it
//! was fetched, as one immutable [`Snapshot`]. Readers get the snapshot behind
//! an `Arc`; a refresh swaps the pointer, so records and timestamp always
//! change together.
//!
//! Refresh is single-flight: callers that find the snapshot stale queue on an
//! async lock, and whoever gets it first talks to the provider while the rest
//! reuse its result.
//!
//! Queries read through [`InventoryCache::get_within`], which runs the refresh
//! on its own task and stops waiting for it after a deadline. A refresh that
//! outlasts its caller keeps going and lands for the next query.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::DnsError;
use crate::inventory::{AddressEntry, AddressRole, InventoryProvider, InventoryRecord};
use crate::metrics::{self, RefreshResult, Timer};

/// One complete fetch of the inventory.
#[derive(Debug)]
pub struct Snapshot {
    records: Vec<InventoryRecord>,
    fetched_at: Instant,
}

impl Snapshot {
    /// Records in provider order.
    pub fn records(&self) -> &[InventoryRecord] {
        &self.records
    }

    /// When this snapshot was fetched.
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Time since this snapshot was fetched.
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// Every address with `role` on every record named `instance`, in
    /// record, interface, address order.
    pub fn matching_addresses<'a>(
        &'a self,
        instance: &'a str,
        role: AddressRole,
    ) -> impl Iterator<Item = &'a AddressEntry> + 'a {
        self.records
            .iter()
            .filter(move |r| r.name == instance)
            .flat_map(|r| r.addresses())
            .filter(move |a| a.role == role)
    }

    /// Total number of addresses across all records.
    pub fn address_count(&self) -> usize {
        self.records.iter().map(|r| r.addresses().count()).sum()
    }

    fn is_fresh(&self, stale_after: Duration) -> bool {
        self.age() <= stale_after
    }
}

/// Thread-safe, self-refreshing inventory cache.
#[derive(Clone)]
pub struct InventoryCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    provider: Arc<dyn InventoryProvider>,
    stale_after: Duration,
    provider_timeout: Duration,

    snapshot: RwLock<Option<Arc<Snapshot>>>,

    /// Serialises refreshes. Holds the time the last refresh failed, so
    /// callers that queued behind a failing refresh don't repeat it.
    refresh: Mutex<Option<Instant>>,
}

impl InventoryCache {
    /// Create an empty cache. Nothing is fetched until the first read.
    pub fn new(
        provider: Arc<dyn InventoryProvider>,
        stale_after: Duration,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                provider,
                stale_after,
                provider_timeout,
                snapshot: RwLock::new(None),
                refresh: Mutex::new(None),
            }),
        }
    }

    /// Staleness threshold.
    pub fn stale_after(&self) -> Duration {
        self.inner.stale_after
    }

    /// Current snapshot without triggering a refresh.
    pub fn peek(&self) -> Option<Arc<Snapshot>> {
        self.inner.snapshot.read().clone()
    }

    /// Get a snapshot no older than the staleness threshold, refreshing first
    /// if needed.
    ///
    /// When the refresh fails the previous snapshot is returned as-is. Only a
    /// cache that has never been filled reports the failure.
    pub async fn get(&self) -> Result<Arc<Snapshot>, DnsError> {
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        let waiting_since = Instant::now();
        let mut last_failure = self.inner.refresh.lock().await;

        // Someone else refreshed while we waited.
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        if matches!(*last_failure, Some(failed_at) if failed_at >= waiting_since) {
            debug!("reusing outcome of refresh that failed while waiting");
            return self.fallback(DnsError::InventoryUnavailable);
        }

        match self.refresh_locked().await {
            Ok(snapshot) => {
                *last_failure = None;
                Ok(snapshot)
            }
            Err(e) => {
                *last_failure = Some(Instant::now());
                self.fallback(e)
            }
        }
    }

    /// Like [`get`](Self::get), but waits at most `budget` for a refresh.
    ///
    /// The refresh runs detached, so giving up does not cancel the provider
    /// call. Past the budget the stale snapshot is returned, or
    /// [`DnsError::ProviderTimeout`] when nothing has been cached yet.
    pub async fn get_within(&self, budget: Duration) -> Result<Arc<Snapshot>, DnsError> {
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        let cache = self.clone();
        let refresh = tokio::spawn(async move { cache.get().await });

        match tokio::time::timeout(budget, refresh).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => self.fallback(DnsError::Provider(format!(
                "inventory refresh task failed: {e}"
            ))),
            Err(_) => {
                debug!(budget = ?budget, "inventory refresh still running, not waiting any longer");
                self.fallback(DnsError::ProviderTimeout(budget))
            }
        }
    }

    /// Refetch unconditionally. On failure the cached snapshot is kept and
    /// the provider error is returned.
    pub async fn force_refresh(&self) -> Result<Arc<Snapshot>, DnsError> {
        let mut last_failure = self.inner.refresh.lock().await;
        match self.refresh_locked().await {
            Ok(snapshot) => {
                *last_failure = None;
                Ok(snapshot)
            }
            Err(e) => {
                *last_failure = Some(Instant::now());
                Err(e)
            }
        }
    }

    /// Emit snapshot gauges.
    pub fn emit_metrics(&self) {
        if let Some(snapshot) = self.peek() {
            metrics::record_snapshot(
                snapshot.records.len(),
                snapshot.address_count(),
                snapshot.age(),
            );
        }
    }

    fn fresh(&self) -> Option<Arc<Snapshot>> {
        self.peek()
            .filter(|snapshot| snapshot.is_fresh(self.inner.stale_after))
    }

    fn fallback(&self, error: DnsError) -> Result<Arc<Snapshot>, DnsError> {
        match self.peek() {
            Some(stale) => {
                warn!(
                    error = %error,
                    age_secs = stale.age().as_secs(),
                    "inventory refresh failed, serving stale snapshot"
                );
                metrics::record_stale_served();
                Ok(stale)
            }
            None => {
                warn!(error = %error, "inventory refresh failed with no snapshot cached");
                Err(error)
            }
        }
    }

    /// Must be called with the refresh lock held.
    async fn refresh_locked(&self) -> Result<Arc<Snapshot>, DnsError> {
        let timer = Timer::start();
        let fetched = tokio::time::timeout(
            self.inner.provider_timeout,
            self.inner.provider.list_instances(),
        )
        .await;

        let records = match fetched {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                metrics::record_refresh(RefreshResult::Error, timer.elapsed());
                return Err(e);
            }
            Err(_) => {
                metrics::record_refresh(RefreshResult::Timeout, timer.elapsed());
                return Err(DnsError::ProviderTimeout(self.inner.provider_timeout));
            }
        };

        let snapshot = Arc::new(Snapshot {
            records,
            fetched_at: Instant::now(),
        });
        *self.inner.snapshot.write() = Some(snapshot.clone());

        metrics::record_refresh(RefreshResult::Success, timer.elapsed());
        metrics::record_snapshot(snapshot.records.len(), snapshot.address_count(), Duration::ZERO);
        info!(
            instances = snapshot.records.len(),
            addresses = snapshot.address_count(),
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "refreshed compute inventory"
        );
        Ok(snapshot)
    }
}
