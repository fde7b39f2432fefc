use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use moka::sync::Cache;

use super::types::PerformanceMetrics;
use crate::model::Constraint;

/// The exact parameters of an aggregation; identical queries share a cached result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricsQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub constraint: Option<Constraint>,
}

/// Result cache injected into the dashboard.
///
/// Concurrent misses on the same key may each recompute; the last insert wins.
pub trait MetricsCache: Send + Sync {
    fn get(&self, query: &MetricsQuery) -> Option<Arc<PerformanceMetrics>>;
    fn insert(&self, query: MetricsQuery, metrics: Arc<PerformanceMetrics>);
    /// Drop everything, e.g. after reference data changes.
    fn invalidate_all(&self);
}

/// Time-bounded cache. Entries expire `ttl` after insertion.
pub struct TtlCache {
    inner: Cache<MetricsQuery, Arc<PerformanceMetrics>>,
    ttl: Duration,
}

impl TtlCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
    const MAX_ENTRIES: u64 = 1_000;

    pub fn new(ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(Self::MAX_ENTRIES)
            .time_to_live(ttl)
            .build();
        Self { inner, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

impl MetricsCache for TtlCache {
    fn get(&self, query: &MetricsQuery) -> Option<Arc<PerformanceMetrics>> {
        let hit = self.inner.get(query);
        if hit.is_some() {
            log::debug!("Metrics cache hit for {}..{}", query.start, query.end);
        }
        hit
    }

    fn insert(&self, query: MetricsQuery, metrics: Arc<PerformanceMetrics>) {
        self.inner.insert(query, metrics);
    }

    fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

/// Never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl MetricsCache for NoCache {
    fn get(&self, _query: &MetricsQuery) -> Option<Arc<PerformanceMetrics>> {
        None
    }

    fn insert(&self, _query: MetricsQuery, _metrics: Arc<PerformanceMetrics>) {}

    fn invalidate_all(&self) {}
}
