use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Served from an existing or revived entry.
    Hit,
    /// This request ran the backend compile.
    Compiled,
    Failed,
}

/// Timing sink invoked around compile and release requests.
///
/// Calls are fire-and-forget: implementations must not block or fail.
pub trait MetricsSink: Send + Sync {
    fn record_compile(&self, elapsed: Duration, outcome: CompileOutcome);

    fn record_release(&self, elapsed: Duration, released: usize, failed: usize);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_compile(&self, _elapsed: Duration, _outcome: CompileOutcome) {}

    fn record_release(&self, _elapsed: Duration, _released: usize, _failed: usize) {}
}

/// Lock-free counters for cache transitions and request timings.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    compiles: AtomicU64,
    compile_failures: AtomicU64,
    evictions: AtomicU64,
    releases: AtomicU64,
    release_failures: AtomicU64,
    compile_nanos: AtomicU64,
    release_nanos: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compiled(&self) {
        self.compiles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compile_failure(&self) {
        self.compile_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compiles: self.compiles.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            compile_time: Duration::from_nanos(self.compile_nanos.load(Ordering::Relaxed)),
            release_time: Duration::from_nanos(self.release_nanos.load(Ordering::Relaxed)),
        }
    }
}

impl MetricsSink for CacheMetrics {
    fn record_compile(&self, elapsed: Duration, _outcome: CompileOutcome) {
        self.compile_nanos
            .fetch_add(saturating_nanos(elapsed), Ordering::Relaxed);
    }

    fn record_release(&self, elapsed: Duration, released: usize, failed: usize) {
        self.release_nanos
            .fetch_add(saturating_nanos(elapsed), Ordering::Relaxed);
        self.releases.fetch_add(released as u64, Ordering::Relaxed);
        self.release_failures
            .fetch_add(failed as u64, Ordering::Relaxed);
    }
}

fn saturating_nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub compiles: u64,
    pub compile_failures: u64,
    pub evictions: u64,
    pub releases: u64,
    pub release_failures: u64,
    pub compile_time: Duration,
    pub release_time: Duration,
}
