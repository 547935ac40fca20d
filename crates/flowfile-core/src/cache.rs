//! Fingerprint-keyed result cache with single-flight compute locks (§5).
//!
//! Two concurrent runs asking for the same fingerprint must not both pay to
//! compute it: the first caller takes the per-fingerprint lock and computes;
//! the second blocks on that same lock and then finds the result already in
//! the cache, rather than redoing the work.

use crate::handle::LazyFrameHandle;
use crate::node::Fingerprint;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

impl CacheMetrics {
    pub fn snapshot(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

/// A per-fingerprint result cache. Cloning is cheap and shares the
/// underlying maps (`Arc`-backed), matching how a scheduler hands the same
/// cache to every worker task.
#[derive(Clone)]
pub struct ResultCache {
    results: Arc<DashMap<Fingerprint, LazyFrameHandle>>,
    locks: Arc<DashMap<Fingerprint, Arc<Mutex<()>>>>,
    metrics: Arc<CacheMetrics>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    pub fn new() -> Self {
        ResultCache {
            results: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            metrics: Arc::new(CacheMetrics::default()),
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<LazyFrameHandle> {
        self.results.get(fingerprint).map(|entry| entry.clone())
    }

    pub fn put(&self, fingerprint: Fingerprint, handle: LazyFrameHandle) {
        self.results.insert(fingerprint, handle);
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.results.remove(fingerprint);
    }

    pub fn clear(&self) {
        self.results.clear();
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    fn lock_for(&self, fingerprint: &Fingerprint) -> Arc<Mutex<()>> {
        self.locks
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fetch a cached result for `fingerprint`, or compute it exactly once
    /// across concurrent callers via a per-fingerprint lock.
    pub async fn get_or_compute<F, Fut, E>(&self, fingerprint: Fingerprint, compute: F) -> Result<LazyFrameHandle, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<LazyFrameHandle, E>>,
    {
        if let Some(hit) = self.get(&fingerprint) {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        let lock = self.lock_for(&fingerprint);
        let _guard = lock.lock().await;
        if let Some(hit) = self.get(&fingerprint) {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        let handle = compute().await?;
        self.put(fingerprint, handle.clone());
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;
    use std::sync::atomic::AtomicUsize;

    fn sample() -> LazyFrameHandle {
        LazyFrameHandle::from_dataframe(df!["a" => [1i64]].unwrap()).unwrap()
    }

    #[tokio::test]
    async fn hit_avoids_recompute() {
        let cache = ResultCache::new();
        let fp = Fingerprint("abc".into());
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            let _: Result<_, FlowfileLikeError> = cache
                .get_or_compute(fp.clone(), || async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Ok(sample())
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        let (hits, misses) = cache.metrics().snapshot();
        assert_eq!(misses, 1);
        assert_eq!(hits, 2);
    }

    #[tokio::test]
    async fn invalidate_forces_recompute() {
        let cache = ResultCache::new();
        let fp = Fingerprint("abc".into());
        let _: Result<_, FlowfileLikeError> = cache.get_or_compute(fp.clone(), || async { Ok(sample()) }).await;
        cache.invalidate(&fp);
        assert!(cache.get(&fp).is_none());
    }

    #[derive(Debug)]
    struct FlowfileLikeError;
    impl std::fmt::Display for FlowfileLikeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "error")
        }
    }
    impl std::error::Error for FlowfileLikeError {}
}
