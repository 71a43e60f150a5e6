use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting admission gate shared by every upstream provider call. Protects
/// the resource-manager API's rate limits; a `None` limit disables the gate.
#[derive(Clone, Default)]
pub struct ConcurrencyLimiter {
    semaphore: Option<Arc<Semaphore>>,
    metrics: Arc<LimiterMetrics>,
}

impl ConcurrencyLimiter {
    pub fn new(limit: Option<usize>) -> Self {
        if let Some(limit) = limit {
            Self {
                semaphore: Some(Arc::new(Semaphore::new(limit))),
                metrics: Arc::new(LimiterMetrics {
                    limit: Some(limit),
                    throttled: AtomicU64::new(0),
                    inflight: AtomicU64::new(0),
                }),
            }
        } else {
            Self::default()
        }
    }

    /// Acquire a permit, waiting if the gate is saturated. The permit is
    /// released when dropped, on success and failure paths alike.
    pub async fn acquire(&self) -> LimiterPermit {
        if let Some(semaphore) = &self.semaphore {
            match semaphore.clone().try_acquire_owned() {
                Ok(permit) => {
                    self.metrics.inflight.fetch_add(1, Ordering::Relaxed);
                    LimiterPermit {
                        inner: Some(permit),
                        metrics: Arc::clone(&self.metrics),
                    }
                }
                Err(_) => {
                    self.metrics.throttled.fetch_add(1, Ordering::Relaxed);
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("limiter semaphore closed");
                    self.metrics.inflight.fetch_add(1, Ordering::Relaxed);
                    LimiterPermit {
                        inner: Some(permit),
                        metrics: Arc::clone(&self.metrics),
                    }
                }
            }
        } else {
            LimiterPermit {
                inner: None,
                metrics: Arc::clone(&self.metrics),
            }
        }
    }

    pub fn snapshot(&self) -> LimiterSnapshot {
        LimiterSnapshot {
            limit: self.metrics.limit,
            inflight: self.metrics.inflight.load(Ordering::Relaxed),
            throttled: self.metrics.throttled.load(Ordering::Relaxed),
        }
    }
}

pub struct LimiterPermit {
    inner: Option<OwnedSemaphorePermit>,
    metrics: Arc<LimiterMetrics>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        if self.inner.is_some() {
            self.metrics.inflight.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

#[derive(Default)]
struct LimiterMetrics {
    limit: Option<usize>,
    throttled: AtomicU64,
    inflight: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct LimiterSnapshot {
    pub limit: Option<usize>,
    pub inflight: u64,
    pub throttled: u64,
}
