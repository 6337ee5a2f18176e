//! # Connection Pool
//!
//! Amortises authentication/TLS cost across callers by leasing clients
//! cloned from a single long-lived seed. Adaptively sizes the degree of
//! parallelism in response to server throttling, and serves waiters FIFO
//! via [`tokio::sync::Semaphore`] (itself FIFO-fair).
//!
//! The pool never creates its own clients: it is generic over a
//! [`SeedFactory`] collaborator, mirroring the way the rest of this crate
//! takes its remote-IO collaborators from the caller rather than owning a
//! concrete HTTP/TDS stack.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{CoreError, CoreResult};
use crate::metrics::{ComponentLabel, CoreMetrics};

/// Builds and invalidates the long-lived seed client. Implementors hold
/// the tenant/auth context; the pool never inspects it directly.
#[async_trait]
pub trait SeedFactory: Send + Sync {
    type Client: Clone + Send + Sync + 'static;

    /// Produce a fresh client derived from the seed identity.
    async fn create(&self) -> CoreResult<Self::Client>;

    /// Best-effort probe of server-reported concurrency headroom.
    /// Returning `None` means "could not probe"; the pool falls back to
    /// its configured default.
    async fn probe_concurrency(&self) -> Option<u32> {
        None
    }

    /// Invalidate any cached seed-level auth state (called after
    /// `AuthFailed`). The next `create()` must reseed.
    async fn invalidate(&self) {}
}

const DEFAULT_MAX_CONCURRENT: u32 = 4;
const THROTTLE_COOLDOWN: Duration = Duration::from_secs(60);
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Point-in-time snapshot of pool health.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub active_leases: u32,
    pub free_clients: usize,
    pub current_max_concurrent: u32,
    pub cooling_down: bool,
}

struct Inner<F: SeedFactory> {
    factory: F,
    free: Mutex<Vec<F::Client>>,
    active: AtomicU32,
    max_concurrent: AtomicU32,
    configured_cap: u32,
    semaphore: Arc<Semaphore>,
    /// Permits owed to a shrink that couldn't be forgotten immediately
    /// (none were available at the time). The next lease(s) to release
    /// consume this debt by forgetting their permit instead of returning
    /// it, so a shrink still takes effect even under full utilization.
    pending_shrink: AtomicU32,
    closed: std::sync::atomic::AtomicBool,
    drain_notify: Notify,
    cooldown_until: Mutex<Option<Instant>>,
    metrics: Option<Arc<CoreMetrics>>,
}

/// Atomically decrement `counter` by one if it is non-zero. Returns
/// whether a unit of debt was claimed.
fn try_claim(counter: &AtomicU32) -> bool {
    loop {
        let current = counter.load(Ordering::SeqCst);
        if current == 0 {
            return false;
        }
        if counter
            .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return true;
        }
    }
}

/// A pooled connection, cloning clients from a seed on demand.
pub struct Pool<F: SeedFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: SeedFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

/// A leased client. Dropping it returns the client to the free list
/// unless [`Lease::mark_unhealthy`] was called or the pool is draining.
pub struct Lease<F: SeedFactory> {
    client: Option<F::Client>,
    pool: Arc<Inner<F>>,
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
    unhealthy: bool,
    acquired_at: Instant,
}

impl<F: SeedFactory> Lease<F> {
    pub fn client(&self) -> &F::Client {
        self.client.as_ref().expect("lease client taken")
    }

    /// Mark the underlying client as unhealthy; on release it is
    /// dropped instead of returned to the free list.
    pub fn mark_unhealthy(&mut self) {
        self.unhealthy = true;
    }
}

impl<F: SeedFactory> Drop for Lease<F> {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let client = self.client.take();
        let unhealthy = self.unhealthy;
        let permit = self.permit.take();
        let duration = self.acquired_at.elapsed();
        debug!(lease_duration_ms = duration.as_millis() as u64, "lease released");
        pool.active.fetch_sub(1, Ordering::SeqCst);
        if let Some(m) = &pool.metrics {
            m.pool_leases_active.dec();
        }
        if !unhealthy && !pool.closed.load(Ordering::SeqCst) {
            if let Some(client) = client {
                // LIFO: push to the back, next getLease pops from the back
                // for token warmth (most recently used client first).
                if let Ok(mut free) = pool.free.try_lock() {
                    free.push(client);
                } else {
                    // Fall back to blocking lock on the rare contended path;
                    // this runs inside Drop so we cannot await.
                    let pool2 = pool.clone();
                    tokio::spawn(async move {
                        pool2.free.lock().await.push(client);
                    });
                }
            }
        }
        if let Some(permit) = permit {
            if try_claim(&pool.pending_shrink) {
                // A shrink is still owed; consume it now instead of
                // returning this permit to the semaphore.
                permit.forget();
            } else {
                drop(permit);
            }
        }
        pool.drain_notify.notify_waiters();
    }
}

impl<F: SeedFactory> Pool<F> {
    /// One-time pool construction. `max_concurrent` overrides the
    /// configured cap; if `None`, the pool probes the factory once and
    /// falls back to [`DEFAULT_MAX_CONCURRENT`] on failure.
    pub async fn init(factory: F, max_concurrent: Option<u32>, metrics: Option<Arc<CoreMetrics>>) -> Self {
        let cap = match max_concurrent {
            Some(n) => n,
            None => match factory.probe_concurrency().await {
                Some(n) if n > 0 => {
                    info!(probed = n, "connection pool probed concurrency headroom");
                    n
                }
                _ => DEFAULT_MAX_CONCURRENT,
            },
        };

        Pool {
            inner: Arc::new(Inner {
                factory,
                free: Mutex::new(Vec::new()),
                active: AtomicU32::new(0),
                max_concurrent: AtomicU32::new(cap),
                configured_cap: cap,
                semaphore: Arc::new(Semaphore::new(cap as usize)),
                pending_shrink: AtomicU32::new(0),
                closed: std::sync::atomic::AtomicBool::new(false),
                drain_notify: Notify::new(),
                cooldown_until: Mutex::new(None),
                metrics,
            }),
        }
    }

    /// Acquire a lease, waiting FIFO for a free permit if the pool is at
    /// capacity. Cooperative cancellation is honoured via `cancel`.
    pub async fn get_lease(&self, cancel: &CancellationToken) -> CoreResult<Lease<F>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CoreError::new(crate::error::ErrorCode::PoolClosed, "pool is disposed"));
        }

        let waited = self.inner.semaphore.available_permits() == 0;
        if waited {
            if let Some(m) = &self.inner.metrics {
                m.pool_leases_waited_total.inc();
            }
        }

        let permit = tokio::select! {
            res = self.inner.semaphore.clone().acquire_owned() => {
                res.map_err(|_| CoreError::new(crate::error::ErrorCode::PoolClosed, "pool semaphore closed"))?
            }
            _ = cancel.cancelled() => {
                return Err(CoreError::cancelled().with_details("lease acquisition cancelled"));
            }
        };

        if self.inner.closed.load(Ordering::SeqCst) {
            drop(permit);
            return Err(CoreError::new(crate::error::ErrorCode::PoolClosed, "pool is disposed"));
        }

        let client = {
            let mut free = self.inner.free.lock().await;
            free.pop()
        };
        let client = match client {
            Some(c) => c,
            None => self.inner.factory.create().await.map_err(|e| {
                warn!(error = %e, "seed client creation failed");
                e
            })?,
        };

        self.inner.active.fetch_add(1, Ordering::SeqCst);
        if let Some(m) = &self.inner.metrics {
            m.pool_leases_active.inc();
        }

        Ok(Lease {
            client: Some(client),
            pool: self.inner.clone(),
            permit: Some(permit),
            unhealthy: false,
            acquired_at: Instant::now(),
        })
    }

    /// Explicit release, equivalent to dropping the lease.
    pub fn release(&self, lease: Lease<F>) {
        drop(lease);
    }

    /// Invalidate the seed identity; the next `get_lease` reseeds via
    /// the factory (the free list is cleared so stale clients are not
    /// handed out).
    pub async fn invalidate_seed(&self) {
        self.inner.factory.invalidate().await;
        self.inner.free.lock().await.clear();
    }

    /// Record an observed `Throttled` response: shrink `maxConcurrent`
    /// by one (floor 1) for a 60s cooldown, and compute a full-jitter
    /// back-off duration for the caller to sleep before retrying.
    pub async fn record_throttle(&self, component: &str, retry_after: Option<Duration>, attempt: u32) -> Duration {
        if let Some(m) = &self.inner.metrics {
            m.pool_throttle_events_total
                .get_or_create(&ComponentLabel {
                    component: component.to_string(),
                })
                .inc();
        }

        let current = self.inner.max_concurrent.load(Ordering::SeqCst);
        let shrunk = current.saturating_sub(1).max(1);
        if shrunk != current {
            self.inner.max_concurrent.store(shrunk, Ordering::SeqCst);
            // Remove one permit from circulation: forget it immediately if
            // one is sitting free, otherwise queue the debt for the next
            // lease to release to forget instead of returning.
            if self.inner.semaphore.forget_permits(1) == 0 {
                self.inner.pending_shrink.fetch_add(1, Ordering::SeqCst);
            }
            warn!(from = current, to = shrunk, "pool shrinking max_concurrent after throttle");
        }
        *self.inner.cooldown_until.lock().await = Some(Instant::now() + THROTTLE_COOLDOWN);

        match retry_after {
            Some(d) => d,
            None => full_jitter_backoff(attempt),
        }
    }

    /// Probe whether the 60s cooldown has elapsed and, if so, grow
    /// `maxConcurrent` back toward the configured cap by one step.
    pub async fn probe_growth(&self) {
        let mut guard = self.inner.cooldown_until.lock().await;
        if let Some(until) = *guard {
            if Instant::now() >= until {
                let current = self.inner.max_concurrent.load(Ordering::SeqCst);
                if current < self.inner.configured_cap {
                    let grown = (current + 1).min(self.inner.configured_cap);
                    self.inner.max_concurrent.store(grown, Ordering::SeqCst);
                    // Restore one permit to circulation: if an earlier
                    // shrink's debt was never actually paid by a lease
                    // release, cancel it instead of minting a new permit on
                    // top of capacity that was never really removed.
                    if !try_claim(&self.inner.pending_shrink) {
                        self.inner.semaphore.add_permits(1);
                    }
                    info!(from = current, to = grown, "pool growing max_concurrent after cooldown");
                }
                if self.inner.max_concurrent.load(Ordering::SeqCst) >= self.inner.configured_cap {
                    *guard = None;
                } else {
                    *guard = Some(Instant::now() + THROTTLE_COOLDOWN);
                }
            }
        }
    }

    /// Drain the pool: reject new leases with `PoolClosed`, wait for
    /// in-flight leases to finish, then drop all free clients.
    pub async fn dispose(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        while self.inner.active.load(Ordering::SeqCst) > 0 {
            self.inner.drain_notify.notified().await;
        }
        self.inner.free.lock().await.clear();
    }

    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            active_leases: self.inner.active.load(Ordering::SeqCst),
            free_clients: self.inner.free.lock().await.len(),
            current_max_concurrent: self.inner.max_concurrent.load(Ordering::SeqCst),
            cooling_down: self.inner.cooldown_until.lock().await.is_some(),
        }
    }
}

fn full_jitter_backoff(attempt: u32) -> Duration {
    let capped_attempt = attempt.min(6); // 500ms * 2^6 = 32s, already past cap
    let max_ms = (BACKOFF_BASE_MS.saturating_mul(1u64 << capped_attempt)).min(BACKOFF_CAP_MS);
    let jittered = rand::thread_rng().gen_range(0..=max_ms.max(1));
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_cap() {
        for attempt in 0..20 {
            let d = full_jitter_backoff(attempt);
            assert!(d.as_millis() as u64 <= BACKOFF_CAP_MS);
        }
    }

    #[test]
    fn backoff_grows_with_attempt_upper_bound() {
        // The *ceiling* should grow monotonically up to the cap even
        // though individual samples are jittered.
        let mut last_cap = 0u64;
        for attempt in 0..8 {
            let cap = (BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(6))).min(BACKOFF_CAP_MS);
            assert!(cap >= last_cap);
            last_cap = cap;
        }
    }

    #[derive(Clone)]
    struct FakeClient;

    struct FakeFactory;

    #[async_trait]
    impl SeedFactory for FakeFactory {
        type Client = FakeClient;
        async fn create(&self) -> CoreResult<FakeClient> {
            Ok(FakeClient)
        }
    }

    #[tokio::test]
    async fn throttle_actually_reduces_concurrent_leases() {
        let pool = Pool::init(FakeFactory, Some(3), None).await;
        let cancel = CancellationToken::new();

        let l1 = pool.get_lease(&cancel).await.unwrap();
        let l2 = pool.get_lease(&cancel).await.unwrap();
        let l3 = pool.get_lease(&cancel).await.unwrap();
        assert_eq!(pool.inner.semaphore.available_permits(), 0);

        pool.record_throttle("tds", None, 0).await;
        assert_eq!(pool.stats().await.current_max_concurrent, 2);

        drop(l1);
        // The released permit should have been forgotten to pay the
        // shrink debt rather than returned to the semaphore.
        assert_eq!(pool.inner.semaphore.available_permits(), 0);

        drop(l2);
        drop(l3);

        let l4 = pool.get_lease(&cancel).await.unwrap();
        let l5 = pool.get_lease(&cancel).await.unwrap();
        assert_eq!(pool.inner.semaphore.available_permits(), 0);
        drop(l4);
        drop(l5);
    }

    #[tokio::test]
    async fn growth_restores_the_forgotten_permit() {
        let pool = Pool::init(FakeFactory, Some(2), None).await;
        let cancel = CancellationToken::new();

        let l1 = pool.get_lease(&cancel).await.unwrap();
        let l2 = pool.get_lease(&cancel).await.unwrap();
        pool.record_throttle("tds", None, 0).await;
        drop(l1);
        drop(l2);
        assert_eq!(pool.stats().await.current_max_concurrent, 1);
        assert_eq!(pool.inner.semaphore.available_permits(), 1);

        // Force the cooldown to have already elapsed and grow back.
        *pool.inner.cooldown_until.lock().await = Some(Instant::now() - Duration::from_secs(1));
        pool.probe_growth().await;
        assert_eq!(pool.stats().await.current_max_concurrent, 2);
        assert_eq!(pool.inner.semaphore.available_permits(), 2);
    }
}
