//! Process-wide pool of sandbox instances.
//!
//! A soft cap (`maxPoolSize`) bounds how many instances are recycled; a hard
//! concurrency cap (`maxConcurrent`) bounds how many executions run at once.
//! [`tokio::sync::Semaphore`] gives the hard cap its FIFO wait queue for
//! free — acquiring beyond the cap blocks until a permit is released, in
//! request order. Instances created once the soft cap is already satisfied
//! are "burst" instances: they are disposed on release instead of being
//! returned to the pool. Idle instances beyond `ttl` are evicted lazily, on
//! the next acquire that would have reused them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::errors::SandboxError;

struct PooledInstance {
    id: u64,
    last_used: Instant,
    is_burst: bool,
}

/// Tunables mirroring the component design's pool configuration.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_pool_size: usize,
    pub max_concurrent: usize,
    pub ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 20,
            max_concurrent: 64,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// The process-wide sandbox pool. Cheaply clonable: all state lives behind
/// `Arc`.
#[derive(Clone)]
pub struct SandboxPool {
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Arc<Mutex<VecDeque<PooledInstance>>>,
    pooled_outstanding: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

/// A checked-out sandbox instance. Dropping it without calling
/// [`SandboxHandle::release`] still releases the concurrency permit (so a
/// panicking script execution can't leak pool capacity) but treats the
/// instance as disposed rather than recycled.
pub struct SandboxHandle {
    pool: SandboxPool,
    instance_id: u64,
    is_burst: bool,
    _permit: OwnedSemaphorePermit,
    released: bool,
}

impl SandboxHandle {
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Returns the instance to the pool (or disposes it, if it was a burst
    /// instance created above the soft cap).
    pub fn release(mut self) {
        self.released = true;
        self.pool.release_instance(self.instance_id, self.is_burst);
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        if !self.released {
            // Execution aborted or panicked before an explicit release: treat
            // the instance as disposed, but the semaphore permit still drops
            // here, so pool capacity is never leaked.
            if !self.is_burst {
                self.pool.pooled_outstanding.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

impl SandboxPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            idle: Arc::new(Mutex::new(VecDeque::new())),
            pooled_outstanding: Arc::new(AtomicUsize::new(0)),
            next_id: Arc::new(AtomicU64::new(1)),
            config,
        }
    }

    /// Current number of pooled (non-burst) instances either idle or
    /// checked out. Exposed for the pool-occupancy gauge.
    pub fn pooled_outstanding(&self) -> usize {
        self.pooled_outstanding.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Acquires a sandbox instance, blocking on the hard concurrency cap's
    /// FIFO wait queue if saturated.
    pub async fn acquire(&self) -> Result<SandboxHandle, SandboxError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::PoolExhausted)?;

        self.evict_expired();

        let (instance_id, is_burst) = {
            let mut idle = self.idle.lock();
            if let Some(instance) = idle.pop_front() {
                (instance.id, instance.is_burst)
            } else if self.pooled_outstanding.load(Ordering::SeqCst) < self.config.max_pool_size {
                self.pooled_outstanding.fetch_add(1, Ordering::SeqCst);
                (self.next_id.fetch_add(1, Ordering::SeqCst), false)
            } else {
                (self.next_id.fetch_add(1, Ordering::SeqCst), true)
            }
        };

        Ok(SandboxHandle {
            pool: self.clone(),
            instance_id,
            is_burst,
            _permit: permit,
            released: false,
        })
    }

    fn evict_expired(&self) {
        let mut idle = self.idle.lock();
        let ttl = self.config.ttl;
        let now = Instant::now();
        let before = idle.len();
        idle.retain(|instance| now.duration_since(instance.last_used) < ttl);
        let evicted = before - idle.len();
        if evicted > 0 {
            self.pooled_outstanding
                .fetch_sub(evicted, Ordering::SeqCst);
        }
    }

    fn release_instance(&self, id: u64, is_burst: bool) {
        if is_burst {
            // Burst instances are disposed, not recycled.
            return;
        }
        self.idle.lock().push_back(PooledInstance {
            id,
            last_used: Instant::now(),
            is_burst,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_recycles_pooled_instances() {
        let pool = SandboxPool::new(PoolConfig {
            max_pool_size: 2,
            max_concurrent: 2,
            ttl: Duration::from_secs(60),
        });

        let handle = pool.acquire().await.unwrap();
        assert_eq!(pool.pooled_outstanding(), 1);
        handle.release();
        assert_eq!(pool.idle_count(), 1);

        let handle2 = pool.acquire().await.unwrap();
        assert_eq!(pool.pooled_outstanding(), 1);
        handle2.release();
    }

    #[tokio::test]
    async fn instances_beyond_soft_cap_are_burst_and_not_recycled() {
        let pool = SandboxPool::new(PoolConfig {
            max_pool_size: 1,
            max_concurrent: 4,
            ttl: Duration::from_secs(60),
        });

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.pooled_outstanding(), 1);

        a.release();
        b.release();
        // Only the non-burst instance comes back to idle.
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn hard_cap_blocks_until_release() {
        let pool = SandboxPool::new(PoolConfig {
            max_pool_size: 1,
            max_concurrent: 1,
            ttl: Duration::from_secs(60),
        });
        let handle = pool.acquire().await.unwrap();

        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move { pool2.acquire().await.unwrap() });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        handle.release();
        let second = waiter.await.unwrap();
        second.release();
    }
}
