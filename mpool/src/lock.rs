//! Per-resource-address locking with DTN-time deadlines.
//!
//! `lock_prepare(resource_addr)` / `lock_wait(lock, deadline_ms)` gives every
//! distinct resource (a block, a subqueue, a route table) its own lock keyed
//! by an arbitrary `u64` address ([`BlockId::resource_addr`] for pool blocks)
//! without the caller having to pre-declare the set of lockable resources.
//! Locks are created lazily on first use and are never removed, since the
//! address space of resources is small and bounded by the pool's own
//! capacity.
//!
//! Waiting is expressed in DTN milliseconds rather than wall-clock
//! `Instant`s, delegating to [`bpcore_async::wait_until`] so the same
//! deadline semantics used by subqueue waiters and the route table's
//! maintenance worker apply here too.

extern crate alloc;

use alloc::sync::Arc;
use bpcore_async::sync::spin::Mutex;
use bpcore_async::{Notify, WaitResult};
use hashbrown::HashMap;

/// A registry of per-resource-address notification primitives.
#[derive(Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<u64, Arc<Notify>>>,
}

/// A prepared lock for a specific resource address, ready to be waited on.
pub struct PreparedLock {
    notify: Arc<Notify>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `resource_addr`, creating it if this is the
    /// first time the address has been locked.
    pub fn lock_prepare(&self, resource_addr: u64) -> PreparedLock {
        let mut locks = self.locks.lock();
        let notify = locks
            .entry(resource_addr)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        PreparedLock { notify }
    }

    /// Wakes every waiter currently blocked on `resource_addr`'s lock.
    pub fn wake(&self, resource_addr: u64) {
        if let Some(notify) = self.locks.lock().get(&resource_addr) {
            notify.notify_one();
        }
    }
}

#[cfg(feature = "std")]
impl PreparedLock {
    /// Blocks until this lock is woken via [`ResourceLocks::wake`], or
    /// `deadline` (DTN milliseconds since the epoch, as read by `now`)
    /// passes, whichever comes first. A `None` deadline waits indefinitely.
    pub async fn lock_wait(&self, now: impl Fn() -> u64, deadline: Option<u64>) -> WaitResult {
        bpcore_async::wait_until(&self.notify, now, deadline).await
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wake_before_deadline_returns_ok() {
        let locks = ResourceLocks::new();
        let addr = 42u64;
        let lock = locks.lock_prepare(addr);

        let woke = tokio::spawn({
            let locks = Arc::new(locks);
            let locks2 = locks.clone();
            async move {
                locks2.wake(addr);
            }
        });
        woke.await.unwrap();

        let result = lock.lock_wait(|| 0, Some(1_000)).await;
        assert_eq!(result, WaitResult::Ok);
    }

    #[tokio::test]
    async fn past_deadline_times_out_immediately() {
        let locks = ResourceLocks::new();
        let lock = locks.lock_prepare(7);
        let result = lock.lock_wait(|| 5_000, Some(1_000)).await;
        assert_eq!(result, WaitResult::Timeout);
    }
}
