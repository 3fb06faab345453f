//! Runtime-agnostic async and synchronization primitives for the bpcore DTN stack.
//!
//! This crate provides the small set of concurrency abstractions the rest of
//! the workspace is built on: a cancellable [`TaskPool`] for long-running
//! workers (the route table maintenance worker, CLA I/O loops), a
//! [`Notify`] primitive used to wake subqueue waiters, and deadline-aware
//! waiting built on DTN time (milliseconds since the DTN epoch) rather than
//! wall-clock `Instant`s, matching the way the rest of the stack reasons
//! about time.
//!
//! Everything here currently rides on tokio, but the module boundaries keep
//! tokio types from leaking past this crate so an alternative runtime could
//! be slotted in later (see `time`, `notify`, `task_pool`).

mod spawn;

pub mod bounded_task_pool;
pub mod cancellation_token;
pub mod join_handle;
pub mod notify;
pub mod sync;
pub mod task_pool;
pub mod time;

pub use cancellation_token::CancellationToken;
pub use join_handle::JoinHandle;
pub use notify::Notify;
pub use task_pool::TaskPool;

/// Number of threads reasonable to run concurrently on this host.
///
/// Falls back to 1 when the platform can't report a figure (and always
/// returns 1 without the `std` feature), matching
/// [`BoundedTaskPool::default`](bounded_task_pool::BoundedTaskPool::default)'s use as
/// a sane worker-count default for the maintenance worker and CLA I/O pools.
#[cfg(feature = "std")]
pub fn available_parallelism() -> core::num::NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(core::num::NonZeroUsize::new(1).unwrap())
}

#[cfg(not(feature = "std"))]
pub fn available_parallelism() -> core::num::NonZeroUsize {
    core::num::NonZeroUsize::new(1).unwrap()
}

/// The result of waiting on a deadline: either the wait condition was
/// satisfied, or the deadline (expressed in DTN milliseconds) passed first.
///
/// This mirrors the OS abstraction's `wait_until_ms` contract (`OK` vs
/// `TIMEOUT`) consumed throughout the rest of the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The awaited condition was observed before the deadline.
    Ok,
    /// The deadline passed with no notification.
    Timeout,
}

/// Waits on `notify` until either it fires or `deadline` (DTN milliseconds
/// since the epoch) is reached, as measured by `now`.
///
/// `now` is injected rather than read from a global clock so tests can drive
/// virtual time and so the only "OS abstraction" dependency in this crate is
/// the caller-supplied current-time function.
#[cfg(feature = "tokio")]
pub async fn wait_until(
    notify: &Notify,
    now: impl Fn() -> u64,
    deadline: Option<u64>,
) -> WaitResult {
    let Some(deadline) = deadline else {
        notify.notified().await;
        return WaitResult::Ok;
    };

    let current = now();
    if current >= deadline {
        return WaitResult::Timeout;
    }

    let sleep_for = crate::time::std_duration_from_millis(deadline - current);
    tokio::select! {
        biased;
        _ = notify.notified() => WaitResult::Ok,
        _ = tokio::time::sleep(sleep_for) => WaitResult::Timeout,
    }
}
