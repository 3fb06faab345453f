//! General-purpose blocking locks for O(n) operations and read-heavy access.
//!
//! Unlike [`super::spin`], these wrap `std::sync::{Mutex, RwLock}` and are
//! safe to hold across iteration (rbtree range scans, route table lookups)
//! or any operation that isn't guaranteed O(1). They must never be held
//! across an `.await` point.

/// A general-purpose mutex for operations that may iterate or otherwise take
/// more than O(1) time while holding the lock.
#[derive(Debug, Default)]
pub struct Mutex<T>(std::sync::Mutex<T>);

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self(std::sync::Mutex::new(value))
    }

    #[inline]
    pub fn lock(&self) -> std::sync::MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn into_inner(self) -> T {
        self.0.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

/// A general-purpose read/write lock, for indices that are read far more
/// often than mutated (the route table's LPM index, the cache's EID index).
#[derive(Debug, Default)]
pub struct RwLock<T>(std::sync::RwLock<T>);

impl<T> RwLock<T> {
    pub const fn new(value: T) -> Self {
        Self(std::sync::RwLock::new(value))
    }

    #[inline]
    pub fn read(&self) -> std::sync::RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    #[inline]
    pub fn write(&self) -> std::sync::RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }
}
