//! Synchronization primitives with platform-appropriate implementations.
//!
//! This module provides synchronization primitives organized by their characteristics:
//!
//! # Submodules
//!
//! - [`spin`] - Spinlock-based primitives for O(1) operations on hot paths
//! - [`blocking`] - `std::sync`-backed primitives for O(n) operations and read-heavy access
//!
//! # Choosing the Right Primitive
//!
//! | Use Case | Primitive |
//! |----------|-----------|
//! | O(1) ops, hot path, no blocking | [`spin::Mutex`] |
//! | O(1) ops, read-heavy, no blocking | [`spin::RwLock`] |
//! | O(n) iteration, may block | [`blocking::Mutex`] |
//! | O(n) iteration, read-heavy | [`blocking::RwLock`] |

pub mod blocking;
pub mod spin;

pub use blocking::{Mutex, RwLock};
