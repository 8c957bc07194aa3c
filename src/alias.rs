//! Type aliases for concurrency primitives.
//!
//! All internal code imports locks from here rather than `std::sync`
//! directly, so the choice of lock implementation is centralized.
//!
//! We use `parking_lot` for all synchronization primitives:
//! - **No lock poisoning**: panics don't poison the lock.
//! - **Better performance**: faster than `std::sync` under contention.
//! - **Smaller memory footprint**: 1 byte vs 16-24 bytes for `std::sync::RwLock`.

/// `parking_lot::Mutex` alias used by each per-server pool.
pub use parking_lot::Mutex as PMutex;

/// Mutex guard for [`PMutex`].
pub use parking_lot::MutexGuard as PMutexGuard;
