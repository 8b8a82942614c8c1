pub mod file;

#[cfg(feature = "dashmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "dashmap")))]
pub mod memory;

#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

use std::fmt::Display;
use std::future::Future;

/// Describes where sliding windows are persisted.
///
/// A window is the list of event timestamps (seconds since the Unix epoch) recorded for one
/// storage key, in the order they were admitted. The [RateLimiter](crate::RateLimiter) owns the
/// admission logic; a Backend only has to load, save and delete these lists, so the store can be
/// swapped without touching the limiter.
///
/// A Backend is required to implement [Clone], usually this means wrapping your data store within
/// an [Arc](std::sync::Arc), although many connection pools already do so internally; there is no
/// need to wrap it twice.
///
/// The limiter treats every error as "no history" (fail open) and logs it, so implementations
/// should report problems rather than hide them.
pub trait Backend: Clone {
    type Error: Display;

    /// Load the window stored under `key`.
    ///
    /// A key that has never been saved (or has been deleted) must load as an empty window, not an
    /// error.
    fn load(&self, key: &str) -> impl Future<Output = Result<Vec<u64>, Self::Error>>;

    /// Replace the window stored under `key`.
    fn save(&self, key: &str, events: &[u64]) -> impl Future<Output = Result<(), Self::Error>>;

    /// Remove the window stored under `key`.
    ///
    /// Deleting a key that does not exist is a success.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), Self::Error>>;
}
