//! Utility Module
//!
//! Concurrency helpers and shared infrastructure used by the render core:
//!
//! - [`collector`]: append-only collectors filled from many worker threads
//! - [`pool`]: thread-safe object pools for per-frame scratch storage
//! - [`interner`]: string interning for parameter key names
//!
//! # Concurrent Collection
//!
//! Extract and Prepare append nodes from rayon workers. Workers hold a
//! [`CollectorCache`] which buffers items locally and publishes them to the
//! shared [`ConcurrentCollector`] in batches, reserving each batch's index
//! range with one atomic add. Appends never take a lock.
//!
//! ```rust,ignore
//! use prism::utils::{ConcurrentCollector, CollectorCache};
//!
//! let mut nodes = ConcurrentCollector::new();
//! rayon::scope(|_| {
//!     let mut cache = CollectorCache::new(&nodes, 64);
//!     cache.add(1);
//! });
//! nodes.close();
//! assert_eq!(nodes.items(), &[1]);
//! ```

pub mod collector;
pub mod interner;
pub mod pool;

pub use collector::{CollectorCache, ConcurrentCollector};
pub use interner::Symbol;
pub use pool::ConcurrentPool;
