//! Concurrency for ML stream pipelines
//!
//! Pipelines are synchronous iterator chains; the only concurrency is the
//! bounded background prefetch in this crate, which overlaps production of
//! upcoming items with their consumption without reordering them.

#![warn(missing_docs)]

pub mod prefetch;

pub use prefetch::{PrefetchConfig, PrefetchIterator, PrefetchSource, DEFAULT_PREFETCH_DEPTH};
