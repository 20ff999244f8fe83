//! Combining several sources into one
//!
//! [`sample_from_datasets`] interleaves sources by weight with a seeded,
//! single-stream generator; [`concatenate_datasets`] plays them back to back.

#![warn(missing_docs)]

pub mod concat;
pub mod processor;
pub mod sample;

pub use concat::concatenate_datasets;
pub use processor::with_processor;
pub use sample::sample_from_datasets;
