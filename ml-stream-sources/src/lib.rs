//! Source-side plumbing for ML stream pipelines
//!
//! Storage backends live outside this crate. What it provides is the
//! contract they are described through ([`DatasetCatalog`]), split-string
//! parsing, the per-host sharding decision, read configuration and small
//! fake sources for tests.

#![warn(missing_docs)]

pub mod catalog;
pub mod fake;
pub mod read_config;
pub mod sharding;
pub mod split;

pub use catalog::{DatasetCatalog, InMemoryCatalog, SplitInfo};
pub use fake::{fake_source, fake_text_source};
pub use read_config::ReadConfig;
pub use sharding::{
    even_splits, infer_num_examples, infer_num_shards, maybe_shard_examples, ShardPlan, ShardRequest,
};
pub use split::{SplitBound, SplitSpec};
