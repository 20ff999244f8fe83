//! Dataset catalog contract
//!
//! A catalog reports how a dataset's splits are laid out in file shards. It
//! is consulted once, when a source is built, to decide how hosts divide the
//! data.

use std::collections::HashMap;
use std::ops::Range;

use serde::Deserialize;

/// Layout of one split
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct SplitInfo {
    /// Examples in each file shard, in file order
    pub shard_lengths: Vec<u64>,
}

impl SplitInfo {
    /// Split info from per-shard example counts
    pub fn new(shard_lengths: Vec<u64>) -> Self {
        Self { shard_lengths }
    }

    /// Total examples in the split
    pub fn num_examples(&self) -> u64 {
        self.shard_lengths.iter().sum()
    }

    /// Number of file shards
    pub fn num_shards(&self) -> usize {
        self.shard_lengths.len()
    }

    /// Number of non-empty shards holding any example of `range`
    pub fn shards_overlapping(&self, range: &Range<u64>) -> usize {
        let mut start = 0u64;
        let mut count = 0;
        for &len in &self.shard_lengths {
            let end = start + len;
            if len > 0 && start < range.end && range.start < end {
                count += 1;
            }
            start = end;
        }
        count
    }
}

/// Source of split layouts
#[cfg_attr(test, mockall::automock)]
pub trait DatasetCatalog: Send + Sync {
    /// Layout of `split_name` in `dataset`, or `None` if unknown
    fn split_info(&self, dataset: &str, split_name: &str) -> Option<SplitInfo>;
}

/// A catalog held in memory, loadable from JSON
///
/// The JSON form maps dataset name to split name to [`SplitInfo`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct InMemoryCatalog {
    datasets: HashMap<String, HashMap<String, SplitInfo>>,
}

impl InMemoryCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one split
    #[must_use]
    pub fn with_split(mut self, dataset: &str, split_name: &str, info: SplitInfo) -> Self {
        self.datasets
            .entry(dataset.to_string())
            .or_default()
            .insert(split_name.to_string(), info);
        self
    }
}

impl DatasetCatalog for InMemoryCatalog {
    fn split_info(&self, dataset: &str, split_name: &str) -> Option<SplitInfo> {
        self.datasets.get(dataset)?.get(split_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0..10, 1)]
    #[test_case(0..11, 2)]
    #[test_case(10..30, 2)]
    #[test_case(25..26, 1)]
    #[test_case(5..5, 0)]
    fn test_shards_overlapping(range: Range<u64>, expected: usize) {
        let info = SplitInfo::new(vec![10, 10, 0, 10]);
        assert_eq!(info.shards_overlapping(&range), expected);
    }

    #[test]
    fn test_catalog_from_json() {
        let catalog: InMemoryCatalog = serde_json::from_str(
            r#"{"glue/cola": {"validation": {"shard_lengths": [1043]}, "test": {"shard_lengths": [500, 563]}}}"#,
        )
        .unwrap();
        assert_eq!(catalog.split_info("glue/cola", "test").unwrap().num_examples(), 1063);
        assert_eq!(catalog.split_info("glue/cola", "validation").unwrap().num_shards(), 1);
        assert!(catalog.split_info("glue/cola", "train").is_none());
        assert!(catalog.split_info("c4", "train").is_none());
    }
}
