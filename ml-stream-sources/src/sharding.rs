//! Deciding how hosts divide a split
//!
//! Hosts read disjoint file shards when the file count divides evenly among
//! them. Otherwise each host takes an even slice of examples. A split with
//! fewer examples than hosts is replicated to every host for training, and
//! rejected for evaluation, where duplicates would skew metrics.

use ml_stream_core::{Error, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::catalog::{DatasetCatalog, SplitInfo};
use crate::read_config::ReadConfig;
use crate::split::{SplitBound, SplitSpec};

fn lookup(catalog: &dyn DatasetCatalog, dataset: &str, split: &str) -> Option<(SplitSpec, SplitInfo)> {
    let spec = SplitSpec::parse(split).ok()?;
    let info = catalog.split_info(dataset, spec.name())?;
    Some((spec, info))
}

/// Number of file shards the split touches
///
/// `None` for unknown splits or unparsable split strings.
pub fn infer_num_shards(catalog: &dyn DatasetCatalog, dataset: &str, split: &str) -> Option<usize> {
    let (spec, info) = lookup(catalog, dataset, split)?;
    Some(shards_touched(&spec, &info))
}

fn shards_touched(spec: &SplitSpec, info: &SplitInfo) -> usize {
    if spec.is_slice() {
        info.shards_overlapping(&spec.resolve(info.num_examples()))
    } else {
        info.num_shards()
    }
}

/// Number of examples the split selects
///
/// `None` for unknown splits or unparsable split strings.
pub fn infer_num_examples(catalog: &dyn DatasetCatalog, dataset: &str, split: &str) -> Option<u64> {
    let (spec, info) = lookup(catalog, dataset, split)?;
    let range = spec.resolve(info.num_examples());
    Some(range.end - range.start)
}

/// Divide the examples of `split` (out of `len`) into `n` contiguous slices
///
/// The first `count % n` slices get one extra example. Slices are absolute
/// example ranges of the underlying split.
pub fn even_splits(split: &SplitSpec, len: u64, n: usize) -> Vec<SplitSpec> {
    let range = split.resolve(len);
    let count = range.end - range.start;
    let n64 = n as u64;
    let (base, extra) = (count / n64.max(1), count % n64.max(1));
    let mut start = range.start;
    (0..n64)
        .map(|k| {
            let size = base + u64::from(k < extra);
            let slice = SplitSpec::slice(
                split.name(),
                Some(SplitBound::Absolute(to_i64(start))),
                Some(SplitBound::Absolute(to_i64(start + size))),
            );
            start += size;
            slice
        })
        .collect()
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// A request to read one host's share of a split
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShardRequest {
    /// Dataset name in the catalog
    pub dataset: String,

    /// Split string, e.g. `train` or `validation[:50%]`
    pub split: String,

    /// Number of hosts
    pub required_shards: usize,

    /// This host
    pub shard_index: usize,

    /// Whether the read feeds training
    pub is_training: bool,
}

impl ShardRequest {
    /// Request for the host described by `config`
    pub fn from_read_config(dataset: &str, split: &str, config: &ReadConfig) -> Self {
        Self {
            dataset: dataset.to_string(),
            split: split.to_string(),
            required_shards: config.num_shards,
            shard_index: config.shard_index,
            is_training: config.is_training,
        }
    }
}

/// What one host reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardPlan {
    /// Layout unknown; read the split string as given
    PassThrough(String),

    /// Read file shards `i` of the split with `i % num_shards == shard_index`
    Native {
        /// The split whose files are divided
        split: String,
        /// This host
        shard_index: usize,
        /// Number of hosts
        num_shards: usize,
    },

    /// Read an even slice of the examples
    Even {
        /// The slice assigned to this host
        split: String,
    },

    /// Read the whole split and shuffle locally
    Replicate(String),
}

impl ShardPlan {
    /// File shards read by this host out of the `total_files` the split touches
    pub fn file_shards(&self, total_files: usize) -> Vec<usize> {
        match self {
            ShardPlan::Native {
                shard_index,
                num_shards,
                ..
            } => (0..total_files).filter(|i| i % num_shards == *shard_index).collect(),
            _ => (0..total_files).collect(),
        }
    }
}

/// Decide how this host reads its share of `request.split`
pub fn maybe_shard_examples(catalog: &dyn DatasetCatalog, request: &ShardRequest) -> Result<ShardPlan> {
    let ShardRequest {
        dataset,
        split,
        required_shards,
        shard_index,
        is_training,
    } = request;
    let (required_shards, shard_index) = (*required_shards, *shard_index);
    if required_shards == 0 {
        return Err(Error::Config("required_shards must be positive".into()));
    }
    if shard_index >= required_shards {
        return Err(Error::Config(format!(
            "shard_index {shard_index} out of range for {required_shards} shards"
        )));
    }

    let Some((spec, info)) = lookup(catalog, dataset, split) else {
        warn!(dataset = %dataset, split = %split, "split layout unknown, reading split as given");
        return Ok(ShardPlan::PassThrough(split.clone()));
    };

    let num_shards = shards_touched(&spec, &info);
    let plan = if num_shards > 0 && num_shards % required_shards == 0 {
        ShardPlan::Native {
            split: split.clone(),
            shard_index,
            num_shards: required_shards,
        }
    } else {
        let range = spec.resolve(info.num_examples());
        let num_examples = range.end - range.start;
        if num_examples >= required_shards as u64 {
            let slices = even_splits(&spec, info.num_examples(), required_shards);
            ShardPlan::Even {
                split: slices[shard_index].to_string(),
            }
        } else if *is_training {
            warn!(
                dataset = %dataset,
                split = %split,
                num_examples,
                required_shards,
                "fewer examples than hosts, every host reads the whole split"
            );
            ShardPlan::Replicate(split.clone())
        } else {
            return Err(Error::Config(format!(
                "split '{split}' of '{dataset}' has {num_examples} examples, fewer than {required_shards} \
                 hosts; evaluation would read duplicate examples"
            )));
        }
    };
    info!(dataset = %dataset, split = %split, shard_index, ?plan, "sharding plan");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, MockDatasetCatalog};
    use test_case::test_case;

    fn c4() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_split("c4/en", "train", SplitInfo::new(vec![356_317; 1024]))
            .with_split("c4/en", "validation", SplitInfo::new(vec![45_576; 8]))
    }

    fn cola() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_split("glue/cola", "validation", SplitInfo::new(vec![1043]))
            .with_split("glue/cola", "test", SplitInfo::new(vec![1063]))
    }

    #[test_case("train", Some(1024))]
    #[test_case("validation", Some(8))]
    #[test_case("train[:512]", Some(1))]
    #[test_case("invalid", None)]
    #[test_case("train[oops]", None)]
    fn test_infer_num_shards(split: &str, expected: Option<usize>) {
        assert_eq!(infer_num_shards(&c4(), "c4/en", split), expected);
    }

    #[test_case("validation", Some(1043))]
    #[test_case("test", Some(1063))]
    #[test_case("test[:12]", Some(12))]
    #[test_case("invalid", None)]
    fn test_infer_num_examples(split: &str, expected: Option<u64>) {
        assert_eq!(infer_num_examples(&cola(), "glue/cola", split), expected);
    }

    fn request(split: &str, required_shards: usize, shard_index: usize, is_training: bool) -> ShardRequest {
        ShardRequest {
            dataset: "glue/cola".into(),
            split: split.into(),
            required_shards,
            shard_index,
            is_training,
        }
    }

    #[test]
    fn test_even_split() {
        let plan = maybe_shard_examples(&cola(), &request("validation", 5, 0, true)).unwrap();
        // 1043 = 5 * 208 + 3
        assert_eq!(
            plan,
            ShardPlan::Even {
                split: "validation[0:209]".into()
            }
        );
        let last = maybe_shard_examples(&cola(), &request("validation", 5, 4, true)).unwrap();
        assert_eq!(
            last,
            ShardPlan::Even {
                split: "validation[835:1043]".into()
            }
        );
    }

    #[test]
    fn test_even_split_of_slice() {
        let plan = maybe_shard_examples(&cola(), &request("test[100:110]", 3, 1, false)).unwrap();
        assert_eq!(
            plan,
            ShardPlan::Even {
                split: "test[104:107]".into()
            }
        );
    }

    #[test]
    fn test_replicate_for_training() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let plan = maybe_shard_examples(&cola(), &request("validation", 1044, 3, true)).unwrap();
        assert_eq!(plan, ShardPlan::Replicate("validation".into()));
    }

    #[test]
    fn test_uneven_eval_is_an_error() {
        let result = maybe_shard_examples(&cola(), &request("validation", 1044, 3, false));
        assert!(result.unwrap_err().is_config());
    }

    #[test]
    fn test_unknown_split_passes_through() {
        let plan = maybe_shard_examples(&cola(), &request("invalid", 5, 0, true)).unwrap();
        assert_eq!(plan, ShardPlan::PassThrough("invalid".into()));
    }

    #[test_case(1, 0)]
    #[test_case(8, 3)]
    #[test_case(1024, 1023)]
    fn test_native_sharding(required_shards: usize, shard_index: usize) {
        let request = ShardRequest {
            dataset: "c4/en".into(),
            split: "train".into(),
            required_shards,
            shard_index,
            is_training: true,
        };
        let plan = maybe_shard_examples(&c4(), &request).unwrap();
        assert_eq!(
            plan,
            ShardPlan::Native {
                split: "train".into(),
                shard_index,
                num_shards: required_shards
            }
        );
        let files = plan.file_shards(1024);
        assert_eq!(files.len(), 1024 / required_shards);
        assert!(files.iter().all(|f| f % required_shards == shard_index));
    }

    #[test_case(0, 0)]
    #[test_case(4, 4)]
    fn test_invalid_request(required_shards: usize, shard_index: usize) {
        let result = maybe_shard_examples(&cola(), &request("validation", required_shards, shard_index, true));
        assert!(result.unwrap_err().is_config());
    }

    #[test]
    fn test_catalog_is_queried_by_split_name() {
        let mut catalog = MockDatasetCatalog::new();
        catalog
            .expect_split_info()
            .times(3)
            .returning(|dataset, split| {
                (dataset == "wiki" && split == "train").then(|| SplitInfo::new(vec![10, 10, 10]))
            });
        assert_eq!(infer_num_shards(&catalog, "wiki", "train[:15]"), Some(2));
        assert_eq!(infer_num_examples(&catalog, "wiki", "train[-5:]"), Some(5));
        let plan = maybe_shard_examples(
            &catalog,
            &ShardRequest {
                dataset: "wiki".into(),
                split: "train".into(),
                required_shards: 3,
                shard_index: 2,
                is_training: false,
            },
        )
        .unwrap();
        assert_eq!(
            plan,
            ShardPlan::Native {
                split: "train".into(),
                shard_index: 2,
                num_shards: 3
            }
        );
    }

    #[test]
    fn test_request_from_read_config() {
        let config = ReadConfig::new(false).with_sharding(4, 1).unwrap();
        let request = ShardRequest::from_read_config("glue/cola", "test", &config);
        assert_eq!(request, ShardRequest {
            dataset: "glue/cola".into(),
            split: "test".into(),
            required_shards: 4,
            shard_index: 1,
            is_training: false,
        });
    }

    #[test]
    fn test_request_from_json() {
        let request: ShardRequest = serde_json::from_str(
            r#"{"dataset": "glue/cola", "split": "test", "required_shards": 2, "shard_index": 1, "is_training": true}"#,
        )
        .unwrap();
        assert_eq!(request, ShardRequest::from_read_config("glue/cola", "test", &ReadConfig::new(true).with_sharding(2, 1).unwrap()));
    }
}
