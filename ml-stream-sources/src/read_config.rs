//! Per-host read configuration

use ml_stream_core::{Error, Result};
use serde::Deserialize;
use tracing::debug;

/// How one host reads its share of a dataset
///
/// Host index and count are always explicit. Outside training every
/// parallelism setting reads as 1 so that record order is reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    /// Number of hosts reading the dataset
    pub num_shards: usize,

    /// Index of this host in `0..num_shards`
    pub shard_index: usize,

    /// Files read concurrently
    pub read_parallelism: usize,

    /// Records decoded concurrently
    pub decode_parallelism: usize,

    /// Whether the read feeds training
    pub is_training: bool,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            num_shards: 1,
            shard_index: 0,
            read_parallelism: 1,
            decode_parallelism: num_cpus::get(),
            is_training: true,
        }
    }
}

impl ReadConfig {
    /// Single-host config with default parallelism
    pub fn new(is_training: bool) -> Self {
        Self {
            is_training,
            ..Self::default()
        }
    }

    /// Read as host `shard_index` of `num_shards`
    pub fn with_sharding(mut self, num_shards: usize, shard_index: usize) -> Result<Self> {
        self.num_shards = num_shards;
        self.shard_index = shard_index;
        self.validate()?;
        Ok(self)
    }

    /// Set file and decode parallelism; ignored outside training
    #[must_use]
    pub fn with_parallelism(mut self, read_parallelism: usize, decode_parallelism: usize) -> Self {
        self.read_parallelism = read_parallelism;
        self.decode_parallelism = decode_parallelism;
        self
    }

    /// Check host index and parallelism
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(Error::Config("num_shards must be positive".into()));
        }
        if self.shard_index >= self.num_shards {
            return Err(Error::Config(format!(
                "shard_index {} out of range for {} shards",
                self.shard_index, self.num_shards
            )));
        }
        if self.read_parallelism == 0 || self.decode_parallelism == 0 {
            return Err(Error::Config("parallelism must be positive".into()));
        }
        debug!(
            num_shards = self.num_shards,
            shard_index = self.shard_index,
            read = self.effective_read_parallelism(),
            decode = self.effective_decode_parallelism(),
            "read config"
        );
        Ok(())
    }

    /// Files read concurrently, 1 outside training
    pub fn effective_read_parallelism(&self) -> usize {
        if self.is_training {
            self.read_parallelism
        } else {
            1
        }
    }

    /// Files interleaved per cycle; follows read parallelism
    pub fn interleave_cycle_length(&self) -> usize {
        self.effective_read_parallelism()
    }

    /// Records decoded concurrently, 1 outside training
    pub fn effective_decode_parallelism(&self) -> usize {
        if self.is_training {
            self.decode_parallelism
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(false)]
    #[test_case(true)]
    fn test_read_config(is_training: bool) {
        let config = ReadConfig::new(is_training).with_parallelism(2, 32);
        config.validate().unwrap();
        assert_eq!(config.num_shards, 1);
        assert_eq!(config.shard_index, 0);
        if is_training {
            assert_eq!(config.effective_decode_parallelism(), 32);
            assert_eq!(config.effective_read_parallelism(), 2);
            assert_eq!(config.interleave_cycle_length(), 2);
        } else {
            assert_eq!(config.effective_decode_parallelism(), 1);
            assert_eq!(config.effective_read_parallelism(), 1);
            assert_eq!(config.interleave_cycle_length(), 1);
        }
    }

    #[test_case(1, 0)]
    #[test_case(16, 4)]
    fn test_custom_sharding(num_shards: usize, shard_index: usize) {
        let config = ReadConfig::new(true).with_sharding(num_shards, shard_index).unwrap();
        assert_eq!(config.num_shards, num_shards);
        assert_eq!(config.shard_index, shard_index);
    }

    #[test_case(0, 0)]
    #[test_case(4, 4)]
    fn test_invalid_sharding(num_shards: usize, shard_index: usize) {
        let result = ReadConfig::new(true).with_sharding(num_shards, shard_index);
        assert!(result.unwrap_err().is_config());
    }

    #[test]
    fn test_default_decode_parallelism_is_cpu_count() {
        assert_eq!(ReadConfig::default().decode_parallelism, num_cpus::get());
    }

    #[test]
    fn test_from_json() {
        let config: ReadConfig =
            serde_json::from_str(r#"{"num_shards": 8, "shard_index": 3, "is_training": false}"#).unwrap();
        assert_eq!(config.num_shards, 8);
        assert_eq!(config.shard_index, 3);
        assert_eq!(config.read_parallelism, 1);
        assert_eq!(config.effective_decode_parallelism(), 1);
        config.validate().unwrap();
    }
}
