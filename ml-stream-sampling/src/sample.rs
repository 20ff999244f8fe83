//! Seeded weighted interleaving of several sources
//!
//! Every step draws one source index from a single ChaCha8 stream through a
//! `WeightedIndex` over the raw weights, then pulls the next record of that
//! source. The sampled stream ends as soon as a drawn source has nothing left,
//! even when other sources still hold records. Training restarts exhausted
//! sources instead, so the stream only ends if a restarted source is empty.

use std::sync::Arc;

use ml_stream_core::source::stop_on_error;
use ml_stream_core::{Cardinality, Error, Record, RecordStream, Result, Signature, Source, SourceRef};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::concat::common_signature;

/// Interleave `sources` by `weights`
///
/// Weights must be finite and non-negative and need not sum to one; sources
/// with weight zero are never pulled. `seed = None` draws a seed from OS
/// entropy once, at construction, and logs it.
pub fn sample_from_datasets(
    sources: Vec<SourceRef>,
    weights: Vec<f64>,
    seed: Option<u64>,
    is_training: bool,
) -> Result<SourceRef> {
    if sources.is_empty() {
        return Err(Error::Config("sample_from_datasets requires at least one source".into()));
    }
    if sources.len() != weights.len() {
        return Err(Error::Config(format!(
            "got {} sources but {} weights",
            sources.len(),
            weights.len()
        )));
    }
    if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(Error::Config(format!("weights must be finite and non-negative, got {w}")));
    }
    if weights.iter().sum::<f64>() <= 0.0 {
        return Err(Error::Config("at least one weight must be positive".into()));
    }

    let signature = common_signature(&sources)?;

    let seed = match seed {
        Some(seed) => seed,
        None => {
            let seed: u64 = rand::thread_rng().gen();
            info!(seed, "no sampling seed given, drew one from entropy");
            seed
        }
    };
    let distribution = WeightedIndex::new(&weights).map_err(|e| Error::Config(format!("invalid weights: {e}")))?;
    debug!(sources = sources.len(), ?weights, seed, is_training, "sampling from datasets");

    Ok(Arc::new(SampledSource {
        sources: Arc::new(sources),
        weights,
        distribution,
        seed,
        is_training,
        signature,
    }))
}

struct SampledSource {
    sources: Arc<Vec<SourceRef>>,
    weights: Vec<f64>,
    distribution: WeightedIndex<f64>,
    seed: u64,
    is_training: bool,
    signature: Signature,
}

impl Source for SampledSource {
    fn produce(&self) -> Result<RecordStream> {
        for (i, (source, weight)) in self.sources.iter().zip(&self.weights).enumerate() {
            if *weight > 0.0 && source.cardinality() == Cardinality::Finite(0) {
                return Err(Error::InvalidArgument(format!(
                    "source {i} has zero cardinality but weight {weight}"
                )));
            }
        }
        Ok(stop_on_error(Box::new(SampleStream {
            sources: Arc::clone(&self.sources),
            streams: (0..self.sources.len()).map(|_| None).collect(),
            distribution: self.distribution.clone(),
            rng: ChaCha8Rng::seed_from_u64(self.seed),
            is_training: self.is_training,
            done: false,
        })))
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn cardinality(&self) -> Cardinality {
        if self.is_training {
            Cardinality::Infinite
        } else {
            Cardinality::Unknown
        }
    }
}

struct SampleStream {
    sources: Arc<Vec<SourceRef>>,
    /// Started lazily on first draw
    streams: Vec<Option<RecordStream>>,
    distribution: WeightedIndex<f64>,
    rng: ChaCha8Rng,
    is_training: bool,
    done: bool,
}

impl SampleStream {
    fn pull(&mut self, index: usize) -> Result<Option<Record>> {
        let stream = match self.streams[index].take() {
            Some(stream) => stream,
            None => self.sources[index].produce()?,
        };
        self.streams[index].insert(stream).next().transpose()
    }
}

impl Iterator for SampleStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let index = self.distribution.sample(&mut self.rng);
        let mut pulled = self.pull(index);
        if self.is_training && matches!(pulled, Ok(None)) {
            debug!(source = index, "restarting exhausted source");
            self.streams[index] = None;
            pulled = self.pull(index);
            if matches!(pulled, Ok(None)) {
                warn!(source = index, "restarted source produced no records");
            }
        }
        match pulled {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                debug!(source = index, "sampled source exhausted, ending stream");
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_stream_core::source::{collect, take};
    use ml_stream_core::{DenseTensor, InMemorySource, Shape};
    use proptest::prelude::*;
    use test_case::test_case;

    fn text_source(texts: &[&str]) -> SourceRef {
        let records: Vec<Record> = texts
            .iter()
            .map(|t| Record::new().with("text", DenseTensor::scalar(*t)))
            .collect();
        let signature = Record::new().with("text", DenseTensor::scalar("")).signature();
        Arc::new(InMemorySource::with_signature(records, signature).unwrap())
    }

    fn texts(records: &[Record]) -> Vec<String> {
        records
            .iter()
            .map(|r| r.dense("text").unwrap().data().as_strings().unwrap()[0].clone())
            .collect()
    }

    fn three_sources() -> Vec<SourceRef> {
        vec![
            text_source(&["a", "b", "c", "d", "e"]),
            text_source(&["g", "h"]),
            text_source(&["w", "x", "y", "z"]),
        ]
    }

    #[test_case(vec![1.0, 0.0, 0.0], &["a", "b", "c", "d", "e"])]
    #[test_case(vec![0.0, 1.0, 0.0], &["g", "h"])]
    #[test_case(vec![0.0, 0.0, 1.0], &["w", "x", "y", "z"])]
    fn test_sampling_basic(weights: Vec<f64>, expected: &[&str]) {
        let sampled = sample_from_datasets(three_sources(), weights, Some(1), false).unwrap();
        assert_eq!(texts(&collect(sampled.as_ref()).unwrap()), expected);
    }

    #[test_case(vec![0.0, 1.0, 0.0])]
    #[test_case(vec![0.5, 0.5, 0.0])]
    fn test_zero_cardinality_source_is_an_error(weights: Vec<f64>) {
        let sources = vec![text_source(&["a", "b", "c"]), text_source(&[]), text_source(&["y", "z"])];
        let sampled = sample_from_datasets(sources, weights, None, false).unwrap();
        assert!(matches!(sampled.produce(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_zero_cardinality_source_with_zero_weight_is_never_pulled() {
        let sources = vec![text_source(&["a", "b", "c"]), text_source(&[]), text_source(&["y", "z"])];
        let sampled = sample_from_datasets(sources, vec![1.0, 0.0, 0.0], None, false).unwrap();
        assert_eq!(texts(&collect(sampled.as_ref()).unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_seed_is_deterministic() {
        let weights = vec![1.0 / 3.0; 3];
        let first = sample_from_datasets(three_sources(), weights.clone(), Some(1), false).unwrap();
        let second = sample_from_datasets(three_sources(), weights, Some(1), false).unwrap();
        let first = texts(&collect(first.as_ref()).unwrap());
        assert_eq!(first, texts(&collect(second.as_ref()).unwrap()));
        assert_eq!(first, texts(&collect(second.as_ref()).unwrap()));
    }

    #[test]
    fn test_training_restarts_sources() {
        let sampled = sample_from_datasets(three_sources(), vec![1.0, 0.0, 0.0], Some(7), true).unwrap();
        assert_eq!(sampled.cardinality(), Cardinality::Infinite);
        let records = take(sampled.as_ref(), 12).unwrap();
        assert_eq!(
            texts(&records),
            vec!["a", "b", "c", "d", "e", "a", "b", "c", "d", "e", "a", "b"]
        );
    }

    #[test_case(Vec::new(), Vec::new(); "no sources")]
    #[test_case(three_sources(), vec![1.0, 1.0]; "length mismatch")]
    #[test_case(three_sources(), vec![1.0, -1.0, 1.0]; "negative weight")]
    #[test_case(three_sources(), vec![1.0, f64::NAN, 1.0]; "nan weight")]
    #[test_case(three_sources(), vec![0.0, 0.0, 0.0]; "all zero")]
    fn test_invalid_configuration(sources: Vec<SourceRef>, weights: Vec<f64>) {
        let result = sample_from_datasets(sources, weights, Some(1), false);
        assert!(result.err().unwrap().is_config());
    }

    #[test]
    fn test_mismatched_signatures() {
        let other: SourceRef = Arc::new(InMemorySource::new(vec![Record::new().with("id", DenseTensor::scalar(1i32))]));
        let result = sample_from_datasets(vec![text_source(&["a"]), other], vec![1.0, 1.0], Some(1), false);
        assert!(result.err().unwrap().is_config());
    }

    #[test]
    fn test_differing_lengths_become_dynamic() {
        let short: SourceRef = Arc::new(InMemorySource::new(vec![
            Record::new().with("ids", DenseTensor::from_vec(vec![1i32, 2]));
            4
        ]));
        let long: SourceRef = Arc::new(InMemorySource::new(vec![
            Record::new().with("ids", DenseTensor::from_vec(vec![1i32, 2, 3]));
            4
        ]));
        let sampled = sample_from_datasets(vec![long, short], vec![0.5, 0.5], Some(3), false).unwrap();
        assert_eq!(sampled.signature().tensor("ids").unwrap().shape, Shape::from_optional(&[None]));
        for record in collect(sampled.as_ref()).unwrap() {
            let len = record.dense("ids").unwrap().shape()[0];
            assert!(len == 2 || len == 3);
        }
    }

    #[test]
    fn test_unseeded_sampling_logs_seed() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let sampled = sample_from_datasets(three_sources(), vec![1.0, 1.0, 1.0], None, false).unwrap();
        assert!(!collect(sampled.as_ref()).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_sampled_stream_preserves_per_source_order(seed: u64, w0 in 0.0f64..1.0, w1 in 0.01f64..1.0) {
            let sampled = sample_from_datasets(three_sources(), vec![w0, w1, 0.0], Some(seed), false).unwrap();
            let out = texts(&collect(sampled.as_ref()).unwrap());
            let from_first: Vec<&str> = out.iter().map(String::as_str).filter(|t| "abcde".contains(*t)).collect();
            let from_second: Vec<&str> = out.iter().map(String::as_str).filter(|t| "gh".contains(*t)).collect();
            prop_assert_eq!(&from_first[..], &["a", "b", "c", "d", "e"][..from_first.len()]);
            prop_assert_eq!(&from_second[..], &["g", "h"][..from_second.len()]);
            prop_assert!(from_first.len() == 5 || from_second.len() == 2 || out.is_empty());
            prop_assert!(out.iter().all(|t| !"wxyz".contains(t.as_str())));
        }
    }
}
