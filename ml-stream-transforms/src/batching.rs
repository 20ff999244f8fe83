//! Fixed-size batching with eval padding, repeat and prefetch

use std::sync::Arc;

use ml_stream_core::source::check_record;
use ml_stream_core::{
    Cardinality, DenseTensor, Dim, Error, FieldSpec, Record, RecordStream, Result, Shape, Signature,
    Source, SourceRef, Tensor, TensorSpec, TransformRef, Value,
};
use ml_stream_parallel::{PrefetchConfig, PrefetchSource};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Builds the record used to pad a short eval batch
pub type PadExampleFn = Arc<dyn Fn(&Signature) -> Result<Record> + Send + Sync>;

/// Configuration of the batch assembler
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchConfig {
    /// Records per batch
    pub global_batch_size: usize,

    /// Training repeats passes and drops remainders; eval pads them
    pub is_training: bool,

    /// Number of passes over the input; unbounded for training and one for eval when unset
    #[serde(default)]
    pub repeat: Option<usize>,

    /// Batches prefetched ahead of the consumer; `Some(0)` disables prefetch
    #[serde(default)]
    pub prefetch_buffer_size: Option<usize>,
}

impl BatchConfig {
    /// Config with no explicit repeat or prefetch depth
    pub fn new(global_batch_size: usize, is_training: bool) -> Self {
        Self {
            global_batch_size,
            is_training,
            repeat: None,
            prefetch_buffer_size: None,
        }
    }

    /// Set the number of passes
    #[must_use]
    pub fn with_repeat(mut self, repeat: usize) -> Self {
        self.repeat = Some(repeat);
        self
    }

    /// Set the prefetch depth
    #[must_use]
    pub fn with_prefetch_buffer_size(mut self, size: usize) -> Self {
        self.prefetch_buffer_size = Some(size);
        self
    }

    /// Check the configuration before any record flows
    pub fn validate(&self) -> Result<()> {
        if self.global_batch_size == 0 {
            return Err(Error::Config("global_batch_size must be positive".into()));
        }
        if self.repeat == Some(0) {
            return Err(Error::Config("repeat must be positive when set".into()));
        }
        Ok(())
    }

    /// Number of passes, `None` meaning unbounded
    pub fn passes(&self) -> Option<usize> {
        match (self.repeat, self.is_training) {
            (Some(n), _) => Some(n),
            (None, true) => None,
            (None, false) => Some(1),
        }
    }
}

/// A record of zeros matching `signature`
///
/// Numeric fields are zero, booleans false and strings empty. Dynamic
/// dimensions get size 0; [`batch`] passes the signature of the short
/// group's first record, so every dimension is concrete there.
pub fn default_pad_example_fn(signature: &Signature) -> Result<Record> {
    let mut record = Record::new();
    for (name, spec) in signature.iter() {
        let value = match spec {
            FieldSpec::Tensor(spec) => {
                if spec.is_ragged() {
                    return Err(Error::shape(name, "cannot build a pad example for a ragged field"));
                }
                let shape = spec
                    .require_known(name)?
                    .iter()
                    .map(|d| d.size().unwrap_or(0))
                    .collect();
                Value::from(DenseTensor::zeros(spec.dtype, shape))
            }
            FieldSpec::Nested(inner) => Value::from(default_pad_example_fn(inner)?),
        };
        record.insert(name, value);
    }
    Ok(record)
}

/// Group records into batches of exactly `global_batch_size`
///
/// Each field is stacked along a new leading axis. Eval passes pad their
/// last short group with records from `pad_example_fn` (zeros by default),
/// called with the signature of that group's first record; training passes
/// drop it. `post_batch_processor` is applied to the batched
/// stream, which is then prefetched per `prefetch_buffer_size`.
pub fn batch(
    config: BatchConfig,
    pad_example_fn: Option<PadExampleFn>,
    post_batch_processor: Option<TransformRef>,
) -> TransformRef {
    let pad_example_fn = pad_example_fn.unwrap_or_else(|| Arc::new(default_pad_example_fn));
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        config.validate()?;
        require_stackable(input.signature())?;

        let pad_example_fn = if config.is_training {
            None
        } else {
            // A pad function that cannot satisfy the declared signature fails here.
            let pad = pad_example_fn(input.signature())?;
            check_record(&pad, input.signature(), "pad_example_fn")?;
            Some(Arc::clone(&pad_example_fn))
        };

        let source = BatchSource::new(input, config.clone(), pad_example_fn);
        info!(
            batch_size = config.global_batch_size,
            is_training = config.is_training,
            passes = ?config.passes(),
            cardinality = %source.cardinality(),
            "batching records"
        );

        let mut batched: SourceRef = Arc::new(source);
        if let Some(processor) = &post_batch_processor {
            batched = processor.apply(batched)?;
        }
        Ok(PrefetchSource::wrap(
            batched,
            PrefetchConfig::from_buffer_size(config.prefetch_buffer_size),
        ))
    })
}

/// Signature with a leading dimension prepended to every tensor field
pub fn batched_signature(signature: &Signature, leading: Dim) -> Signature {
    Signature::new(signature.iter().map(|(name, spec)| {
        let spec = match spec {
            FieldSpec::Tensor(t) => FieldSpec::Tensor(TensorSpec::new(t.dtype, t.shape.with_leading(leading))),
            FieldSpec::Nested(inner) => FieldSpec::Nested(batched_signature(inner, leading)),
        };
        (name.to_string(), spec)
    }))
}

fn require_stackable(signature: &Signature) -> Result<()> {
    for (name, spec) in signature.iter() {
        match spec {
            FieldSpec::Tensor(t) if t.is_ragged() => {
                return Err(Error::shape(name, "cannot batch a ragged field; convert it to dense first"))
            }
            FieldSpec::Tensor(t) if t.shape == Shape::Unknown => {
                return Err(Error::shape(name, "cannot batch a field of unknown shape"))
            }
            FieldSpec::Tensor(_) => {}
            FieldSpec::Nested(inner) => require_stackable(inner)?,
        }
    }
    Ok(())
}

/// Stack the fields of `records` along a new leading axis
pub fn stack_records(mut records: Vec<Record>, signature: &Signature) -> Result<Record> {
    let mut out = Record::new();
    for (name, spec) in signature.iter() {
        let values = records
            .iter_mut()
            .map(|r| r.remove(name).ok_or_else(|| Error::MissingField(name.to_string())))
            .collect::<Result<Vec<_>>>()?;
        let stacked = match spec {
            FieldSpec::Tensor(_) => {
                let parts = values
                    .into_iter()
                    .map(|v| match v {
                        Value::Tensor(Tensor::Dense(t)) => Ok(t),
                        _ => Err(Error::shape(name, "expected a dense tensor")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Value::from(DenseTensor::stack(&parts).map_err(|e| e.in_field(name))?)
            }
            FieldSpec::Nested(inner) => {
                let nested = values
                    .into_iter()
                    .map(|v| match v {
                        Value::Nested(r) => Ok(r),
                        Value::Tensor(_) => Err(Error::TypeMismatch(format!("field '{name}' is not a nested record"))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Value::from(stack_records(nested, inner)?)
            }
        };
        out.insert(name, stacked);
    }
    Ok(out)
}

/// Pad `group` to `batch_size` with copies of a pad record shaped like its first record
fn pad_group(
    group: &mut Vec<Record>,
    batch_size: usize,
    pad_example_fn: &PadExampleFn,
    signature: &Signature,
) -> Result<()> {
    let Some(first) = group.first() else {
        return Ok(());
    };
    let pad = pad_example_fn(&first.signature())?;
    check_record(&pad, signature, "pad_example_fn")?;
    let missing = batch_size.saturating_sub(group.len());
    group.extend(std::iter::repeat(pad).take(missing));
    Ok(())
}

/// Source of fixed-size batches over repeated passes of its input
struct BatchSource {
    input: SourceRef,
    config: BatchConfig,
    pad_example_fn: Option<PadExampleFn>,
    signature: Signature,
}

impl BatchSource {
    fn new(input: SourceRef, config: BatchConfig, pad_example_fn: Option<PadExampleFn>) -> Self {
        let signature = batched_signature(input.signature(), Dim::Fixed(config.global_batch_size));
        Self {
            input,
            config,
            pad_example_fn,
            signature,
        }
    }
}

impl Source for BatchSource {
    fn produce(&self) -> Result<RecordStream> {
        Ok(Box::new(BatchStream {
            input: Arc::clone(&self.input),
            element_signature: self.input.signature().clone(),
            batch_size: self.config.global_batch_size,
            passes: self.config.passes(),
            pad_example_fn: self.pad_example_fn.clone(),
            current: None,
            pass: 0,
            emitted_in_pass: 0,
            done: false,
        }))
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn cardinality(&self) -> Cardinality {
        let bs = self.config.global_batch_size as u64;
        let per_pass = match self.input.cardinality() {
            Cardinality::Finite(n) if self.config.is_training => n / bs,
            Cardinality::Finite(n) => n.div_ceil(bs),
            other => return other,
        };
        match self.config.passes() {
            _ if per_pass == 0 => Cardinality::Finite(0),
            Some(passes) => Cardinality::Finite(per_pass * passes as u64),
            None => Cardinality::Infinite,
        }
    }
}

struct BatchStream {
    input: SourceRef,
    element_signature: Signature,
    batch_size: usize,
    passes: Option<usize>,
    /// Eval only
    pad_example_fn: Option<PadExampleFn>,
    current: Option<RecordStream>,
    pass: usize,
    emitted_in_pass: usize,
    done: bool,
}

impl BatchStream {
    fn fail(&mut self, error: Error) -> Option<Result<Record>> {
        self.done = true;
        self.current = None;
        Some(Err(error))
    }

    fn emit(&mut self, group: Vec<Record>) -> Option<Result<Record>> {
        self.emitted_in_pass += 1;
        match stack_records(group, &self.element_signature) {
            Ok(batch) => Some(Ok(batch)),
            Err(e) => self.fail(e),
        }
    }
}

impl Iterator for BatchStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.current.is_none() {
                if self.passes.is_some_and(|p| self.pass >= p) {
                    self.done = true;
                    return None;
                }
                match self.input.produce() {
                    Ok(stream) => self.current = Some(stream),
                    Err(e) => return self.fail(e),
                }
                self.pass += 1;
                self.emitted_in_pass = 0;
            }

            let mut group = Vec::with_capacity(self.batch_size);
            if let Some(stream) = self.current.as_mut() {
                for item in stream.by_ref().take(self.batch_size) {
                    match item {
                        Ok(record) => group.push(record),
                        Err(e) => return self.fail(e),
                    }
                }
            }
            if group.len() == self.batch_size {
                return self.emit(group);
            }

            // The pass ended with a short group.
            self.current = None;
            if !group.is_empty() {
                if let Some(pad_example_fn) = self.pad_example_fn.clone() {
                    if let Err(e) = pad_group(&mut group, self.batch_size, &pad_example_fn, &self.element_signature) {
                        return self.fail(e);
                    }
                    return self.emit(group);
                }
                debug!(dropped = group.len(), pass = self.pass, "dropping batch remainder");
            }
            if self.emitted_in_pass == 0 {
                if self.passes.is_none() {
                    warn!(pass = self.pass, "pass produced no full batch, ending batched stream");
                }
                self.done = true;
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_stream_core::source::{collect, take};
    use ml_stream_core::{identity, DType, InMemorySource};
    use proptest::prelude::*;
    use test_case::test_case;

    fn text_source(texts: &[&str]) -> SourceRef {
        Arc::new(InMemorySource::new(
            texts
                .iter()
                .enumerate()
                .map(|(index, text)| {
                    Record::new()
                        .with("text", DenseTensor::scalar(*text))
                        .with("index", DenseTensor::scalar(index as i32))
                        .with("is_valid", DenseTensor::scalar(true))
                })
                .collect(),
        ))
    }

    fn texts(batch: &Record) -> Vec<String> {
        batch.dense("text").unwrap().data().as_strings().unwrap().to_vec()
    }

    fn indices(batch: &Record) -> Vec<i32> {
        batch.dense("index").unwrap().data().as_i32().unwrap().to_vec()
    }

    fn valid(batch: &Record) -> Vec<bool> {
        batch.dense("is_valid").unwrap().data().as_bool().unwrap().to_vec()
    }

    #[test_case(false)]
    #[test_case(true)]
    fn test_padding(is_training: bool) {
        let batched = batch(BatchConfig::new(2, is_training), None, None)
            .apply(text_source(&["a", "b", "c"]))
            .unwrap();
        let batches = take(batched.as_ref(), 10).unwrap();
        for (batch_index, b) in batches.iter().enumerate() {
            if is_training || batch_index == 0 {
                assert_eq!(texts(b), vec!["a", "b"]);
                assert_eq!(indices(b), vec![0, 1]);
                assert_eq!(valid(b), vec![true, true]);
            } else {
                assert_eq!(texts(b), vec!["c", ""]);
                assert_eq!(indices(b), vec![2, 0]);
                assert_eq!(valid(b), vec![true, false]);
            }
        }
        assert_eq!(batches.len(), if is_training { 10 } else { 2 });
    }

    #[test_case(false, None, 2)]
    #[test_case(false, Some(1), 2)]
    #[test_case(false, Some(2), 4)]
    #[test_case(true, None, 10)]
    #[test_case(true, Some(1), 1)]
    #[test_case(true, Some(2), 2)]
    fn test_repeat(is_training: bool, repeat: Option<usize>, expected: usize) {
        let mut config = BatchConfig::new(2, is_training);
        config.repeat = repeat;
        let batched = batch(config, None, None).apply(text_source(&["a", "b", "c"])).unwrap();
        let batches = take(batched.as_ref(), 10).unwrap();
        for (batch_index, b) in batches.iter().enumerate() {
            if is_training || batch_index % 2 == 0 {
                assert_eq!(texts(b), vec!["a", "b"]);
            } else {
                assert_eq!(texts(b), vec!["c", ""]);
                assert_eq!(indices(b), vec![2, 0]);
            }
        }
        assert_eq!(batches.len(), expected);
    }

    #[test_case(false, Some(32))]
    #[test_case(false, None)]
    #[test_case(true, Some(32))]
    #[test_case(true, None)]
    #[test_case(true, Some(0))]
    fn test_prefetch_buffer_size(is_training: bool, prefetch_buffer_size: Option<usize>) {
        let mut config = BatchConfig::new(2, is_training);
        config.prefetch_buffer_size = prefetch_buffer_size;
        let batched = batch(config, None, None).apply(text_source(&["a", "b", "c"])).unwrap();
        let batches = take(batched.as_ref(), 4).unwrap();
        assert_eq!(texts(&batches[0]), vec!["a", "b"]);
        assert_eq!(batches.len(), if is_training { 4 } else { 2 });
    }

    #[test_case(false)]
    #[test_case(true)]
    fn test_post_batch_processor(is_training: bool) {
        let batched = batch(BatchConfig::new(2, is_training), None, Some(identity()))
            .apply(text_source(&["a", "b", "c"]))
            .unwrap();
        assert_eq!(
            batched.signature().tensor("text").unwrap().shape,
            Shape::fixed(&[2])
        );
        assert_eq!(take(batched.as_ref(), 1).unwrap().len(), 1);
    }

    #[test]
    fn test_custom_pad_example_fn() {
        let pad: PadExampleFn = Arc::new(|sig: &Signature| {
            let mut record = default_pad_example_fn(sig)?;
            record.insert("index", DenseTensor::scalar(-1i32));
            Ok(record)
        });
        let batched = batch(BatchConfig::new(2, false), Some(pad), None)
            .apply(text_source(&["a", "b", "c"]))
            .unwrap();
        let batches = collect(batched.as_ref()).unwrap();
        assert_eq!(indices(&batches[1]), vec![2, -1]);
    }

    #[test_case(BatchConfig::new(0, false); "zero batch size")]
    #[test_case(BatchConfig::new(2, true).with_repeat(0); "zero repeat")]
    fn test_invalid_config(config: BatchConfig) {
        let result = batch(config, None, None).apply(text_source(&["a"]));
        assert!(result.err().unwrap().is_config());
    }

    #[test]
    fn test_config_from_json() {
        let config: BatchConfig =
            serde_json::from_str(r#"{"global_batch_size": 8, "is_training": true, "repeat": 3}"#).unwrap();
        assert_eq!(config, BatchConfig::new(8, true).with_repeat(3));
    }

    #[test_case(false, None, Cardinality::Finite(2))]
    #[test_case(true, None, Cardinality::Infinite)]
    #[test_case(true, Some(3), Cardinality::Finite(3))]
    #[test_case(false, Some(3), Cardinality::Finite(6))]
    fn test_cardinality(is_training: bool, repeat: Option<usize>, expected: Cardinality) {
        let mut config = BatchConfig::new(2, is_training);
        config.repeat = repeat;
        config.prefetch_buffer_size = Some(0);
        let batched = batch(config, None, None).apply(text_source(&["a", "b", "c"])).unwrap();
        assert_eq!(batched.cardinality(), expected);
    }

    #[test]
    fn test_training_with_too_few_records_ends() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let batched = batch(BatchConfig::new(4, true), None, None)
            .apply(text_source(&["a", "b", "c"]))
            .unwrap();
        assert_eq!(batched.cardinality(), Cardinality::Finite(0));
        assert!(collect(batched.as_ref()).unwrap().is_empty());
    }

    #[test]
    fn test_ragged_field_is_rejected() {
        let source: SourceRef = Arc::new(InMemorySource::new(vec![Record::new().with(
            "a",
            ml_stream_core::RaggedTensor::from_rows(vec![vec![1i32], vec![2, 3]]).unwrap(),
        )]));
        let result = batch(BatchConfig::new(1, false), None, None).apply(source);
        assert!(matches!(result, Err(Error::Shape { field, .. }) if field == "a"));
    }

    #[test]
    fn test_mismatched_shapes_name_field() {
        let source: SourceRef = Arc::new(InMemorySource::new(vec![
            Record::new().with("a", DenseTensor::from_vec(vec![1i32, 2])),
            Record::new().with("a", DenseTensor::from_vec(vec![1i32])),
        ]));
        let batched = batch(BatchConfig::new(2, true).with_repeat(1), None, None)
            .apply(source)
            .unwrap();
        let err = collect(batched.as_ref()).unwrap_err();
        assert!(matches!(err, Error::Shape { field, .. } if field == "a"));
    }

    #[test]
    fn test_eval_padding_with_dynamic_dims() {
        let signature = Signature::from_tensors([
            ("ids", TensorSpec::new(DType::Int32, Shape::from_optional(&[None]))),
            ("weights", TensorSpec::new(DType::Float32, Shape::from_optional(&[None, Some(2)]))),
        ]);
        let records = (0..3i32)
            .map(|i| {
                Record::new()
                    .with("ids", DenseTensor::from_vec(vec![i, i, i]))
                    .with("weights", DenseTensor::from_rows(vec![vec![1.0f32, 2.0]]).unwrap())
            })
            .collect();
        let source: SourceRef = Arc::new(InMemorySource::with_signature(records, signature).unwrap());
        let batched = batch(BatchConfig::new(2, false), None, None).apply(source).unwrap();
        assert_eq!(
            batched.signature().tensor("ids").unwrap().shape,
            Shape::from_optional(&[Some(2), None])
        );

        let batches = collect(batched.as_ref()).unwrap();
        assert_eq!(batches.len(), 2);
        let ids = batches[1].dense("ids").unwrap();
        assert_eq!(ids.shape(), &[2, 3]);
        assert_eq!(ids.data().as_i32().unwrap(), &[2, 2, 2, 0, 0, 0]);
        let weights = batches[1].dense("weights").unwrap();
        assert_eq!(weights.shape(), &[2, 1, 2]);
        assert_eq!(weights.data().as_f32().unwrap(), &[1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_default_pad_example_nested() {
        let inner = Signature::from_tensors([("b", TensorSpec::new(DType::Float32, Shape::from_optional(&[None, Some(3)])))]);
        let sig = Signature::new([("outer", FieldSpec::Nested(inner))]);
        let pad = default_pad_example_fn(&sig).unwrap();
        let b = pad.lookup_path(&["outer", "b"]).unwrap().as_dense().unwrap();
        assert_eq!(b.shape(), &[0, 3]);
    }

    proptest! {
        #[test]
        fn prop_batches_are_never_partial(n in 0usize..40, bs in 1usize..7, is_training: bool) {
            let names: Vec<String> = (0..n).map(|i| format!("t{i}")).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let mut config = BatchConfig::new(bs, is_training).with_repeat(2);
            config.prefetch_buffer_size = Some(0);
            let batched = batch(config, None, None).apply(text_source(&refs)).unwrap();
            let batches = collect(batched.as_ref()).unwrap();
            for b in &batches {
                prop_assert_eq!(b.dense("text").unwrap().leading_dim(), Some(bs));
            }
            let per_pass = if is_training { n / bs } else { n.div_ceil(bs) };
            prop_assert_eq!(batches.len(), 2 * per_pass);
        }
    }
}
