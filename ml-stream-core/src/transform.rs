//! Transform trait and combinators

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::record::Record;
use crate::schema::Signature;
use crate::source::{mapped, SourceRef};

/// A stage that turns one source into another
///
/// The output source carries the output signature. Transforms must stay
/// streaming: `apply` builds the new source, records only flow on `produce`.
pub trait Transform: Send + Sync {
    /// Build the output source for `input`
    fn apply(&self, input: SourceRef) -> Result<SourceRef>;
}

impl<F> Transform for F
where
    F: Fn(SourceRef) -> Result<SourceRef> + Send + Sync,
{
    fn apply(&self, input: SourceRef) -> Result<SourceRef> {
        self(input)
    }
}

/// Shared handle to a transform
pub type TransformRef = Arc<dyn Transform>;

/// A chain of transforms applied left to right
pub struct TransformChain {
    /// The transforms in this chain
    transforms: Vec<TransformRef>,
}

impl TransformChain {
    /// Create a new transform chain
    pub fn new(transforms: Vec<TransformRef>) -> Self {
        Self { transforms }
    }

    /// Get a reference to the transforms in this chain
    pub fn transforms(&self) -> &[TransformRef] {
        &self.transforms
    }
}

impl Transform for TransformChain {
    fn apply(&self, input: SourceRef) -> Result<SourceRef> {
        let mut current = input;

        for transform in &self.transforms {
            current = transform.apply(current)?;
        }

        Ok(current)
    }
}

/// Compose transforms; an empty chain is the identity
pub fn chain(transforms: Vec<TransformRef>) -> TransformRef {
    Arc::new(TransformChain::new(transforms))
}

/// Transform returning its input unchanged
pub fn identity() -> TransformRef {
    Arc::new(|input: SourceRef| Ok(input))
}

/// Lift a per-record function into a transform
///
/// `signature_fn` computes the output signature from the input signature
/// without touching data. Mappers whose output shapes cannot be known
/// statically should report [`crate::schema::Shape::Unknown`] for them.
pub fn map_records<S, F>(name: &str, signature_fn: S, record_fn: F) -> TransformRef
where
    S: Fn(&Signature) -> Result<Signature> + Send + Sync + 'static,
    F: Fn(Record) -> Result<Record> + Send + Sync + 'static,
{
    let name = name.to_string();
    let record_fn = Arc::new(record_fn);
    Arc::new(move |input: SourceRef| {
        let signature = signature_fn(input.signature())?;
        debug!(transform = %name, output = %signature, "mapping records");
        let record_fn = Arc::clone(&record_fn);
        Ok(mapped(input, signature, move |record| record_fn(record)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemorySource;
    use crate::schema::{DType, FieldSpec, Shape, TensorSpec};
    use crate::source::collect;
    use crate::tensor::DenseTensor;

    fn source() -> SourceRef {
        Arc::new(InMemorySource::new(vec![
            Record::new().with("a", DenseTensor::scalar(1i32)),
            Record::new().with("a", DenseTensor::scalar(2i32)),
        ]))
    }

    fn add_field(name: &'static str) -> TransformRef {
        map_records(
            name,
            move |sig| {
                let mut out = sig.clone();
                out.insert(name, FieldSpec::Tensor(TensorSpec::new(DType::Bool, Shape::scalar())));
                Ok(out)
            },
            move |record| Ok(record.with(name, DenseTensor::scalar(true))),
        )
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let input = source();
        let output = chain(Vec::new()).apply(Arc::clone(&input)).unwrap();
        assert!(Arc::ptr_eq(&input, &output));
        assert!(Arc::ptr_eq(&input, &identity().apply(Arc::clone(&input)).unwrap()));
    }

    #[test]
    fn test_chain_applies_in_order() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let output = chain(vec![add_field("b"), add_field("c")]).apply(source()).unwrap();
        assert_eq!(output.signature().names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        let records = collect(output.as_ref()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.contains("b") && r.contains("c")));
    }

    #[test]
    fn test_closure_is_transform() {
        let transform = |input: SourceRef| -> Result<SourceRef> { add_field("z").apply(input) };
        let output = transform.apply(source()).unwrap();
        assert!(output.signature().contains("z"));
    }
}
