//! Fake sources for tests and examples

use std::sync::Arc;

use ml_stream_core::{
    Cardinality, DenseTensor, FnSource, InMemorySource, Record, RecordStream, Result, Signature, Source, SourceRef,
};

/// Source over `examples`; training sources cycle through them forever
///
/// `signature` is checked against every example when given, and inferred
/// from the examples otherwise.
pub fn fake_source(examples: Vec<Record>, signature: Option<Signature>, is_training: bool) -> Result<SourceRef> {
    let source = match signature {
        Some(signature) => InMemorySource::with_signature(examples, signature)?,
        None => InMemorySource::try_new(examples)?,
    };
    if !is_training || source.records().is_empty() {
        return Ok(Arc::new(source));
    }
    let signature = source.signature().clone();
    Ok(Arc::new(FnSource::new(signature, Cardinality::Infinite, move || {
        let source = source.clone();
        Ok(Box::new(
            std::iter::repeat_with(move || source.produce())
                .flat_map(|pass| -> RecordStream {
                    match pass {
                        Ok(stream) => stream,
                        Err(e) => Box::new(std::iter::once(Err(e))),
                    }
                }),
        ))
    })))
}

/// Source of `{"text": "<train|eval> text <i>"}` records
pub fn fake_text_source(is_training: bool, num_examples: usize) -> Result<SourceRef> {
    let prefix = if is_training { "train" } else { "eval" };
    let examples = (0..num_examples)
        .map(|i| Record::new().with("text", DenseTensor::scalar(format!("{prefix} text {i}"))))
        .collect();
    fake_source(examples, None, is_training)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_stream_core::source::{collect, take};
    use ml_stream_core::{DType, Shape, TensorSpec};

    fn text(record: &Record) -> &str {
        &record.dense("text").unwrap().data().as_strings().unwrap()[0]
    }

    #[test]
    fn test_eval_text_source() {
        let source = fake_text_source(false, 2).unwrap();
        assert_eq!(source.cardinality(), Cardinality::Finite(2));
        let records = collect(source.as_ref()).unwrap();
        assert_eq!(records.iter().map(text).collect::<Vec<_>>(), vec!["eval text 0", "eval text 1"]);
    }

    #[test]
    fn test_training_source_cycles() {
        let source = fake_text_source(true, 2).unwrap();
        assert_eq!(source.cardinality(), Cardinality::Infinite);
        let records = take(source.as_ref(), 5).unwrap();
        assert_eq!(
            records.iter().map(text).collect::<Vec<_>>(),
            vec!["train text 0", "train text 1", "train text 0", "train text 1", "train text 0"]
        );
    }

    #[test]
    fn test_explicit_signature_is_checked() {
        let signature = Signature::from_tensors([("a", TensorSpec::new(DType::Int32, Shape::from_optional(&[None])))]);
        let examples = vec![Record::new().with("a", DenseTensor::from_vec(vec![1i32, 2]))];
        let source = fake_source(examples, Some(signature.clone()), false).unwrap();
        assert_eq!(source.signature(), &signature);

        let bad = vec![Record::new().with("a", DenseTensor::scalar(1i32))];
        assert!(fake_source(bad, Some(signature), false).is_err());
    }

    #[test]
    fn test_empty_training_source_is_finite() {
        let source = fake_source(Vec::new(), None, true).unwrap();
        assert_eq!(source.cardinality(), Cardinality::Finite(0));
    }
}
