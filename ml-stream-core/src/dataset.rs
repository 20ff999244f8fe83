//! In-memory and closure-backed sources

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::record::Record;
use crate::schema::Signature;
use crate::source::{Cardinality, RecordStream, Source};

fn infer_signature(records: &[Record]) -> Result<Signature> {
    let mut iter = records.iter();
    let mut signature = iter.next().map(Record::signature).unwrap_or_default();
    for record in iter {
        signature = signature.relax(&record.signature())?;
    }
    Ok(signature)
}

/// A finite source backed by a shared vector of records
#[derive(Debug, Clone)]
pub struct InMemorySource {
    /// The records yielded on every pass
    records: Arc<Vec<Record>>,

    /// Signature of every record
    signature: Signature,
}

impl InMemorySource {
    /// Create a source, inferring the signature from the records
    ///
    /// Dimensions that differ between records become dynamic. Records with
    /// incompatible field sets or dtypes fall back to the first record's
    /// signature with a warning; use [`InMemorySource::try_new`] to surface
    /// that error.
    pub fn new(records: Vec<Record>) -> Self {
        let signature = infer_signature(&records).unwrap_or_else(|e| {
            warn!(error = %e, records = records.len(), "records disagree on signature, using the first record's");
            records.first().map(Record::signature).unwrap_or_default()
        });
        Self {
            records: Arc::new(records),
            signature,
        }
    }

    /// Create a source, failing if the records do not share a signature
    pub fn try_new(records: Vec<Record>) -> Result<Self> {
        let signature = infer_signature(&records)?;
        Ok(Self {
            records: Arc::new(records),
            signature,
        })
    }

    /// Create a source with an explicit signature; every record must conform
    pub fn with_signature(records: Vec<Record>, signature: Signature) -> Result<Self> {
        for (i, record) in records.iter().enumerate() {
            record.conforms_to(&signature).map_err(|e| match e {
                Error::Shape { field, message } => Error::Shape {
                    field,
                    message: format!("record {i}: {message}"),
                },
                other => other,
            })?;
        }
        Ok(Self {
            records: Arc::new(records),
            signature,
        })
    }

    /// The records in this source
    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

impl Source for InMemorySource {
    fn produce(&self) -> Result<RecordStream> {
        Ok(Box::new(InMemoryScanner {
            records: Arc::clone(&self.records),
            position: 0,
        }))
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::Finite(self.records.len() as u64)
    }
}

/// Scanner over an in-memory source
struct InMemoryScanner {
    /// The records to scan
    records: Arc<Vec<Record>>,

    /// Current position
    position: usize,
}

impl Iterator for InMemoryScanner {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.get(self.position)?.clone();
        self.position += 1;
        Some(Ok(record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.records.len() - self.position;
        (remaining, Some(remaining))
    }
}

type StreamFactory = dyn Fn() -> Result<RecordStream> + Send + Sync;

/// A source whose passes come from a closure
///
/// Used for generated and unbounded streams, and as the seam where external
/// readers plug in.
pub struct FnSource {
    factory: Arc<StreamFactory>,
    signature: Signature,
    cardinality: Cardinality,
}

impl FnSource {
    /// Create a source from a stream factory
    pub fn new<F>(signature: Signature, cardinality: Cardinality, factory: F) -> Self
    where
        F: Fn() -> Result<RecordStream> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            signature,
            cardinality,
        }
    }

    /// Unbounded source repeating `record` forever
    pub fn repeat(record: Record) -> Self {
        let signature = record.signature();
        Self::new(signature, Cardinality::Infinite, move || {
            let record = record.clone();
            Ok(Box::new(std::iter::repeat_with(move || -> Result<Record> { Ok(record.clone()) })))
        })
    }
}

impl Source for FnSource {
    fn produce(&self) -> Result<RecordStream> {
        (self.factory)()
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
}

impl fmt::Debug for FnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSource")
            .field("signature", &self.signature)
            .field("cardinality", &self.cardinality)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DType, Dim, Shape, TensorSpec};
    use crate::tensor::DenseTensor;

    #[test]
    fn test_signature_relaxes_varying_lengths() {
        let source = InMemorySource::new(vec![
            Record::new().with("a", DenseTensor::from_vec(vec![1i32, 2])),
            Record::new().with("a", DenseTensor::from_vec(vec![1i32, 2, 3])),
        ]);
        let spec = source.signature().tensor("a").unwrap();
        assert_eq!(spec.shape, Shape::Known(vec![Dim::Dynamic]));
        assert_eq!(source.cardinality(), Cardinality::Finite(2));
    }

    #[test]
    fn test_try_new_rejects_mixed_fields() {
        let result = InMemorySource::try_new(vec![
            Record::new().with("a", DenseTensor::scalar(1i32)),
            Record::new().with("b", DenseTensor::scalar(1i32)),
        ]);
        assert!(result.unwrap_err().is_config());
    }

    #[test]
    fn test_new_falls_back_to_first_signature() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let records = vec![
            Record::new().with("a", DenseTensor::scalar(1i32)),
            Record::new().with("a", DenseTensor::scalar(1.5f32)),
        ];
        let source = InMemorySource::new(records.clone());
        assert_eq!(source.signature(), &records[0].signature());
        assert_eq!(source.records().len(), 2);
        assert!(InMemorySource::try_new(records).is_err());
    }

    #[test]
    fn test_with_signature_checks_records() {
        let sig = Signature::from_tensors([("a", TensorSpec::new(DType::Int32, Shape::fixed(&[2])))]);
        let bad = vec![Record::new().with("a", DenseTensor::from_vec(vec![1i32, 2, 3]))];
        assert!(InMemorySource::with_signature(bad, sig.clone()).is_err());
        let good = vec![Record::new().with("a", DenseTensor::from_vec(vec![1i32, 2]))];
        assert!(InMemorySource::with_signature(good, sig).is_ok());
    }

    #[test]
    fn test_repeat_is_unbounded() {
        let source = FnSource::repeat(Record::new().with("a", DenseTensor::scalar(7i64)));
        assert_eq!(source.cardinality(), Cardinality::Infinite);
        assert_eq!(source.produce().unwrap().take(100).count(), 100);
    }
}
