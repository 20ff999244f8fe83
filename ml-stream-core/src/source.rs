//! Source trait and derived sources for record streams

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::record::Record;
use crate::schema::Signature;

/// Number of records a source yields per pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// Exactly this many records
    Finite(u64),

    /// Never exhausts
    Infinite,

    /// Not known without iterating
    Unknown,
}

impl Cardinality {
    /// Exact count, if finite
    pub fn count(&self) -> Option<u64> {
        match self {
            Cardinality::Finite(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether this source is known to yield nothing
    pub fn is_empty(&self) -> bool {
        matches!(self, Cardinality::Finite(0))
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::Finite(n) => write!(f, "{n}"),
            Cardinality::Infinite => write!(f, "infinite"),
            Cardinality::Unknown => write!(f, "unknown"),
        }
    }
}

/// A lazy sequence of records from one pass over a source
pub type RecordStream = Box<dyn Iterator<Item = Result<Record>> + Send>;

/// A restartable factory of record streams
///
/// Each call to [`Source::produce`] starts a fresh pass. Every record of the
/// pass satisfies [`Source::signature`].
pub trait Source: Send + Sync {
    /// Start a new pass over the records
    fn produce(&self) -> Result<RecordStream>;

    /// Signature shared by every record
    fn signature(&self) -> &Signature;

    /// Records per pass, if known
    fn cardinality(&self) -> Cardinality {
        Cardinality::Unknown
    }
}

/// Shared handle to a source
pub type SourceRef = Arc<dyn Source>;

type StreamOp = dyn Fn(RecordStream) -> RecordStream + Send + Sync;

/// A source defined by a stream adapter over another source
///
/// Most transforms return one of these: the adapter is re-applied to a fresh
/// input pass on every `produce`.
pub struct DerivedSource {
    input: SourceRef,
    signature: Signature,
    cardinality: Cardinality,
    op: Arc<StreamOp>,
}

impl DerivedSource {
    /// Wrap `input`, applying `op` to each of its passes
    pub fn new<F>(input: SourceRef, signature: Signature, cardinality: Cardinality, op: F) -> Self
    where
        F: Fn(RecordStream) -> RecordStream + Send + Sync + 'static,
    {
        Self {
            input,
            signature,
            cardinality,
            op: Arc::new(op),
        }
    }

    /// The wrapped source
    pub fn input(&self) -> &SourceRef {
        &self.input
    }
}

impl Source for DerivedSource {
    fn produce(&self) -> Result<RecordStream> {
        let stream = self.input.produce()?;
        Ok((self.op)(stream))
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
}

impl fmt::Debug for DerivedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedSource")
            .field("signature", &self.signature)
            .field("cardinality", &self.cardinality)
            .finish_non_exhaustive()
    }
}

/// Per-record mapping over `input`; cardinality is preserved
pub fn mapped<F>(input: SourceRef, signature: Signature, f: F) -> SourceRef
where
    F: Fn(Record) -> Result<Record> + Send + Sync + 'static,
{
    let cardinality = input.cardinality();
    let f = Arc::new(f);
    Arc::new(DerivedSource::new(input, signature, cardinality, move |stream| {
        let f = Arc::clone(&f);
        stop_on_error(Box::new(stream.map(move |item| item.and_then(|r| f(r)))))
    }))
}

/// Yield the first error of `stream`, then end it
pub fn stop_on_error(stream: RecordStream) -> RecordStream {
    Box::new(StopOnError {
        inner: Some(stream),
    })
}

struct StopOnError {
    inner: Option<RecordStream>,
}

impl Iterator for StopOnError {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.as_mut()?.next();
        match item {
            Some(Ok(record)) => Some(Ok(record)),
            Some(Err(e)) => {
                self.inner = None;
                Some(Err(e))
            }
            None => {
                self.inner = None;
                None
            }
        }
    }
}

/// Drain one pass of `source` into memory
pub fn collect(source: &dyn Source) -> Result<Vec<Record>> {
    source.produce()?.collect()
}

/// Drain at most `limit` records of one pass
pub fn take(source: &dyn Source, limit: usize) -> Result<Vec<Record>> {
    source.produce()?.take(limit).collect()
}

/// Check a record against `signature`, naming the stage on failure
pub fn check_record(record: &Record, signature: &Signature, stage: &str) -> Result<()> {
    record.conforms_to(signature).map_err(|e| match e {
        Error::Shape { field, message } => Error::Shape {
            field,
            message: format!("{message} (after {stage})"),
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemorySource;
    use crate::tensor::DenseTensor;

    fn numbers(n: i32) -> SourceRef {
        Arc::new(InMemorySource::new(
            (0..n).map(|i| Record::new().with("x", DenseTensor::scalar(i))).collect(),
        ))
    }

    #[test]
    fn test_mapped_preserves_cardinality() {
        let source = numbers(3);
        let signature = source.signature().clone();
        let doubled = mapped(source, signature, |r| {
            let v = r.dense("x")?.data().as_i32().map_or(0, |d| d[0]);
            Ok(Record::new().with("x", DenseTensor::scalar(v * 2)))
        });
        assert_eq!(doubled.cardinality(), Cardinality::Finite(3));
        let out = collect(doubled.as_ref()).unwrap();
        assert_eq!(out[2].dense("x").unwrap(), &DenseTensor::scalar(4i32));
    }

    #[test]
    fn test_error_ends_stream() {
        let source = numbers(5);
        let signature = source.signature().clone();
        let failing = mapped(source, signature, |r| {
            if r.dense("x")?.data().as_i32() == Some(&[1][..]) {
                Err(Error::shape("x", "boom"))
            } else {
                Ok(r)
            }
        });
        let items: Vec<_> = failing.produce().unwrap().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[test]
    fn test_produce_restarts() {
        let source = numbers(4);
        assert_eq!(take(source.as_ref(), 2).unwrap().len(), 2);
        assert_eq!(collect(source.as_ref()).unwrap().len(), 4);
    }
}
