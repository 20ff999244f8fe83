//! Leading-axis trimming, padding and greedy packing
//!
//! These transforms treat the leading axis of every field as a sequence of
//! rows. `pack_to_batch` concatenates whole records into one buffer of fixed
//! capacity, emitting the buffer zero-padded whenever the next record does
//! not fit. Records are never split or reordered, so a record longer than the
//! capacity is fatal; put `trim_to_batch` in front of it to avoid that.

use std::sync::Arc;

use ml_stream_core::source::{mapped, stop_on_error};
use ml_stream_core::{
    Cardinality, DType, DenseTensor, DerivedSource, Dim, Error, FieldSpec, Record, RecordStream, Result,
    Scalar, Shape, Signature, SourceRef, Tensor, TensorSpec, TransformRef, Value,
};
use tracing::debug;

/// Dense fields with at least one axis; anything else cannot be cut along rows
fn row_fields(signature: &Signature, op: &str) -> Result<Vec<(String, TensorSpec)>> {
    signature
        .iter()
        .map(|(name, spec)| match spec {
            FieldSpec::Tensor(t) if t.is_ragged() => {
                Err(Error::shape(name, format!("{op} requires dense fields, got {t}")))
            }
            FieldSpec::Tensor(t) if t.shape.rank() == Some(0) => {
                Err(Error::shape(name, format!("{op} requires rank >= 1")))
            }
            FieldSpec::Tensor(t) => Ok((name.to_string(), t.clone())),
            FieldSpec::Nested(_) => Err(Error::shape(name, format!("{op} does not support nested records"))),
        })
        .collect()
}

fn with_leading(fields: &[(String, TensorSpec)], leading: impl Fn(&TensorSpec) -> Shape) -> Signature {
    Signature::from_tensors(
        fields
            .iter()
            .map(|(name, spec)| (name.clone(), TensorSpec::new(spec.dtype, leading(spec)))),
    )
}

/// Truncate every field's leading axis to at most `batch_size` rows
pub fn trim_to_batch(batch_size: usize) -> TransformRef {
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        let fields = row_fields(input.signature(), "trim_to_batch")?;
        let signature = with_leading(&fields, |spec| match spec.shape.dims() {
            Some([Dim::Fixed(n), ..]) if *n > batch_size => spec.shape.replace_leading(Dim::Fixed(batch_size)),
            _ => spec.shape.clone(),
        });
        Ok(mapped(input, signature, move |mut record| {
            for (name, _) in &fields {
                let dense = record.dense(name)?;
                if dense.leading_dim().unwrap_or(0) > batch_size {
                    let trimmed = dense.truncate_rows(batch_size).map_err(|e| e.in_field(name))?;
                    record.insert(name.clone(), trimmed);
                }
            }
            Ok(record)
        }))
    })
}

/// Right-pad every field's leading axis with zeros to exactly `batch_size` rows
///
/// A field already longer than `batch_size` is an error.
pub fn pad_to_batch(batch_size: usize) -> TransformRef {
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        let fields = row_fields(input.signature(), "pad_to_batch")?;
        let signature = with_leading(&fields, |spec| spec.shape.replace_leading(Dim::Fixed(batch_size)));
        Ok(mapped(input, signature, move |mut record| {
            for (name, spec) in &fields {
                let padded = record
                    .dense(name)?
                    .pad_rows(batch_size, &Scalar::zero(spec.dtype))
                    .map_err(|e| e.in_field(name))?;
                record.insert(name.clone(), padded);
            }
            Ok(record)
        }))
    })
}

/// Greedily pack consecutive records into batches of `batch_size` rows
pub fn pack_to_batch(batch_size: usize) -> TransformRef {
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        if batch_size == 0 {
            return Err(Error::Config("pack_to_batch batch_size must be positive".into()));
        }
        let fields = row_fields(input.signature(), "pack_to_batch")?;
        let signature = with_leading(&fields, |spec| spec.shape.replace_leading(Dim::Fixed(batch_size)));
        let cardinality = match input.cardinality() {
            Cardinality::Finite(0) => Cardinality::Finite(0),
            Cardinality::Infinite => Cardinality::Infinite,
            _ => Cardinality::Unknown,
        };
        debug!(batch_size, fields = fields.len(), "packing records");

        let fields: Arc<Vec<(String, DType)>> =
            Arc::new(fields.into_iter().map(|(name, spec)| (name, spec.dtype)).collect());
        Ok(Arc::new(DerivedSource::new(input, signature, cardinality, move |stream| {
            stop_on_error(Box::new(PackStream {
                input: Some(stream),
                buffer: PackBuffer::new(fields.len()),
                fields: Arc::clone(&fields),
                batch_size,
            }))
        })))
    })
}

/// Rows accumulated for the batch being filled
struct PackBuffer {
    /// Per field, the tensors appended so far
    parts: Vec<Vec<DenseTensor>>,

    /// Per field, rows used so far
    offsets: Vec<usize>,

    records: usize,
}

impl PackBuffer {
    fn new(num_fields: usize) -> Self {
        Self {
            parts: vec![Vec::new(); num_fields],
            offsets: vec![0; num_fields],
            records: 0,
        }
    }

    fn fits(&self, lengths: &[usize], capacity: usize) -> bool {
        self.offsets.iter().zip(lengths).all(|(offset, len)| offset + len <= capacity)
    }

    fn push(&mut self, tensors: Vec<DenseTensor>, lengths: &[usize]) {
        for ((parts, offset), (tensor, len)) in self
            .parts
            .iter_mut()
            .zip(self.offsets.iter_mut())
            .zip(tensors.into_iter().zip(lengths))
        {
            parts.push(tensor);
            *offset += len;
        }
        self.records += 1;
    }
}

struct PackStream {
    input: Option<RecordStream>,
    buffer: PackBuffer,
    fields: Arc<Vec<(String, DType)>>,
    batch_size: usize,
}

impl PackStream {
    fn split(&self, mut record: Record) -> Result<(Vec<DenseTensor>, Vec<usize>)> {
        let mut tensors = Vec::with_capacity(self.fields.len());
        let mut lengths = Vec::with_capacity(self.fields.len());
        for (name, _) in self.fields.iter() {
            let tensor = match record.remove(name) {
                Some(Value::Tensor(Tensor::Dense(tensor))) => tensor,
                Some(_) => return Err(Error::shape(name, "expected a dense tensor")),
                None => return Err(Error::MissingField(name.clone())),
            };
            let len = tensor.leading_dim().unwrap_or(0);
            if len > self.batch_size {
                return Err(Error::shape(
                    name,
                    format!("record has {len} rows, more than batch size {}", self.batch_size),
                ));
            }
            tensors.push(tensor);
            lengths.push(len);
        }
        Ok((tensors, lengths))
    }

    fn flush(&mut self) -> Result<Record> {
        let buffer = std::mem::replace(&mut self.buffer, PackBuffer::new(self.fields.len()));
        let mut batch = Record::new();
        for ((name, dtype), parts) in self.fields.iter().zip(buffer.parts) {
            let packed = DenseTensor::concat(&parts)
                .and_then(|t| t.pad_rows(self.batch_size, &Scalar::zero(*dtype)))
                .map_err(|e| e.in_field(name))?;
            batch.insert(name.clone(), packed);
        }
        Ok(batch)
    }
}

impl Iterator for PackStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(item) = self.input.as_mut()?.next() else {
                self.input = None;
                return (self.buffer.records > 0).then(|| self.flush());
            };
            let (tensors, lengths) = match item.and_then(|record| self.split(record)) {
                Ok(parts) => parts,
                Err(e) => return Some(Err(e)),
            };
            if self.buffer.fits(&lengths, self.batch_size) {
                self.buffer.push(tensors, &lengths);
                continue;
            }
            let batch = self.flush();
            self.buffer.push(tensors, &lengths);
            return Some(batch);
        }
    }
}
