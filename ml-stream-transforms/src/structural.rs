//! Structural transforms: rename, unpack, drop, squeeze, extract and add fields
//!
//! None of these change the number of records. Each computes its output
//! signature up front from the input signature, so misconfigured pipelines
//! fail when the transform is applied rather than mid-epoch.

use std::ops::Range;
use std::sync::Arc;

use ml_stream_core::source::{check_record, mapped, stop_on_error};
use ml_stream_core::{
    DerivedSource, Dim, Error, FieldSpec, Record, Result, Shape, Signature, SourceRef, TensorSpec,
    TransformRef, Value,
};
use tracing::debug;

/// Rename fields, optionally filling absent ones with a default
///
/// `mapping` pairs each output key with the input key it reads. A reference
/// that is `None`, empty, or absent from the input is replaced by
/// `default_value`; without a default the output key is omitted. With
/// `retain_original_inputs` the input fields are kept as well and renamed
/// keys win on conflict. An empty mapping is the identity.
pub fn rekey(
    mapping: Vec<(String, Option<String>)>,
    default_value: Option<Value>,
    retain_original_inputs: bool,
) -> TransformRef {
    let mapping = Arc::new(mapping);
    let default_value = Arc::new(default_value);
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        if mapping.is_empty() {
            return Ok(input);
        }
        let signature = rekey_signature(
            input.signature(),
            &mapping,
            (*default_value).as_ref(),
            retain_original_inputs,
        );
        debug!(output = %signature, "rekeyed signature");
        let mapping = Arc::clone(&mapping);
        let default_value = Arc::clone(&default_value);
        Ok(mapped(input, signature, move |record| {
            Ok(rekey_record(
                record,
                &mapping,
                (*default_value).as_ref(),
                retain_original_inputs,
            ))
        }))
    })
}

fn resolve_reference<'a>(reference: &'a Option<String>) -> Option<&'a str> {
    reference.as_deref().filter(|r| !r.is_empty())
}

fn rekey_signature(
    input: &Signature,
    mapping: &[(String, Option<String>)],
    default_value: Option<&Value>,
    retain: bool,
) -> Signature {
    let mut out = if retain { input.clone() } else { Signature::default() };
    for (out_key, reference) in mapping {
        let spec = resolve_reference(reference)
            .and_then(|r| input.get(r).cloned())
            .or_else(|| default_value.map(Value::spec));
        if let Some(spec) = spec {
            out.insert(out_key.clone(), spec);
        }
    }
    out
}

fn rekey_record(
    record: Record,
    mapping: &[(String, Option<String>)],
    default_value: Option<&Value>,
    retain: bool,
) -> Record {
    let mut out = if retain { record.clone() } else { Record::new() };
    for (out_key, reference) in mapping {
        let value = resolve_reference(reference)
            .and_then(|r| record.get(r))
            .or(default_value);
        if let Some(value) = value {
            out.insert(out_key.clone(), value.clone());
        }
    }
    out
}

/// Copy values found at nested paths into top-level fields
///
/// Each entry maps an output key to a path of nested field names. Original
/// fields are kept.
pub fn unpack(path_map: Vec<(String, Vec<String>)>) -> TransformRef {
    let path_map = Arc::new(path_map);
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        let mut signature = input.signature().clone();
        for (out_key, path) in path_map.iter() {
            let spec = input.signature().lookup_path(path)?.clone();
            signature.insert(out_key.clone(), spec);
        }
        let path_map = Arc::clone(&path_map);
        Ok(mapped(input, signature, move |mut record| {
            for (out_key, path) in path_map.iter() {
                let value = record.lookup_path(path)?.clone();
                record.insert(out_key.clone(), value);
            }
            Ok(record)
        }))
    })
}

/// Drop the named fields; names that are absent are ignored
pub fn remove_fields(fields: Vec<String>) -> TransformRef {
    let fields = Arc::new(fields);
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        let mut signature = input.signature().clone();
        for field in fields.iter() {
            signature.remove(field);
        }
        let fields = Arc::clone(&fields);
        Ok(mapped(input, signature, move |mut record| {
            for field in fields.iter() {
                record.remove(field);
            }
            Ok(record)
        }))
    })
}

/// Axes to squeeze from one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqueezeAxis {
    /// A single axis
    One(usize),

    /// Several axes
    Many(Vec<usize>),

    /// Every axis of size 1
    All,
}

/// Axes resolved against a field's declared shape
#[derive(Debug, Clone)]
enum SqueezePlan {
    /// Squeeze exactly these axes
    Axes(Vec<usize>),

    /// Shape not fully known; squeeze whatever is size 1 at runtime
    AllAtRuntime,
}

fn plan_squeeze(field: &str, spec: &TensorSpec, axis: &SqueezeAxis) -> Result<(SqueezePlan, Shape)> {
    if spec.is_ragged() {
        return Err(Error::shape(field, "cannot squeeze a ragged tensor"));
    }
    let axes = match axis {
        SqueezeAxis::One(a) => vec![*a],
        SqueezeAxis::Many(axes) => axes.clone(),
        SqueezeAxis::All => {
            return Ok(match spec.shape.dims() {
                Some(dims) if spec.shape.is_fully_defined() => {
                    let axes: Vec<usize> = dims
                        .iter()
                        .enumerate()
                        .filter(|(_, d)| **d == Dim::Fixed(1))
                        .map(|(i, _)| i)
                        .collect();
                    let shape = squeeze_dims(dims, &axes);
                    (SqueezePlan::Axes(axes), shape)
                }
                _ => (SqueezePlan::AllAtRuntime, Shape::Unknown),
            });
        }
    };
    let shape = match spec.shape.dims() {
        Some(dims) => {
            for &a in &axes {
                match dims.get(a) {
                    Some(Dim::Fixed(1) | Dim::Dynamic) => {}
                    Some(Dim::Fixed(n)) => {
                        return Err(Error::shape(field, format!("cannot squeeze axis {a} of size {n}")))
                    }
                    None => {
                        return Err(Error::shape(
                            field,
                            format!("axis {a} is out of range for rank {}", dims.len()),
                        ))
                    }
                }
            }
            squeeze_dims(dims, &axes)
        }
        None => Shape::Unknown,
    };
    Ok((SqueezePlan::Axes(axes), shape))
}

fn squeeze_dims(dims: &[Dim], axes: &[usize]) -> Shape {
    Shape::Known(
        dims.iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, d)| *d)
            .collect(),
    )
}

/// Remove size-1 axes from the named fields; other fields are untouched
///
/// Squeezing an axis whose size is not 1 is a shape error, raised when the
/// transform is applied if the size is static and per record otherwise.
pub fn squeeze_fields(axes: Vec<(String, SqueezeAxis)>) -> TransformRef {
    let axes = Arc::new(axes);
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        let mut signature = input.signature().clone();
        let mut plans = Vec::with_capacity(axes.len());
        for (field, axis) in axes.iter() {
            let spec = input.signature().tensor(field)?;
            let (plan, shape) = plan_squeeze(field, spec, axis)?;
            signature.insert(field.clone(), FieldSpec::Tensor(TensorSpec::new(spec.dtype, shape)));
            plans.push((field.clone(), plan));
        }
        let plans = Arc::new(plans);
        Ok(mapped(input, signature, move |mut record| {
            for (field, plan) in plans.iter() {
                let tensor = record.dense(field)?;
                let squeezed = match plan {
                    SqueezePlan::Axes(axes) => tensor.squeeze(axes),
                    SqueezePlan::AllAtRuntime => {
                        let ones: Vec<usize> = tensor
                            .shape()
                            .iter()
                            .enumerate()
                            .filter(|&(_, &d)| d == 1)
                            .map(|(i, _)| i)
                            .collect();
                        tensor.squeeze(&ones)
                    }
                }
                .map_err(|e| e.in_field(field))?;
                record.insert(field.clone(), squeezed);
            }
            Ok(record)
        }))
    })
}

/// Position or range along the leading axis of a sequence field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceIndex {
    /// One element; the leading axis is dropped
    Index(usize),

    /// A contiguous run, clamped to the sequence length; rank is kept
    Slice(Range<usize>),
}

/// Select from the sequence in `in_key` into `out_key`
pub fn extract_from_sequence(in_key: &str, out_key: &str, idx: SequenceIndex) -> TransformRef {
    let in_key = in_key.to_string();
    let out_key = out_key.to_string();
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        let spec = input.signature().tensor(&in_key)?;
        if spec.is_ragged() {
            return Err(Error::shape(&in_key, "cannot extract from a ragged tensor"));
        }
        let dims = spec.require_known(&in_key)?;
        let (leading, rest) = dims
            .split_first()
            .ok_or_else(|| Error::shape(&in_key, "cannot extract from a scalar"))?;
        let shape = match &idx {
            SequenceIndex::Index(i) => {
                if let Dim::Fixed(n) = leading {
                    if i >= n {
                        return Err(Error::shape(
                            &in_key,
                            format!("index {i} is out of range for length {n}"),
                        ));
                    }
                }
                Shape::Known(rest.to_vec())
            }
            SequenceIndex::Slice(range) => {
                let len = match leading {
                    Dim::Fixed(n) => Dim::Fixed(range.end.min(*n).saturating_sub(range.start)),
                    Dim::Dynamic => Dim::Dynamic,
                };
                Shape::Known(std::iter::once(len).chain(rest.iter().copied()).collect())
            }
        };
        let mut signature = input.signature().clone();
        signature.insert(out_key.clone(), FieldSpec::Tensor(TensorSpec::new(spec.dtype, shape)));

        let (in_key, out_key, idx) = (in_key.clone(), out_key.clone(), idx.clone());
        Ok(mapped(input, signature, move |mut record| {
            let tensor = record.dense(&in_key)?;
            let rows = tensor.leading_dim().unwrap_or(0);
            let selected = match &idx {
                SequenceIndex::Index(i) => tensor.index_row(*i).map_err(|_| {
                    Error::shape(&in_key, format!("index {i} is out of range for length {rows}"))
                })?,
                SequenceIndex::Slice(range) => {
                    let end = range.end.min(rows);
                    tensor.slice_rows(range.start.min(end)..end)?
                }
            };
            record.insert(out_key.clone(), selected);
            Ok(record)
        }))
    })
}

/// Add constant fields to every record
pub fn add_static_fields(key_map: Vec<(String, Value)>) -> TransformRef {
    let key_map = Arc::new(key_map);
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        let mut signature = input.signature().clone();
        for (key, value) in key_map.iter() {
            signature.insert(key.clone(), value.spec());
        }
        let key_map = Arc::clone(&key_map);
        Ok(mapped(input, signature, move |mut record| {
            for (key, value) in key_map.iter() {
                record.insert(key.clone(), value.clone());
            }
            Ok(record)
        }))
    })
}

/// Restore field specs that `transform` loses
///
/// Output fields that also exist in the input take their input spec, and
/// each `out_key -> in_key` entry of `key_map` gives `out_key` the spec of
/// `in_key`. Values are not altered; a record that does not fit the restored
/// signature is a shape error.
pub fn preserve_element_spec(transform: TransformRef, key_map: Vec<(String, String)>) -> TransformRef {
    let key_map = Arc::new(key_map);
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        let original = input.signature().clone();
        let output = transform.apply(input)?;

        let mut signature = output.signature().clone();
        let shared: Vec<String> = signature
            .names()
            .filter(|name| original.contains(name))
            .map(str::to_string)
            .collect();
        for name in shared {
            if let Some(spec) = original.get(&name) {
                signature.insert(name, spec.clone());
            }
        }
        for (out_key, in_key) in key_map.iter() {
            if !signature.contains(out_key) {
                return Err(Error::MissingField(out_key.clone()));
            }
            let spec = original
                .get(in_key)
                .ok_or_else(|| Error::MissingField(in_key.clone()))?;
            signature.insert(out_key.clone(), spec.clone());
        }
        debug!(restored = %signature, "preserving element spec");

        let checked = signature.clone();
        let cardinality = output.cardinality();
        Ok(Arc::new(DerivedSource::new(output, signature, cardinality, move |stream| {
            let checked = checked.clone();
            stop_on_error(Box::new(stream.map(move |item: Result<Record>| -> Result<Record> {
                let record = item?;
                check_record(&record, &checked, "preserve_element_spec")?;
                Ok(record)
            })))
        })))
    })
}
