//! Shape reconciliation: ragged-to-dense conversion and trim-and-pad

use std::sync::Arc;

use ml_stream_core::source::mapped;
use ml_stream_core::{
    DenseTensor, Dim, Error, FieldSpec, Result, Scalar, Shape, SourceRef, Tensor, TensorSpec,
    TransformRef,
};
use tracing::debug;

/// Convert ragged fields to dense, padding with zeros
///
/// `feature_shapes` gives one bound per axis of each named field. `None`
/// keeps the leading axis as-is and sizes ragged axes by their longest row;
/// `Some(n)` pads or truncates that axis to exactly `n`. Dense fields and
/// fields not named pass through unchanged.
pub fn ragged_to_tensor(feature_shapes: Vec<(String, Vec<Option<usize>>)>) -> TransformRef {
    let feature_shapes = Arc::new(feature_shapes);
    Arc::new(move |input: SourceRef| -> Result<SourceRef> {
        let mut signature = input.signature().clone();
        let mut conversions = Vec::new();
        for (field, bounds) in feature_shapes.iter() {
            let spec = input.signature().tensor(field)?;
            if !spec.is_ragged() {
                continue;
            }
            let dims = spec.require_known(field)?;
            if bounds.len() != dims.len() {
                return Err(Error::shape(
                    field,
                    format!("expected {} bounds for shape {}, got {}", dims.len(), spec.shape, bounds.len()),
                ));
            }
            let out: Vec<Dim> = dims
                .iter()
                .zip(bounds)
                .enumerate()
                .map(|(axis, (dim, bound))| match bound {
                    Some(n) => Dim::Fixed(*n),
                    None if axis == 0 || axis > spec.ragged_rank => *dim,
                    None => Dim::Dynamic,
                })
                .collect();
            signature.insert(
                field.clone(),
                FieldSpec::Tensor(TensorSpec::new(spec.dtype, Shape::Known(out))),
            );
            conversions.push((field.clone(), bounds.clone()));
        }
        debug!(fields = conversions.len(), "converting ragged fields to dense");

        let conversions = Arc::new(conversions);
        Ok(mapped(input, signature, move |mut record| {
            for (field, bounds) in conversions.iter() {
                let dense = match record.tensor(field)? {
                    Tensor::Ragged(ragged) => {
                        let zero = Scalar::zero(ragged.dtype());
                        let inner = &bounds[1..=ragged.ragged_rank()];
                        let dense = ragged.to_dense(inner, &zero).map_err(|e| e.in_field(field))?;
                        match bounds[0] {
                            Some(rows) => fit_rows(&dense, rows, &zero).map_err(|e| e.in_field(field))?,
                            None => dense,
                        }
                    }
                    Tensor::Dense(_) => continue,
                };
                record.insert(field.clone(), dense);
            }
            Ok(record)
        }))
    })
}

fn fit_rows(tensor: &DenseTensor, rows: usize, fill: &Scalar) -> Result<DenseTensor> {
    if tensor.leading_dim().unwrap_or(0) > rows {
        tensor.truncate_rows(rows)
    } else {
        tensor.pad_rows(rows, fill)
    }
}

/// Set the innermost axis of `tensor` to exactly `max_len`
///
/// Longer rows are truncated and shorter ones right-padded with `pad_id`;
/// outer dimensions are untouched. Ragged tensors are densified first, with
/// outer ragged axes sized by their longest row.
pub fn trim_and_pad_tensor(tensor: &Tensor, max_len: usize, pad_id: &Scalar) -> Result<DenseTensor> {
    match tensor {
        Tensor::Dense(dense) => {
            if dense.rank() == 0 {
                return Err(Error::shape("", "trim_and_pad_tensor requires rank >= 1"));
            }
            dense.resize_last_axis(max_len, pad_id)
        }
        Tensor::Ragged(ragged) if ragged.values().rank() == 1 => {
            let mut bounds = vec![None; ragged.ragged_rank() - 1];
            bounds.push(Some(max_len));
            ragged.to_dense(&bounds, pad_id)
        }
        Tensor::Ragged(ragged) => ragged
            .to_dense(&vec![None; ragged.ragged_rank()], pad_id)?
            .resize_last_axis(max_len, pad_id),
    }
}
