//! Dense and ragged tensors with typed row-major storage

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{DType, Dim, Shape, TensorSpec};

/// Typed flat storage backing a tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    /// Boolean values
    Bool(Vec<bool>),

    /// 32-bit integers
    Int32(Vec<i32>),

    /// 64-bit integers
    Int64(Vec<i64>),

    /// 32-bit floats
    Float32(Vec<f32>),

    /// 64-bit floats
    Float64(Vec<f64>),

    /// Strings
    String(Vec<String>),
}

/// Apply the same expression to the vector inside any `TensorData` variant,
/// rebuilding a `TensorData` of the same variant.
macro_rules! map_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            TensorData::Bool($v) => TensorData::Bool($body),
            TensorData::Int32($v) => TensorData::Int32($body),
            TensorData::Int64($v) => TensorData::Int64($body),
            TensorData::Float32($v) => TensorData::Float32($body),
            TensorData::Float64($v) => TensorData::Float64($body),
            TensorData::String($v) => TensorData::String($body),
        }
    };
}

/// Evaluate an expression against the vector inside any `TensorData` variant.
macro_rules! with_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            TensorData::Bool($v) => $body,
            TensorData::Int32($v) => $body,
            TensorData::Int64($v) => $body,
            TensorData::Float32($v) => $body,
            TensorData::Float64($v) => $body,
            TensorData::String($v) => $body,
        }
    };
}

impl TensorData {
    /// Element type of the storage
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Bool(_) => DType::Bool,
            TensorData::Int32(_) => DType::Int32,
            TensorData::Int64(_) => DType::Int64,
            TensorData::Float32(_) => DType::Float32,
            TensorData::Float64(_) => DType::Float64,
            TensorData::String(_) => DType::String,
        }
    }

    /// Number of stored elements
    pub fn len(&self) -> usize {
        with_data!(self, v => v.len())
    }

    /// Whether no elements are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `n` zero values (`false`, `0`, `0.0`, `""`)
    pub fn zeros(dtype: DType, n: usize) -> Self {
        match dtype {
            DType::Bool => TensorData::Bool(vec![false; n]),
            DType::Int32 => TensorData::Int32(vec![0; n]),
            DType::Int64 => TensorData::Int64(vec![0; n]),
            DType::Float32 => TensorData::Float32(vec![0.0; n]),
            DType::Float64 => TensorData::Float64(vec![0.0; n]),
            DType::String => TensorData::String(vec![String::new(); n]),
        }
    }

    /// `n` copies of `fill`, converted to `dtype`
    pub fn filled(dtype: DType, n: usize, fill: &Scalar) -> Result<Self> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let data = match (dtype, fill) {
            (DType::Bool, Scalar::Bool(v)) => TensorData::Bool(vec![*v; n]),
            (DType::Int32, Scalar::Int(v)) => {
                let v = i32::try_from(*v).map_err(|_| {
                    Error::TypeMismatch(format!("fill value {v} does not fit in int32"))
                })?;
                TensorData::Int32(vec![v; n])
            }
            (DType::Int64, Scalar::Int(v)) => TensorData::Int64(vec![*v; n]),
            (DType::Float32, Scalar::Int(v)) => TensorData::Float32(vec![*v as f32; n]),
            (DType::Float32, Scalar::Float(v)) => TensorData::Float32(vec![*v as f32; n]),
            (DType::Float64, Scalar::Int(v)) => TensorData::Float64(vec![*v as f64; n]),
            (DType::Float64, Scalar::Float(v)) => TensorData::Float64(vec![*v; n]),
            (DType::String, Scalar::Str(v)) => TensorData::String(vec![v.clone(); n]),
            (dtype, fill) => {
                return Err(Error::TypeMismatch(format!(
                    "cannot fill a {dtype} tensor with {fill:?}"
                )))
            }
        };
        Ok(data)
    }

    /// Copy of the elements in `range`
    pub fn slice(&self, range: Range<usize>) -> Self {
        map_data!(self, v => v[range].to_vec())
    }

    /// Append all elements of `other`, which must have the same dtype
    pub fn extend_from(&mut self, other: &TensorData) -> Result<()> {
        match (self, other) {
            (TensorData::Bool(a), TensorData::Bool(b)) => a.extend_from_slice(b),
            (TensorData::Int32(a), TensorData::Int32(b)) => a.extend_from_slice(b),
            (TensorData::Int64(a), TensorData::Int64(b)) => a.extend_from_slice(b),
            (TensorData::Float32(a), TensorData::Float32(b)) => a.extend_from_slice(b),
            (TensorData::Float64(a), TensorData::Float64(b)) => a.extend_from_slice(b),
            (TensorData::String(a), TensorData::String(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(Error::TypeMismatch(format!(
                    "cannot append {} values to a {} tensor",
                    b.dtype(),
                    a.dtype()
                )))
            }
        }
        Ok(())
    }

    /// Append elements `range` of `other`
    pub fn extend_from_range(&mut self, other: &TensorData, range: Range<usize>) -> Result<()> {
        self.extend_from(&other.slice(range))
    }

    /// Append `n` copies of `fill`
    pub fn extend_filled(&mut self, n: usize, fill: &Scalar) -> Result<()> {
        let filler = TensorData::filled(self.dtype(), n, fill)?;
        self.extend_from(&filler)
    }

    /// Empty storage of the same dtype with room for `capacity` elements
    pub fn empty_like(&self, capacity: usize) -> Self {
        map_data!(self, _v => Vec::with_capacity(capacity))
    }

    /// Borrow as `i32` values
    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            TensorData::Int32(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow as `i64` values
    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            TensorData::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow as `f32` values
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TensorData::Float32(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow as booleans
    pub fn as_bool(&self) -> Option<&[bool]> {
        match self {
            TensorData::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow as strings
    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            TensorData::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Vec<bool>> for TensorData {
    fn from(v: Vec<bool>) -> Self {
        TensorData::Bool(v)
    }
}

impl From<Vec<i32>> for TensorData {
    fn from(v: Vec<i32>) -> Self {
        TensorData::Int32(v)
    }
}

impl From<Vec<i64>> for TensorData {
    fn from(v: Vec<i64>) -> Self {
        TensorData::Int64(v)
    }
}

impl From<Vec<f32>> for TensorData {
    fn from(v: Vec<f32>) -> Self {
        TensorData::Float32(v)
    }
}

impl From<Vec<f64>> for TensorData {
    fn from(v: Vec<f64>) -> Self {
        TensorData::Float64(v)
    }
}

impl From<Vec<String>> for TensorData {
    fn from(v: Vec<String>) -> Self {
        TensorData::String(v)
    }
}

impl From<Vec<&str>> for TensorData {
    fn from(v: Vec<&str>) -> Self {
        TensorData::String(v.into_iter().map(str::to_string).collect())
    }
}

/// A single fill or padding value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    /// Boolean
    Bool(bool),

    /// Any integer; converted to the target integer or float dtype
    Int(i64),

    /// Any float
    Float(f64),

    /// String
    Str(String),
}

impl Scalar {
    /// The zero value of `dtype`
    pub fn zero(dtype: DType) -> Self {
        match dtype {
            DType::Bool => Scalar::Bool(false),
            DType::Int32 | DType::Int64 => Scalar::Int(0),
            DType::Float32 | DType::Float64 => Scalar::Float(0.0),
            DType::String => Scalar::Str(String::new()),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(i64::from(v))
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

/// A dense multidimensional tensor in row-major order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseTensor {
    /// Flat element storage
    data: TensorData,

    /// Concrete shape
    shape: Vec<usize>,
}

impl DenseTensor {
    /// Create a tensor from flat data and a shape
    pub fn new(data: impl Into<TensorData>, shape: Vec<usize>) -> Result<Self> {
        let data = data.into();
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "data length {} does not match shape product {}",
                data.len(),
                expected
            )));
        }
        Ok(Self { data, shape })
    }

    /// Rank-0 tensor holding one value
    pub fn scalar<T>(value: T) -> Self
    where
        Vec<T>: Into<TensorData>,
    {
        Self {
            data: vec![value].into(),
            shape: Vec::new(),
        }
    }

    /// Rank-1 tensor
    pub fn from_vec<T>(values: Vec<T>) -> Self
    where
        Vec<T>: Into<TensorData>,
    {
        let shape = vec![values.len()];
        Self {
            data: values.into(),
            shape,
        }
    }

    /// Rank-2 tensor from equally long rows
    pub fn from_rows<T>(rows: Vec<Vec<T>>) -> Result<Self>
    where
        Vec<T>: Into<TensorData>,
    {
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != width) {
            return Err(Error::InvalidArgument(
                "rows of a dense tensor must have equal length; use RaggedTensor::from_rows".into(),
            ));
        }
        let shape = vec![rows.len(), width];
        let flat: Vec<T> = rows.into_iter().flatten().collect();
        Self::new(flat, shape)
    }

    /// Zero-valued tensor
    pub fn zeros(dtype: DType, shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Self {
            data: TensorData::zeros(dtype, n),
            shape,
        }
    }

    /// Tensor of `shape` filled with `fill`
    pub fn filled(dtype: DType, shape: Vec<usize>, fill: &Scalar) -> Result<Self> {
        let n = shape.iter().product();
        Ok(Self {
            data: TensorData::filled(dtype, n, fill)?,
            shape,
        })
    }

    /// Element type
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Concrete shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Flat storage
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Size of the leading dimension; `None` for scalars
    pub fn leading_dim(&self) -> Option<usize> {
        self.shape.first().copied()
    }

    /// Elements per leading-dimension row
    pub fn row_size(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Spec describing exactly this tensor
    pub fn spec(&self) -> TensorSpec {
        TensorSpec::new(self.dtype(), Shape::fixed(&self.shape))
    }

    fn require_rows(&self, op: &str) -> Result<usize> {
        self.leading_dim()
            .ok_or_else(|| Error::shape("", format!("{op} requires rank >= 1, got a scalar")))
    }

    /// Rows `range` along the leading dimension
    pub fn slice_rows(&self, range: Range<usize>) -> Result<Self> {
        let rows = self.require_rows("slicing")?;
        if range.start > range.end || range.end > rows {
            return Err(Error::IndexOutOfBounds);
        }
        let row = self.row_size();
        let mut shape = self.shape.clone();
        shape[0] = range.len();
        Ok(Self {
            data: self.data.slice(range.start * row..range.end * row),
            shape,
        })
    }

    /// Row `index` along the leading dimension, dropping that dimension
    pub fn index_row(&self, index: usize) -> Result<Self> {
        let rows = self.require_rows("indexing")?;
        if index >= rows {
            return Err(Error::IndexOutOfBounds);
        }
        let row = self.row_size();
        Ok(Self {
            data: self.data.slice(index * row..(index + 1) * row),
            shape: self.shape[1..].to_vec(),
        })
    }

    /// Concatenate tensors along the leading dimension
    pub fn concat(parts: &[DenseTensor]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| Error::InvalidArgument("cannot concatenate zero tensors".into()))?;
        first.require_rows("concatenation")?;
        let inner = &first.shape[1..];
        let total_rows: usize = parts.iter().map(|p| p.shape.first().copied().unwrap_or(0)).sum();
        let mut data = first.data.empty_like(total_rows * first.row_size());
        for part in parts {
            if part.rank() == 0 || &part.shape[1..] != inner {
                return Err(Error::shape(
                    "",
                    format!(
                        "cannot concatenate shape {:?} with shape {:?}",
                        part.shape, first.shape
                    ),
                ));
            }
            data.extend_from(&part.data)?;
        }
        let mut shape = first.shape.clone();
        shape[0] = total_rows;
        Ok(Self { data, shape })
    }

    /// Stack equally shaped tensors along a new leading dimension
    pub fn stack(parts: &[DenseTensor]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| Error::InvalidArgument("cannot stack zero tensors".into()))?;
        let mut data = first.data.empty_like(parts.len() * first.data.len());
        for part in parts {
            if part.shape != first.shape {
                return Err(Error::shape(
                    "",
                    format!("cannot stack shape {:?} with shape {:?}", part.shape, first.shape),
                ));
            }
            data.extend_from(&part.data)?;
        }
        let mut shape = Vec::with_capacity(first.rank() + 1);
        shape.push(parts.len());
        shape.extend_from_slice(&first.shape);
        Ok(Self { data, shape })
    }

    /// Right-pad the leading dimension with `fill` up to `target` rows
    pub fn pad_rows(&self, target: usize, fill: &Scalar) -> Result<Self> {
        let rows = self.require_rows("padding")?;
        if rows > target {
            return Err(Error::shape(
                "",
                format!("leading dimension {rows} exceeds target {target}"),
            ));
        }
        let mut data = self.data.clone();
        data.extend_filled((target - rows) * self.row_size(), fill)?;
        let mut shape = self.shape.clone();
        shape[0] = target;
        Ok(Self { data, shape })
    }

    /// Keep at most `max_rows` rows of the leading dimension
    pub fn truncate_rows(&self, max_rows: usize) -> Result<Self> {
        let rows = self.require_rows("truncation")?;
        self.slice_rows(0..rows.min(max_rows))
    }

    /// Remove the given size-1 axes
    pub fn squeeze(&self, axes: &[usize]) -> Result<Self> {
        for &axis in axes {
            match self.shape.get(axis) {
                Some(1) => {}
                Some(size) => {
                    return Err(Error::shape(
                        "",
                        format!("cannot squeeze axis {axis} of size {size}"),
                    ))
                }
                None => {
                    return Err(Error::shape(
                        "",
                        format!("axis {axis} is out of range for rank {}", self.rank()),
                    ))
                }
            }
        }
        let shape = self
            .shape
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &d)| d)
            .collect();
        Ok(Self {
            data: self.data.clone(),
            shape,
        })
    }

    /// Set the innermost axis to exactly `len`: truncate longer rows, pad shorter ones with `fill`
    pub fn resize_last_axis(&self, len: usize, fill: &Scalar) -> Result<Self> {
        let width = *self
            .shape
            .last()
            .ok_or_else(|| Error::shape("", "cannot resize the last axis of a scalar"))?;
        let rows: usize = self.shape[..self.rank() - 1].iter().product();
        let keep = width.min(len);
        let mut data = self.data.empty_like(rows * len);
        for r in 0..rows {
            data.extend_from_range(&self.data, r * width..r * width + keep)?;
            data.extend_filled(len - keep, fill)?;
        }
        let mut shape = self.shape.clone();
        let last = shape.len() - 1;
        shape[last] = len;
        Ok(Self { data, shape })
    }
}

/// A tensor whose dimensions after the leading one may vary per row.
///
/// Stored as a flat `values` tensor plus one row-splits vector per ragged
/// level. Level 0 partitions the outermost rows; the last level partitions the
/// rows of `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaggedTensor {
    values: DenseTensor,
    nested_row_splits: Vec<Vec<usize>>,
}

impl RaggedTensor {
    /// Create a ragged tensor, validating the row splits
    pub fn new(values: DenseTensor, nested_row_splits: Vec<Vec<usize>>) -> Result<Self> {
        if nested_row_splits.is_empty() {
            return Err(Error::InvalidArgument("a ragged tensor needs at least one row-splits level".into()));
        }
        if values.rank() == 0 {
            return Err(Error::InvalidArgument("ragged values must have rank >= 1".into()));
        }
        for (level, splits) in nested_row_splits.iter().enumerate() {
            if splits.first() != Some(&0) || splits.windows(2).any(|w| w[0] > w[1]) {
                return Err(Error::InvalidArgument(format!(
                    "row splits at level {level} must start at 0 and be non-decreasing"
                )));
            }
            let expected_end = match nested_row_splits.get(level + 1) {
                Some(next) => next.len().saturating_sub(1),
                None => values.shape()[0],
            };
            if splits.last() != Some(&expected_end) {
                return Err(Error::InvalidArgument(format!(
                    "row splits at level {level} end at {:?}, expected {expected_end}",
                    splits.last()
                )));
            }
        }
        Ok(Self {
            values,
            nested_row_splits,
        })
    }

    /// Rank-2 ragged tensor from variable-length rows
    pub fn from_rows<T>(rows: Vec<Vec<T>>) -> Result<Self>
    where
        Vec<T>: Into<TensorData>,
    {
        let mut splits = Vec::with_capacity(rows.len() + 1);
        splits.push(0);
        let mut flat = Vec::new();
        for row in rows {
            flat.extend(row);
            splits.push(flat.len());
        }
        Self::new(DenseTensor::from_vec(flat), vec![splits])
    }

    /// Rank-3 ragged tensor with two ragged levels
    pub fn from_nested_rows<T>(rows: Vec<Vec<Vec<T>>>) -> Result<Self>
    where
        Vec<T>: Into<TensorData>,
    {
        let mut outer = vec![0];
        let mut inner = vec![0];
        let mut flat = Vec::new();
        for row in rows {
            for sub in row {
                flat.extend(sub);
                inner.push(flat.len());
            }
            outer.push(inner.len() - 1);
        }
        Self::new(DenseTensor::from_vec(flat), vec![outer, inner])
    }

    /// Element type
    pub fn dtype(&self) -> DType {
        self.values.dtype()
    }

    /// Flat values
    pub fn values(&self) -> &DenseTensor {
        &self.values
    }

    /// Row splits per ragged level
    pub fn nested_row_splits(&self) -> &[Vec<usize>] {
        &self.nested_row_splits
    }

    /// Number of ragged dimensions
    pub fn ragged_rank(&self) -> usize {
        self.nested_row_splits.len()
    }

    /// Total rank: leading dim, ragged dims, then the inner dims of `values`
    pub fn rank(&self) -> usize {
        1 + self.ragged_rank() + self.values.rank() - 1
    }

    /// Number of outermost rows
    pub fn nrows(&self) -> usize {
        self.nested_row_splits[0].len() - 1
    }

    /// Spec of this tensor; ragged dimensions are dynamic
    pub fn spec(&self) -> TensorSpec {
        let mut dims = Vec::with_capacity(self.rank());
        dims.push(Dim::Fixed(self.nrows()));
        dims.extend(std::iter::repeat(Dim::Dynamic).take(self.ragged_rank()));
        dims.extend(self.values.shape()[1..].iter().map(|&d| Dim::Fixed(d)));
        TensorSpec::ragged(self.dtype(), Shape::Known(dims), self.ragged_rank())
    }

    /// Longest row at each ragged level
    pub fn max_lengths(&self) -> Vec<usize> {
        self.nested_row_splits
            .iter()
            .map(|splits| splits.windows(2).map(|w| w[1] - w[0]).max().unwrap_or(0))
            .collect()
    }

    /// Convert to dense, padding with `fill`.
    ///
    /// `bounds` gives the target size of each ragged dimension; `None` uses the
    /// longest row. Rows longer than their bound are truncated.
    pub fn to_dense(&self, bounds: &[Option<usize>], fill: &Scalar) -> Result<DenseTensor> {
        if bounds.len() != self.ragged_rank() {
            return Err(Error::InvalidArgument(format!(
                "expected {} ragged bounds, got {}",
                self.ragged_rank(),
                bounds.len()
            )));
        }
        let dims: Vec<usize> = bounds
            .iter()
            .zip(self.max_lengths())
            .map(|(bound, longest)| bound.unwrap_or(longest))
            .collect();
        let inner = self.values.row_size();
        let total = self.nrows() * dims.iter().product::<usize>() * inner;
        let mut data = self.values.data().empty_like(total);
        for row in 0..self.nrows() {
            self.fill_level(0, row, &dims, fill, &mut data)?;
        }
        let mut shape = Vec::with_capacity(self.rank());
        shape.push(self.nrows());
        shape.extend_from_slice(&dims);
        shape.extend_from_slice(&self.values.shape()[1..]);
        DenseTensor::new(data, shape)
    }

    fn fill_level(
        &self,
        level: usize,
        row: usize,
        dims: &[usize],
        fill: &Scalar,
        out: &mut TensorData,
    ) -> Result<()> {
        let splits = &self.nested_row_splits[level];
        let (start, end) = (splits[row], splits[row + 1]);
        let keep = (end - start).min(dims[level]);
        let inner = self.values.row_size();
        let slot: usize = dims[level + 1..].iter().product::<usize>() * inner;
        if level + 1 < self.ragged_rank() {
            for child in start..start + keep {
                self.fill_level(level + 1, child, dims, fill, out)?;
            }
        } else {
            out.extend_from_range(self.values.data(), start * inner..(start + keep) * inner)?;
        }
        out.extend_filled((dims[level] - keep) * slot, fill)
    }
}

/// A dense or ragged tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tensor {
    /// Dense tensor
    Dense(DenseTensor),

    /// Ragged tensor
    Ragged(RaggedTensor),
}

impl Tensor {
    /// Element type
    pub fn dtype(&self) -> DType {
        match self {
            Tensor::Dense(t) => t.dtype(),
            Tensor::Ragged(t) => t.dtype(),
        }
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        match self {
            Tensor::Dense(t) => t.rank(),
            Tensor::Ragged(t) => t.rank(),
        }
    }

    /// Size of the leading dimension; `None` for scalars
    pub fn leading_dim(&self) -> Option<usize> {
        match self {
            Tensor::Dense(t) => t.leading_dim(),
            Tensor::Ragged(t) => Some(t.nrows()),
        }
    }

    /// Spec describing this tensor
    pub fn spec(&self) -> TensorSpec {
        match self {
            Tensor::Dense(t) => t.spec(),
            Tensor::Ragged(t) => t.spec(),
        }
    }

    /// Borrow as dense
    pub fn as_dense(&self) -> Option<&DenseTensor> {
        match self {
            Tensor::Dense(t) => Some(t),
            Tensor::Ragged(_) => None,
        }
    }

    /// Borrow as ragged
    pub fn as_ragged(&self) -> Option<&RaggedTensor> {
        match self {
            Tensor::Ragged(t) => Some(t),
            Tensor::Dense(_) => None,
        }
    }
}

impl From<DenseTensor> for Tensor {
    fn from(t: DenseTensor) -> Self {
        Tensor::Dense(t)
    }
}

impl From<RaggedTensor> for Tensor {
    fn from(t: RaggedTensor) -> Self {
        Tensor::Ragged(t)
    }
}

impl fmt::Display for DenseTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DenseTensor({}, {:?})", self.dtype(), self.shape)
    }
}
