//! Element signatures: dtypes, shapes and per-field tensor specs

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// Boolean
    Bool,

    /// 32-bit signed integer
    Int32,

    /// 64-bit signed integer
    Int64,

    /// 32-bit floating point
    Float32,

    /// 64-bit floating point
    Float64,

    /// UTF-8 string
    String,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Bool => write!(f, "bool"),
            DType::Int32 => write!(f, "int32"),
            DType::Int64 => write!(f, "int64"),
            DType::Float32 => write!(f, "float32"),
            DType::Float64 => write!(f, "float64"),
            DType::String => write!(f, "string"),
        }
    }
}

/// A single dimension of a shape template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    /// Statically known size
    Fixed(usize),

    /// Size only known at runtime
    Dynamic,
}

impl Dim {
    /// The static size, if known
    pub fn size(&self) -> Option<usize> {
        match self {
            Dim::Fixed(n) => Some(*n),
            Dim::Dynamic => None,
        }
    }

    /// Whether a concrete size satisfies this dimension
    pub fn accepts(&self, size: usize) -> bool {
        match self {
            Dim::Fixed(n) => *n == size,
            Dim::Dynamic => true,
        }
    }

    fn relax(self, other: Dim) -> Dim {
        if self == other {
            self
        } else {
            Dim::Dynamic
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Dynamic => write!(f, "None"),
        }
    }
}

/// Shape template of a tensor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    /// Known rank, each dimension fixed or dynamic
    Known(Vec<Dim>),

    /// Unknown rank (e.g. produced by an opaque per-element callback)
    Unknown,
}

impl Shape {
    /// Rank-0 shape
    pub fn scalar() -> Self {
        Shape::Known(Vec::new())
    }

    /// Fully defined shape from concrete sizes
    pub fn fixed(dims: &[usize]) -> Self {
        Shape::Known(dims.iter().map(|&d| Dim::Fixed(d)).collect())
    }

    /// Shape from optional sizes, `None` meaning dynamic
    pub fn from_optional(dims: &[Option<usize>]) -> Self {
        Shape::Known(
            dims.iter()
                .map(|d| d.map_or(Dim::Dynamic, Dim::Fixed))
                .collect(),
        )
    }

    /// Rank, if known
    pub fn rank(&self) -> Option<usize> {
        self.dims().map(<[Dim]>::len)
    }

    /// Dimensions, if the rank is known
    pub fn dims(&self) -> Option<&[Dim]> {
        match self {
            Shape::Known(dims) => Some(dims),
            Shape::Unknown => None,
        }
    }

    /// Whether every dimension is statically known
    pub fn is_fully_defined(&self) -> bool {
        self.dims()
            .is_some_and(|dims| dims.iter().all(|d| matches!(d, Dim::Fixed(_))))
    }

    /// Prepend a leading dimension; unknown shapes stay unknown
    #[must_use]
    pub fn with_leading(&self, dim: Dim) -> Shape {
        match self {
            Shape::Known(dims) => {
                let mut out = Vec::with_capacity(dims.len() + 1);
                out.push(dim);
                out.extend_from_slice(dims);
                Shape::Known(out)
            }
            Shape::Unknown => Shape::Unknown,
        }
    }

    /// Replace the leading dimension; unknown and scalar shapes are returned as-is
    #[must_use]
    pub fn replace_leading(&self, dim: Dim) -> Shape {
        match self {
            Shape::Known(dims) if !dims.is_empty() => {
                let mut out = dims.clone();
                out[0] = dim;
                Shape::Known(out)
            }
            other => other.clone(),
        }
    }

    /// Whether a concrete shape satisfies this template
    pub fn accepts(&self, concrete: &[usize]) -> bool {
        match self {
            Shape::Known(dims) => {
                dims.len() == concrete.len()
                    && dims.iter().zip(concrete).all(|(d, &c)| d.accepts(c))
            }
            Shape::Unknown => true,
        }
    }

    /// Most specific shape compatible with both `self` and `other`
    pub fn relax(&self, other: &Shape) -> Shape {
        match (self, other) {
            (Shape::Known(a), Shape::Known(b)) if a.len() == b.len() => {
                Shape::Known(a.iter().zip(b).map(|(x, y)| x.relax(*y)).collect())
            }
            _ => Shape::Unknown,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Known(dims) => {
                write!(f, "(")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{dim}")?;
                }
                write!(f, ")")
            }
            Shape::Unknown => write!(f, "<unknown>"),
        }
    }
}

/// Declared dtype and shape of one tensor field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    /// Element type
    pub dtype: DType,

    /// Shape template
    pub shape: Shape,

    /// Number of ragged dimensions after the leading one; 0 for dense tensors
    pub ragged_rank: usize,
}

impl TensorSpec {
    /// Dense tensor spec
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self {
            dtype,
            shape,
            ragged_rank: 0,
        }
    }

    /// Ragged tensor spec
    pub fn ragged(dtype: DType, shape: Shape, ragged_rank: usize) -> Self {
        Self {
            dtype,
            shape,
            ragged_rank,
        }
    }

    /// Whether this spec describes a ragged tensor
    pub fn is_ragged(&self) -> bool {
        self.ragged_rank > 0
    }

    /// Known dims, or a shape error naming `field`
    pub fn require_known(&self, field: &str) -> Result<&[Dim]> {
        self.shape
            .dims()
            .ok_or_else(|| Error::shape(field, "shape is unknown; a known shape is required"))
    }

    /// Combine two specs observed at the same pipeline point
    pub fn relax(&self, other: &TensorSpec, field: &str) -> Result<TensorSpec> {
        if self.dtype != other.dtype {
            return Err(Error::TypeMismatch(format!(
                "field '{}' has dtype {} and {}",
                field, self.dtype, other.dtype
            )));
        }
        if self.ragged_rank != other.ragged_rank {
            return Err(Error::shape(
                field,
                format!(
                    "ragged rank {} is incompatible with {}",
                    self.ragged_rank, other.ragged_rank
                ),
            ));
        }
        if let (Some(a), Some(b)) = (self.shape.rank(), other.shape.rank()) {
            if a != b {
                return Err(Error::shape(
                    field,
                    format!("rank {a} is incompatible with rank {b}"),
                ));
            }
        }
        Ok(TensorSpec {
            dtype: self.dtype,
            shape: self.shape.relax(&other.shape),
            ragged_rank: self.ragged_rank,
        })
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ragged() {
            write!(f, "RaggedSpec({}, {}, ragged_rank={})", self.dtype, self.shape, self.ragged_rank)
        } else {
            write!(f, "TensorSpec({}, {})", self.dtype, self.shape)
        }
    }
}

/// Spec of one record field: a tensor or a nested record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldSpec {
    /// Tensor leaf
    Tensor(TensorSpec),

    /// Nested record
    Nested(Signature),
}

impl FieldSpec {
    /// The tensor spec, if this is a leaf
    pub fn as_tensor(&self) -> Option<&TensorSpec> {
        match self {
            FieldSpec::Tensor(spec) => Some(spec),
            FieldSpec::Nested(_) => None,
        }
    }

    /// The nested signature, if this is a nested record
    pub fn as_nested(&self) -> Option<&Signature> {
        match self {
            FieldSpec::Nested(sig) => Some(sig),
            FieldSpec::Tensor(_) => None,
        }
    }

    /// Combine two field specs observed at the same pipeline point
    pub fn relax(&self, other: &FieldSpec, field: &str) -> Result<FieldSpec> {
        match (self, other) {
            (FieldSpec::Tensor(a), FieldSpec::Tensor(b)) => Ok(FieldSpec::Tensor(a.relax(b, field)?)),
            (FieldSpec::Nested(a), FieldSpec::Nested(b)) => Ok(FieldSpec::Nested(a.relax(b)?)),
            _ => Err(Error::TypeMismatch(format!(
                "field '{field}' is a tensor in one element and a nested record in another"
            ))),
        }
    }
}

impl From<TensorSpec> for FieldSpec {
    fn from(spec: TensorSpec) -> Self {
        FieldSpec::Tensor(spec)
    }
}

impl From<Signature> for FieldSpec {
    fn from(sig: Signature) -> Self {
        FieldSpec::Nested(sig)
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSpec::Tensor(spec) => write!(f, "{spec}"),
            FieldSpec::Nested(sig) => write!(f, "{sig}"),
        }
    }
}

/// Ordered per-field description of the records flowing through a pipeline point
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Signature {
    /// Fields in declaration order
    fields: Vec<(String, FieldSpec)>,

    /// Field indices by name for faster lookup
    #[serde(skip)]
    field_indices: HashMap<String, usize>,
}

impl Signature {
    /// Create a signature from named field specs; later duplicates replace earlier ones
    pub fn new<K: Into<String>>(fields: impl IntoIterator<Item = (K, FieldSpec)>) -> Self {
        let mut sig = Self::default();
        for (name, spec) in fields {
            sig.insert(name, spec);
        }
        sig
    }

    /// Create a signature whose fields are all tensors
    pub fn from_tensors<K: Into<String>>(fields: impl IntoIterator<Item = (K, TensorSpec)>) -> Self {
        Self::new(fields.into_iter().map(|(k, spec)| (k, FieldSpec::Tensor(spec))))
    }

    /// Insert or replace a field, keeping the position of an existing one
    pub fn insert(&mut self, name: impl Into<String>, spec: FieldSpec) -> Option<FieldSpec> {
        let name = name.into();
        if let Some(&index) = self.field_indices.get(&name) {
            return Some(std::mem::replace(&mut self.fields[index].1, spec));
        }
        self.field_indices.insert(name.clone(), self.fields.len());
        self.fields.push((name, spec));
        None
    }

    /// Remove a field if present
    pub fn remove(&mut self, name: &str) -> Option<FieldSpec> {
        let index = self.field_indices.remove(name)?;
        let (_, spec) = self.fields.remove(index);
        self.rebuild_indices();
        Some(spec)
    }

    fn rebuild_indices(&mut self) {
        self.field_indices.clear();
        for (i, (name, _)) in self.fields.iter().enumerate() {
            self.field_indices.insert(name.clone(), i);
        }
    }

    /// Get a field spec by name
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.field_indices.get(name).map(|&i| &self.fields[i].1)
    }

    /// Get a tensor spec by name
    pub fn tensor(&self, name: &str) -> Result<&TensorSpec> {
        match self.get(name) {
            Some(FieldSpec::Tensor(spec)) => Ok(spec),
            Some(FieldSpec::Nested(_)) => Err(Error::TypeMismatch(format!(
                "field '{name}' is a nested record, not a tensor"
            ))),
            None => Err(Error::MissingField(name.to_string())),
        }
    }

    /// Descend a path of nested field names
    pub fn lookup_path<S: AsRef<str>>(&self, path: &[S]) -> Result<&FieldSpec> {
        let (first, rest) = path
            .split_first()
            .ok_or_else(|| Error::InvalidArgument("empty field path".into()))?;
        let spec = self
            .get(first.as_ref())
            .ok_or_else(|| Error::MissingField(join_path(path)))?;
        if rest.is_empty() {
            return Ok(spec);
        }
        match spec {
            FieldSpec::Nested(inner) => inner
                .lookup_path(rest)
                .map_err(|_| Error::MissingField(join_path(path))),
            FieldSpec::Tensor(_) => Err(Error::MissingField(join_path(path))),
        }
    }

    /// Whether the signature has a field
    pub fn contains(&self, name: &str) -> bool {
        self.field_indices.contains_key(name)
    }

    /// Field names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Iterate over `(name, spec)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field-wise most specific signature compatible with both inputs
    pub fn relax(&self, other: &Signature) -> Result<Signature> {
        if self.len() != other.len() || self.names().any(|n| !other.contains(n)) {
            return Err(Error::Config(format!(
                "incompatible element signatures: {{{}}} vs {{{}}}",
                self.names().collect::<Vec<_>>().join(", "),
                other.names().collect::<Vec<_>>().join(", ")
            )));
        }
        let mut out = Signature::default();
        for (name, spec) in self.iter() {
            let theirs = other.get(name).ok_or_else(|| Error::MissingField(name.to_string()))?;
            out.insert(name, spec.relax(theirs, name)?);
        }
        Ok(out)
    }

    /// Serialize this signature to a binary format
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(Error::Serialization)
    }

    /// Deserialize a signature from a binary format
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut sig: Self = bincode::deserialize(data).map_err(Error::Serialization)?;
        sig.rebuild_indices();
        Ok(sig)
    }
}

pub(crate) fn join_path<S: AsRef<str>>(path: &[S]) -> String {
    path.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(".")
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Signature {}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, spec)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {spec}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_vec(dims: &[Option<usize>]) -> TensorSpec {
        TensorSpec::new(DType::Int32, Shape::from_optional(dims))
    }

    #[test]
    fn test_insert_keeps_position() {
        let mut sig = Signature::from_tensors([("a", int_vec(&[None])), ("b", int_vec(&[Some(2)]))]);
        sig.insert("a", FieldSpec::Tensor(int_vec(&[Some(3)])));
        assert_eq!(sig.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(sig.tensor("a").unwrap().shape, Shape::fixed(&[3]));
    }

    #[test]
    fn test_remove_rebuilds_index() {
        let mut sig = Signature::from_tensors([
            ("a", int_vec(&[])),
            ("b", int_vec(&[])),
            ("c", int_vec(&[])),
        ]);
        assert!(sig.remove("a").is_some());
        assert!(sig.remove("missing").is_none());
        assert!(sig.tensor("c").is_ok());
        assert_eq!(sig.len(), 2);
    }

    #[test]
    fn test_relax_turns_mismatched_dims_dynamic() {
        let a = Signature::from_tensors([("x", int_vec(&[Some(3), Some(2)]))]);
        let b = Signature::from_tensors([("x", int_vec(&[Some(1), Some(2)]))]);
        let relaxed = a.relax(&b).unwrap();
        assert_eq!(relaxed.tensor("x").unwrap().shape, Shape::from_optional(&[None, Some(2)]));
    }

    #[test]
    fn test_relax_rejects_dtype_change() {
        let a = Signature::from_tensors([("x", int_vec(&[]))]);
        let b = Signature::from_tensors([("x", TensorSpec::new(DType::String, Shape::scalar()))]);
        assert!(matches!(a.relax(&b), Err(Error::TypeMismatch(_))));
    }

    #[test]
    fn test_lookup_nested_path() {
        let inner = Signature::from_tensors([("key5", TensorSpec::new(DType::String, Shape::scalar()))]);
        let sig = Signature::new([("key2", FieldSpec::Nested(inner))]);
        assert!(sig.lookup_path(&["key2", "key5"]).is_ok());
        assert!(matches!(sig.lookup_path(&["key2", "nope"]), Err(Error::MissingField(p)) if p == "key2.nope"));
    }

    #[test]
    fn test_serialize_roundtrip_restores_lookup() {
        let sig = Signature::from_tensors([("a", int_vec(&[None, Some(3)]))]);
        let restored = Signature::deserialize(&sig.serialize().unwrap()).unwrap();
        assert_eq!(restored, sig);
        assert!(restored.contains("a"));
    }

    #[test]
    fn test_display() {
        let sig = Signature::from_tensors([("a", int_vec(&[None, Some(3)]))]);
        assert_eq!(sig.to_string(), "{a: TensorSpec(int32, (None, 3))}");
    }
}
