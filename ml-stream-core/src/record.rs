//! Records: ordered mappings from field name to tensor or nested record

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::schema::{join_path, FieldSpec, Signature};
use crate::tensor::{DenseTensor, RaggedTensor, Tensor};

/// Value of one record field
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Tensor leaf
    Tensor(Tensor),

    /// Nested record
    Nested(Record),
}

impl Value {
    /// Spec describing this value
    pub fn spec(&self) -> FieldSpec {
        match self {
            Value::Tensor(t) => FieldSpec::Tensor(t.spec()),
            Value::Nested(r) => FieldSpec::Nested(r.signature()),
        }
    }

    /// Borrow as a tensor
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(t) => Some(t),
            Value::Nested(_) => None,
        }
    }

    /// Borrow as a dense tensor
    pub fn as_dense(&self) -> Option<&DenseTensor> {
        self.as_tensor().and_then(Tensor::as_dense)
    }

    /// Borrow as a nested record
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Nested(r) => Some(r),
            Value::Tensor(_) => None,
        }
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Value::Tensor(t)
    }
}

impl From<DenseTensor> for Value {
    fn from(t: DenseTensor) -> Self {
        Value::Tensor(Tensor::Dense(t))
    }
}

impl From<RaggedTensor> for Value {
    fn from(t: RaggedTensor) -> Self {
        Value::Tensor(Tensor::Ragged(t))
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Nested(r)
    }
}

/// One structured training example
#[derive(Debug, Clone, Default)]
pub struct Record {
    /// Fields in insertion order
    fields: Vec<(String, Value)>,

    /// Field indices by name for faster lookup
    field_indices: HashMap<String, usize>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a field, keeping the position of an existing one
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        if let Some(&index) = self.field_indices.get(&name) {
            return Some(std::mem::replace(&mut self.fields[index].1, value));
        }
        self.field_indices.insert(name.clone(), self.fields.len());
        self.fields.push((name, value));
        None
    }

    /// Remove a field if present
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.field_indices.remove(name)?;
        let (_, value) = self.fields.remove(index);
        self.field_indices.clear();
        for (i, (name, _)) in self.fields.iter().enumerate() {
            self.field_indices.insert(name.clone(), i);
        }
        Some(value)
    }

    /// Get a field by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.field_indices.get(name).map(|&i| &self.fields[i].1)
    }

    /// Whether the record has a field
    pub fn contains(&self, name: &str) -> bool {
        self.field_indices.contains_key(name)
    }

    /// Get a tensor field
    pub fn tensor(&self, name: &str) -> Result<&Tensor> {
        match self.get(name) {
            Some(Value::Tensor(t)) => Ok(t),
            Some(Value::Nested(_)) => Err(Error::TypeMismatch(format!(
                "field '{name}' is a nested record, not a tensor"
            ))),
            None => Err(Error::MissingField(name.to_string())),
        }
    }

    /// Get a dense tensor field
    pub fn dense(&self, name: &str) -> Result<&DenseTensor> {
        self.tensor(name)?
            .as_dense()
            .ok_or_else(|| Error::shape(name, "expected a dense tensor, found a ragged one"))
    }

    /// Descend a path of nested field names
    pub fn lookup_path<S: AsRef<str>>(&self, path: &[S]) -> Result<&Value> {
        let mut current = self;
        for (depth, component) in path.iter().enumerate() {
            let value = current
                .get(component.as_ref())
                .ok_or_else(|| Error::MissingField(join_path(&path[..=depth])))?;
            if depth + 1 == path.len() {
                return Ok(value);
            }
            current = value
                .as_record()
                .ok_or_else(|| Error::MissingField(join_path(&path[..=depth + 1])))?;
        }
        Err(Error::InvalidArgument("empty field path".into()))
    }

    /// Field names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Iterate over `(name, value)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Signature describing exactly this record
    pub fn signature(&self) -> Signature {
        Signature::new(self.fields.iter().map(|(name, value)| (name.clone(), value.spec())))
    }

    /// Check that this record satisfies `signature`
    pub fn conforms_to(&self, signature: &Signature) -> Result<()> {
        if self.len() != signature.len() {
            return Err(Error::shape(
                "",
                format!(
                    "record has fields {{{}}}, signature declares {{{}}}",
                    self.names().collect::<Vec<_>>().join(", "),
                    signature.names().collect::<Vec<_>>().join(", ")
                ),
            ));
        }
        for (name, spec) in signature.iter() {
            let value = self.get(name).ok_or_else(|| Error::MissingField(name.to_string()))?;
            match (value, spec) {
                (Value::Tensor(t), FieldSpec::Tensor(expected)) => {
                    let actual = t.spec();
                    if actual.dtype != expected.dtype {
                        return Err(Error::TypeMismatch(format!(
                            "field '{}' has dtype {}, signature declares {}",
                            name, actual.dtype, expected.dtype
                        )));
                    }
                    if actual.ragged_rank != expected.ragged_rank {
                        return Err(Error::shape(
                            name,
                            format!(
                                "ragged rank {} does not satisfy {}",
                                actual.ragged_rank, expected.ragged_rank
                            ),
                        ));
                    }
                    let concrete: Option<Vec<usize>> = actual
                        .shape
                        .dims()
                        .map(|dims| dims.iter().map(|d| d.size().unwrap_or(0)).collect());
                    let rank_ok = actual.shape.rank() == expected.shape.rank() || expected.shape.rank().is_none();
                    let dims_ok = actual.is_ragged()
                        || concrete.map_or(true, |c| expected.shape.accepts(&c));
                    if !rank_ok || !dims_ok {
                        return Err(Error::shape(
                            name,
                            format!("shape {} does not satisfy {}", actual.shape, expected.shape),
                        ));
                    }
                }
                (Value::Nested(r), FieldSpec::Nested(expected)) => r.conforms_to(expected)?,
                _ => {
                    return Err(Error::TypeMismatch(format!(
                        "field '{name}' does not match its declared kind"
                    )))
                }
            }
        }
        Ok(())
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, value)| other.get(name).is_some_and(|v| v == value))
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record {{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value.spec())?;
        }
        write!(f, "}}")
    }
}
