//! Core traits, data structures, and abstractions for ML stream pipelines
//!
//! This crate provides the record and signature model that every pipeline
//! stage shares: dtypes and shape templates, dense and ragged tensors,
//! nested records, the restartable [`Source`] contract and the [`Transform`]
//! contract with its chaining combinators.

#![warn(missing_docs)]

pub mod dataset;
pub mod error;
pub mod record;
pub mod schema;
pub mod source;
pub mod tensor;
pub mod transform;

// Re-export key types for convenience
pub use dataset::{FnSource, InMemorySource};
pub use error::{Error, Result};
pub use record::{Record, Value};
pub use schema::{DType, Dim, FieldSpec, Shape, Signature, TensorSpec};
pub use source::{Cardinality, DerivedSource, RecordStream, Source, SourceRef};
pub use tensor::{DenseTensor, RaggedTensor, Scalar, Tensor, TensorData};
pub use transform::{chain, identity, map_records, Transform, TransformChain, TransformRef};
