//! Record transforms for ML stream pipelines
//!
//! Every public constructor here returns a [`TransformRef`](ml_stream_core::TransformRef):
//! structural edits of the field set, shape reconciliation for ragged and
//! variable-length fields, and the batch assembler (fixed batching with
//! padding and repeat, plus trimming, padding and greedy packing along the
//! leading axis).

#![warn(missing_docs)]

pub mod batching;
pub mod packing;
pub mod shape;
pub mod structural;

pub use batching::{batch, default_pad_example_fn, BatchConfig, PadExampleFn};
pub use packing::{pack_to_batch, pad_to_batch, trim_to_batch};
pub use shape::{ragged_to_tensor, trim_and_pad_tensor};
pub use structural::{
    add_static_fields, extract_from_sequence, preserve_element_spec, rekey, remove_fields, squeeze_fields,
    unpack, SequenceIndex, SqueezeAxis,
};
