//! Attaching per-source processing

use ml_stream_core::{Result, SourceRef, Transform};
use tracing::debug;

/// Apply `processor` to `source`
///
/// Used to give each input of a sampler or concatenation its own processing
/// before the streams are merged.
pub fn with_processor(source: SourceRef, processor: &dyn Transform) -> Result<SourceRef> {
    let processed = processor.apply(source)?;
    debug!(signature = %processed.signature(), "attached processor");
    Ok(processed)
}
