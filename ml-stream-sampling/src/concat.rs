//! Sequential concatenation of sources

use std::sync::Arc;

use ml_stream_core::source::stop_on_error;
use ml_stream_core::{Cardinality, Error, Record, RecordStream, Result, Signature, Source, SourceRef};
use tracing::debug;

/// Yield every record of each source in turn
///
/// A single source is returned as-is. All sources must share field names,
/// dtypes and ranks; dimensions that differ between them become dynamic.
pub fn concatenate_datasets(sources: Vec<SourceRef>) -> Result<SourceRef> {
    let Some(first) = sources.first() else {
        return Err(Error::Config("concatenate_datasets requires at least one source".into()));
    };
    if sources.len() == 1 {
        return Ok(Arc::clone(first));
    }
    let signature = common_signature(&sources)?;
    debug!(sources = sources.len(), "concatenating datasets");
    Ok(Arc::new(ConcatSource {
        sources: Arc::new(sources),
        signature,
    }))
}

/// Most specific signature every source satisfies
pub(crate) fn common_signature(sources: &[SourceRef]) -> Result<Signature> {
    let Some((first, rest)) = sources.split_first() else {
        return Ok(Signature::default());
    };
    let mut signature = first.signature().clone();
    for (i, source) in rest.iter().enumerate() {
        signature = signature.relax(source.signature()).map_err(|e| {
            Error::Config(format!(
                "source {} has signature {} incompatible with {signature}: {e}",
                i + 1,
                source.signature()
            ))
        })?;
    }
    Ok(signature)
}

struct ConcatSource {
    sources: Arc<Vec<SourceRef>>,
    signature: Signature,
}

impl Source for ConcatSource {
    fn produce(&self) -> Result<RecordStream> {
        Ok(stop_on_error(Box::new(ConcatStream {
            sources: Arc::clone(&self.sources),
            next_source: 0,
            current: None,
        })))
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn cardinality(&self) -> Cardinality {
        let mut total = 0u64;
        let mut unknown = false;
        for source in self.sources.iter() {
            match source.cardinality() {
                Cardinality::Infinite => return Cardinality::Infinite,
                Cardinality::Finite(n) => total += n,
                Cardinality::Unknown => unknown = true,
            }
        }
        if unknown {
            Cardinality::Unknown
        } else {
            Cardinality::Finite(total)
        }
    }
}

struct ConcatStream {
    sources: Arc<Vec<SourceRef>>,
    next_source: usize,
    current: Option<RecordStream>,
}

impl Iterator for ConcatStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.as_mut().and_then(Iterator::next) {
                return Some(item);
            }
            let source = self.sources.get(self.next_source)?;
            self.next_source += 1;
            match source.produce() {
                Ok(stream) => self.current = Some(stream),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
