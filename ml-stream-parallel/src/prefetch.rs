//! Bounded background prefetch for record streams.
//!
//! A prefetching stream pulls items from its upstream on a dedicated thread
//! into a bounded channel, so the consumer rarely waits on upstream work.
//! Items are delivered in exactly the order upstream produced them. Dropping
//! the consumer disconnects the channel; the worker notices at its next send
//! and exits.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use ml_stream_core::{Cardinality, Error, Record, RecordStream, Result, Signature, Source, SourceRef};
use serde::Deserialize;
use tracing::{debug, warn};

/// Queue depth used when none is configured
pub const DEFAULT_PREFETCH_DEPTH: usize = 2;

/// Configuration for prefetching behavior
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Number of items that may be materialized ahead of the consumer
    pub buffer_size: usize,

    /// Whether prefetching is enabled
    pub enabled: bool,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_PREFETCH_DEPTH,
            enabled: true,
        }
    }
}

impl PrefetchConfig {
    /// Config from an optional depth: `None` is the default depth, `Some(0)` disables
    pub fn from_buffer_size(buffer_size: Option<usize>) -> Self {
        match buffer_size {
            None => Self::default(),
            Some(0) => Self {
                buffer_size: 0,
                enabled: false,
            },
            Some(n) => Self {
                buffer_size: n,
                enabled: true,
            },
        }
    }

    /// Whether a background worker will be used
    pub fn is_active(&self) -> bool {
        self.enabled && self.buffer_size > 0
    }
}

/// A stream whose items are produced on a background thread
pub struct PrefetchIterator {
    /// Channel of prefetched items; `None` once finished
    receiver: Option<Receiver<Result<Record>>>,

    /// Handle to the worker thread
    worker: Option<JoinHandle<()>>,
}

impl PrefetchIterator {
    /// Start prefetching `upstream` into a queue of depth `buffer_size`
    pub fn spawn(upstream: RecordStream, buffer_size: usize) -> Result<Self> {
        let (sender, receiver) = channel::bounded(buffer_size.max(1));

        let worker = thread::Builder::new()
            .name("ml-stream-prefetch".into())
            .spawn(move || {
                for item in upstream {
                    let failed = item.is_err();
                    if sender.send(item).is_err() {
                        debug!("prefetch consumer dropped, stopping worker");
                        return;
                    }
                    if failed {
                        return;
                    }
                }
            })
            .map_err(|e| Error::Prefetch(format!("failed to spawn prefetch worker: {e}")))?;

        Ok(Self {
            receiver: Some(receiver),
            worker: Some(worker),
        })
    }

    fn finish(&mut self) -> Option<Result<Record>> {
        self.receiver = None;
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(()) => None,
            Err(_) => {
                warn!("prefetch worker panicked");
                Some(Err(Error::Prefetch("prefetch worker panicked".into())))
            }
        }
    }
}

impl Iterator for PrefetchIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let received = self.receiver.as_ref()?.recv();
        match received {
            Ok(item) => Some(item),
            Err(_) => self.finish(),
        }
    }
}

impl Drop for PrefetchIterator {
    fn drop(&mut self) {
        // Disconnect first so a worker blocked on a full queue wakes up.
        self.receiver = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// A source whose passes are prefetched on a background thread
pub struct PrefetchSource {
    input: SourceRef,
    config: PrefetchConfig,
}

impl PrefetchSource {
    /// Wrap `input`; an inactive config returns passes unchanged
    pub fn new(input: SourceRef, config: PrefetchConfig) -> Self {
        Self { input, config }
    }

    /// Wrap `input` unless prefetching is disabled, in which case it is returned as-is
    pub fn wrap(input: SourceRef, config: PrefetchConfig) -> SourceRef {
        if config.is_active() {
            debug!(depth = config.buffer_size, "prefetching enabled");
            Arc::new(Self::new(input, config))
        } else {
            debug!("prefetching disabled");
            input
        }
    }

    /// Prefetch configuration
    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }
}

impl Source for PrefetchSource {
    fn produce(&self) -> Result<RecordStream> {
        let upstream = self.input.produce()?;
        if !self.config.is_active() {
            return Ok(upstream);
        }
        Ok(Box::new(PrefetchIterator::spawn(upstream, self.config.buffer_size)?))
    }

    fn signature(&self) -> &Signature {
        self.input.signature()
    }

    fn cardinality(&self) -> Cardinality {
        self.input.cardinality()
    }
}
