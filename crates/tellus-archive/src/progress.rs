//! Progress reporting and cooperative cancellation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(uuid::Uuid);

impl OperationId {
    pub fn new() -> Self { Self(uuid::Uuid::new_v4()) }
}

impl Default for OperationId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Progress {
    pub files_done:  usize,
    pub files_total: usize,
    pub bytes_done:  u64,
    pub bytes_total: u64,
    pub current:     Option<String>,
    /// Bytes per second since the operation started.
    pub rate:        f64,
}

impl Progress {
    /// Byte-weighted completion; file-weighted when there are no bytes.
    pub fn percentage(&self) -> f32 {
        if self.bytes_total > 0 {
            (self.bytes_done as f32 / self.bytes_total as f32) * 100.0
        } else if self.files_total > 0 {
            (self.files_done as f32 / self.files_total as f32) * 100.0
        } else {
            100.0
        }
    }
}

/// Receiver of progress for long-running operations. Rendering is up to
/// the implementor.
pub trait ProgressSink: Send + Sync {
    fn create(&self, id: OperationId, label: &str);

    fn update(&self, id: OperationId, progress: &Progress);

    fn complete(&self, id: OperationId, summary: &str);

    fn cancel(&self, id: OperationId);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn create(&self, _: OperationId, _: &str) {}

    fn update(&self, _: OperationId, _: &Progress) {}

    fn complete(&self, _: OperationId, _: &str) {}

    fn cancel(&self, _: OperationId) {}
}

/// Shared cancellation flag, checked at file and chunk boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }

    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

/// Everything a running operation reports through.
#[derive(Clone)]
pub struct OperationContext {
    id:     OperationId,
    sink:   Arc<dyn ProgressSink>,
    cancel: CancelToken,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl OperationContext {
    pub fn new(sink: Arc<dyn ProgressSink>, cancel: CancelToken) -> Self {
        Self {
            id: OperationId::new(),
            sink,
            cancel,
        }
    }

    /// No reporting, never cancelled from outside.
    pub fn detached() -> Self { Self::new(Arc::new(NoopProgress), CancelToken::new()) }

    pub fn with_id(mut self, id: OperationId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> OperationId { self.id }

    pub fn token(&self) -> &CancelToken { &self.cancel }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                operation: operation.to_owned(),
            });
        }
        Ok(())
    }

    pub fn begin(&self, label: &str) { self.sink.create(self.id, label); }

    pub fn complete(&self, summary: &str) { self.sink.complete(self.id, summary); }

    pub fn cancelled(&self) { self.sink.cancel(self.id); }

    pub fn tracker(&self, files_total: usize, bytes_total: u64) -> Tracker<'_> {
        Tracker {
            ctx:      self,
            started:  Instant::now(),
            progress: Progress {
                files_total,
                bytes_total,
                ..Progress::default()
            },
        }
    }
}

/// Running totals for one operation.
pub struct Tracker<'a> {
    ctx:      &'a OperationContext,
    started:  Instant,
    progress: Progress,
}

impl Tracker<'_> {
    /// Count one finished file of `bytes` and report.
    pub fn advance(&mut self, current: &str, bytes: u64) {
        self.progress.files_done += 1;
        self.progress.bytes_done += bytes;
        self.progress.current = Some(current.to_owned());
        let elapsed = self.started.elapsed().as_secs_f64();
        self.progress.rate = if elapsed > 0.0 {
            self.progress.bytes_done as f64 / elapsed
        } else {
            0.0
        };
        self.ctx.sink.update(self.ctx.id, &self.progress);
    }

    pub fn progress(&self) -> &Progress { &self.progress }
}
