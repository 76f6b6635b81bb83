//! Background operations that can be observed and cancelled by id.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::progress::{CancelToken, OperationContext, OperationId, ProgressSink};
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl OperationStatus {
    pub fn is_finished(&self) -> bool { !matches!(self, Self::Running) }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OperationSummary {
    pub id:     OperationId,
    pub label:  String,
    pub status: OperationStatus,
}

#[derive(Debug)]
struct Entry {
    label:  String,
    status: OperationStatus,
    token:  CancelToken,
}

type Table = Arc<Mutex<HashMap<OperationId, Entry>>>;

/// Tracks operations started with [`OperationRegistry::spawn`].
#[derive(Clone, Debug, Default)]
pub struct OperationRegistry {
    table: Table,
}

impl OperationRegistry {
    pub fn new() -> Self { Self::default() }

    /// Run `work` on its own thread. The closure receives a context whose
    /// cancel token is reachable through the registry and the handle.
    pub fn spawn<T, F>(&self, label: impl Into<String>, sink: Arc<dyn ProgressSink>, work: F) -> Result<OperationHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(OperationContext) -> Result<T> + Send + 'static,
    {
        let label = label.into();
        let token = CancelToken::new();
        let ctx = OperationContext::new(sink, token.clone());
        let id = ctx.id();
        self.table.lock().insert(id, Entry {
            label:  label.clone(),
            status: OperationStatus::Running,
            token:  token.clone(),
        });

        let table = self.table.clone();
        let thread = std::thread::Builder::new()
            .name(format!("tellus-op-{id}"))
            .spawn(move || {
                let result = work(ctx);
                let status = match &result {
                    Ok(_) => OperationStatus::Completed,
                    Err(err) if err.is_cancelled() => OperationStatus::Cancelled,
                    Err(err) => OperationStatus::Failed(err.to_string()),
                };
                debug!(operation = %id, status = %status, "operation finished");
                if let Some(entry) = table.lock().get_mut(&id) {
                    entry.status = status;
                }
                result
            });
        let thread = match thread {
            Ok(thread) => thread,
            Err(err) => {
                warn!(operation = %id, label = %label, error = %err, "could not start operation");
                self.table.lock().remove(&id);
                return Err(Error::Io(err));
            }
        };

        Ok(OperationHandle {
            id,
            token,
            table: self.table.clone(),
            thread,
        })
    }

    pub fn status(&self, id: OperationId) -> Option<OperationStatus> {
        self.table.lock().get(&id).map(|e| e.status.clone())
    }

    /// Request cancellation; false when the id is unknown or finished.
    pub fn cancel(&self, id: OperationId) -> bool {
        match self.table.lock().get(&id) {
            Some(entry) if !entry.status.is_finished() => {
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn list(&self) -> Vec<OperationSummary> {
        let mut ops: Vec<_> = self
            .table
            .lock()
            .iter()
            .map(|(id, entry)| OperationSummary {
                id:     *id,
                label:  entry.label.clone(),
                status: entry.status.clone(),
            })
            .collect();
        ops.sort_by(|a, b| a.label.cmp(&b.label));
        ops
    }

    /// Forget finished operations.
    pub fn prune(&self) { self.table.lock().retain(|_, e| !e.status.is_finished()); }
}

pub struct OperationHandle<T> {
    id:     OperationId,
    token:  CancelToken,
    table:  Table,
    thread: JoinHandle<Result<T>>,
}

impl<T> fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle").field("id", &self.id).finish()
    }
}

impl<T> OperationHandle<T> {
    pub fn id(&self) -> OperationId { self.id }

    pub fn cancel(&self) { self.token.cancel(); }

    pub fn is_finished(&self) -> bool { self.thread.is_finished() }

    pub fn status(&self) -> OperationStatus {
        self.table
            .lock()
            .get(&self.id)
            .map(|e| e.status.clone())
            .unwrap_or(OperationStatus::Running)
    }

    /// Block until the operation ends and return its result.
    pub fn wait(self) -> Result<T> {
        self.thread
            .join()
            .unwrap_or_else(|_| Err(Error::Io(io::Error::other("operation thread panicked"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use std::sync::mpsc;

    #[test]
    fn completed_operation_reports_its_result() -> Result<()> {
        let registry = OperationRegistry::new();
        let handle = registry.spawn("sum", Arc::new(NoopProgress), |_| Ok(2 + 2))?;
        let id = handle.id();
        assert_eq!(handle.wait()?, 4);
        assert_eq!(registry.status(id), Some(OperationStatus::Completed));
        assert!(!registry.cancel(id));
        Ok(())
    }

    #[test]
    fn cancel_by_id_reaches_the_context() -> Result<()> {
        let registry = OperationRegistry::new();
        let (started_tx, started_rx) = mpsc::channel();
        let handle = registry.spawn("spin", Arc::new(NoopProgress), move |ctx| {
            let _ = started_tx.send(());
            loop {
                ctx.check("spin")?;
                std::thread::yield_now();
            }
        })?;
        let _ = started_rx.recv();
        let id = handle.id();
        assert!(registry.cancel(id));

        let result: Result<()> = handle.wait();
        assert!(result.is_err_and(|e| e.is_cancelled()));
        assert_eq!(registry.status(id), Some(OperationStatus::Cancelled));
        Ok(())
    }

    #[test]
    fn failures_are_listed_and_pruned() -> Result<()> {
        let registry = OperationRegistry::new();
        let handle = registry.spawn("broken", Arc::new(NoopProgress), |_| -> Result<()> {
            Err(Error::Validation("bad input".into()))
        })?;
        assert!(handle.wait().is_err());

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, OperationStatus::Failed("invalid request: bad input".into()));
        registry.prune();
        assert!(registry.list().is_empty());
        Ok(())
    }
}
