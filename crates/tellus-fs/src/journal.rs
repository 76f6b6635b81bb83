use tracing::{debug, warn};

use crate::primitives::StagedFile;
use crate::{Result, Sandbox};

const BACKUP_SUFFIX: &str = ".tellus-backup";

#[derive(Debug)]
struct Entry {
    target: String,
    backup: Option<String>,
}

/// Record of files published by a multi-file operation.
///
/// Replaced files are moved aside rather than deleted, so `rollback`
/// restores the destination to its prior state. Dropping an uncommitted
/// journal rolls back.
#[derive(Debug)]
pub struct WriteJournal {
    sandbox:   Sandbox,
    entries:   Vec<Entry>,
    committed: bool,
}

impl WriteJournal {
    pub fn new(sandbox: &Sandbox) -> Self {
        Self {
            sandbox:   sandbox.clone(),
            entries:   Vec::new(),
            committed: false,
        }
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Publish `staged`, moving any existing target aside first.
    pub fn publish(&mut self, staged: StagedFile) -> Result<u64> {
        let target = staged.target().to_owned();
        let backup = if self.sandbox.stat(&target)?.is_some_and(|m| m.is_file()) {
            let backup = backup_path(&target);
            self.sandbox.rename(&target, &backup)?;
            Some(backup)
        } else {
            None
        };

        match staged.publish() {
            Ok(written) => {
                self.entries.push(Entry { target, backup });
                Ok(written)
            }
            Err(err) => {
                if let Some(backup) = backup {
                    self.restore(&backup, &target);
                }
                Err(err)
            }
        }
    }

    /// Keep everything published; delete the moved-aside originals.
    pub fn commit(mut self) -> Result<()> {
        self.committed = true;
        for entry in &self.entries {
            if let Some(backup) = &entry.backup {
                self.sandbox.delete(backup)?;
            }
        }
        debug!(files = self.entries.len(), "write journal committed");
        Ok(())
    }

    /// Remove published files in reverse order and restore originals.
    pub fn rollback(mut self) { self.undo(); }

    fn undo(&mut self) {
        self.committed = true;
        let entries = std::mem::take(&mut self.entries);
        if !entries.is_empty() {
            debug!(files = entries.len(), "rolling back write journal");
        }
        for entry in entries.into_iter().rev() {
            if let Err(err) = self.sandbox.delete(&entry.target) {
                warn!(path = %entry.target, error = %err, "rollback could not remove file");
            }
            if let Some(backup) = entry.backup {
                self.restore(&backup, &entry.target);
            }
        }
    }

    fn restore(&self, backup: &str, target: &str) {
        if let Err(err) = self.sandbox.rename(backup, target) {
            warn!(path = %target, error = %err, "rollback could not restore original");
        }
    }
}

impl Drop for WriteJournal {
    fn drop(&mut self) {
        if !self.committed {
            self.undo();
        }
    }
}

fn backup_path(target: &str) -> String {
    let (parent, name) = match target.rsplit_once('/') {
        Some((parent, name)) => (Some(parent), name),
        None => (None, target),
    };
    let backup = format!(".{name}.{}{BACKUP_SUFFIX}", uuid::Uuid::new_v4().simple());
    match parent {
        Some(parent) => format!("{parent}/{backup}"),
        None => backup,
    }
}
