use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RawMutex, lock_api::ArcMutexGuard};

/// Per-path exclusive locks for concurrent writers.
///
/// Two operations targeting the same destination path serialize; different
/// paths proceed in parallel. Entries are dropped once no guard holds them.
#[derive(Clone, Debug, Default)]
pub struct PathLocks {
    table: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

pub struct PathGuard {
    path:  PathBuf,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
    table: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl PathLocks {
    pub fn new() -> Self { Self::default() }

    /// Block until `path` is free, then hold it until the guard drops.
    pub fn lock(&self, path: impl AsRef<Path>) -> PathGuard {
        let path = path.as_ref().to_path_buf();
        let slot = self.table.lock().entry(path.clone()).or_default().clone();
        PathGuard {
            path,
            guard: Some(slot.lock_arc()),
            table: self.table.clone(),
        }
    }

    /// Number of paths currently held or waited on.
    pub fn len(&self) -> usize { self.table.lock().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl PathGuard {
    pub fn path(&self) -> &Path { &self.path }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock();
        // Only the table itself still references the slot.
        if table.get(&self.path).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            table.remove(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_path_serializes() {
        let locks = PathLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (locks, inside, peak) = (locks.clone(), inside.clone(), peak.clone());
                thread::spawn(move || {
                    let _guard = locks.lock("/dest/a.nc");
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn different_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.lock("/dest/a");
        let _b = locks.lock("/dest/b");
        assert_eq!(locks.len(), 2);
    }
}
