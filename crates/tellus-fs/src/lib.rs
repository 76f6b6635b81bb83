//! Storage capability, path sandbox and atomic write primitives.
//!
//! Every path that reaches a [`Storage`] backend from this workspace goes
//! through a [`Sandbox`] first.

mod error;
mod journal;
mod lock;
pub mod primitives;
pub mod sandbox;
pub mod storage;

pub use error::{Error, Result, read_error, write_error};
pub use journal::WriteJournal;
pub use lock::{PathGuard, PathLocks};
pub use primitives::{StagedFile, atomic_write, read_all};
pub use sandbox::{Sandbox, SecurityViolation, ViolationKind, WalkEntry, join_relative, normalize_relative};
pub use storage::{DirEntry, EntryKind, LocalStorage, MemoryStorage, Metadata, Storage, StorageWriter};
