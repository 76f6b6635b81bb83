//! Simulation archives with sidecar metadata, selective extraction and
//! fragment assembly.
//!
//! # Architecture
//!
//! - `data/` - Archive, FileRecord, Sidecar, filter and manifest types
//! - `codec.rs` - gzip/zstd streams, split parts
//! - `store.rs` - On-storage layout of bodies, sidecars and flags
//! - `writer.rs` - Archive creation
//! - `extract.rs` - Sidecar-planned extraction
//! - `assemble.rs` - Multi-archive assembly and conflict strategies
//! - `verify.rs` - Full-body integrity check
//! - `progress.rs` / `operation.rs` - Progress sink, cancellation, background handles
//! - `service.rs` - Command surface over named locations

pub use assemble::{
    AssembleRequest, Assembler, AssemblyPlan, Conflict, ConflictCallback, ConflictChoice, Fragment, FragmentPlan, Occupant,
    Overlap,
};
pub use config::ArchiveConfig;
pub use error::{Error, Result};
pub use extract::{ExtractRequest, ExtractionPlan, Extractor};
pub use operation::{OperationHandle, OperationRegistry, OperationStatus, OperationSummary};
pub use progress::{CancelToken, NoopProgress, OperationContext, OperationId, Progress, ProgressSink};
pub use service::{AnySimulation, ArchiveService, KnownSimulations, LocationResolver, SimulationLookup, StaticLocations};
pub use store::ArchiveStore;
pub use verify::verify_archive;
pub use writer::{ArchiveWriter, CreateRequest};

pub mod assemble;
pub mod codec;
pub mod config;
pub mod data;
mod error;
pub mod extract;
pub mod operation;
pub mod progress;
pub mod service;
pub mod store;
mod verify;
pub mod writer;
