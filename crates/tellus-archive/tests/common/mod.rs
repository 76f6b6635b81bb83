#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tellus_archive::data::{ArchiveId, Sidecar};
use tellus_archive::{AnySimulation, ArchiveConfig, ArchiveService, CreateRequest, OperationContext, StaticLocations};
use tellus_classify::Classifier;
use tellus_fs::{MemoryStorage, Sandbox, atomic_write};

pub const LOCATION: &str = "work";

/// A service over one in-memory backend with archives under `/archives`.
pub struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub service: ArchiveService,
}

impl Harness {
    pub fn new() -> Self { Self::with(Classifier::generic(), ArchiveConfig::default()) }

    pub fn with(classifier: Classifier, config: ArchiveConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let archives = Sandbox::new(storage.clone(), "/archives").unwrap();
        let service = ArchiveService::new(
            Arc::new(StaticLocations::new().with(LOCATION, archives)),
            Arc::new(AnySimulation),
            classifier,
            config,
        )
        .unwrap();
        Self { storage, service }
    }

    pub fn sandbox(&self, base: &str) -> Sandbox { Sandbox::new(self.storage.clone(), base).unwrap() }

    /// Write `files` under `/src/<name>` and return that sandbox.
    pub fn source(&self, name: &str, files: &[(&str, &[u8])]) -> Sandbox {
        let source = self.sandbox(&format!("/src/{name}"));
        for (path, data) in files {
            atomic_write(&source, path, data).unwrap();
        }
        source
    }

    /// Pin the modification time of a source file, in seconds after the epoch.
    pub fn touch(&self, name: &str, path: &str, secs: u64) {
        let full = format!("/src/{name}/{path}");
        self.storage
            .set_modified(full, SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    pub fn archive(&self, name: &str, request: CreateRequest) -> Sidecar {
        let request = request.id(ArchiveId::new(name).unwrap());
        self.service
            .create(LOCATION, &request, &OperationContext::detached())
            .unwrap()
    }

    /// Source files of `name` archived under the same id.
    pub fn archive_files(&self, name: &str, files: &[(&str, &[u8])]) -> Sidecar {
        let source = self.source(name, files);
        self.archive(name, CreateRequest::new(source))
    }
}

/// Poorly compressible bytes.
pub fn payload(seed: u32, len: usize) -> Vec<u8> {
    let mut x = seed | 1;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x as u8
        })
        .collect()
}

pub fn id(name: &str) -> ArchiveId { ArchiveId::new(name).unwrap() }

/// Every file below `sandbox`, with contents, sorted by path.
pub fn tree(sandbox: &Sandbox) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = sandbox
        .walk("")
        .unwrap()
        .into_iter()
        .map(|entry| {
            let data = tellus_fs::read_all(sandbox, &entry.path).unwrap();
            (entry.path, data)
        })
        .collect();
    files.sort();
    files
}
