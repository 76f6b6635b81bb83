//! Command surface over named storage locations: create, list, show,
//! extract, assemble and verify, in the foreground or as background
//! operations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tellus_classify::Classifier;
use tellus_fs::{PathLocks, Sandbox};
use tracing::{debug, warn};

use crate::assemble::{AssembleRequest, Assembler, AssemblyPlan};
use crate::config::ArchiveConfig;
use crate::data::{ArchiveId, ArchiveInfo, AssemblyManifest, ExtractionFilter, ExtractionReport, FileRecord, Sidecar, VerifyReport};
use crate::extract::{ExtractRequest, Extractor};
use crate::operation::{OperationHandle, OperationRegistry};
use crate::progress::{OperationContext, ProgressSink};
use crate::store::ArchiveStore;
use crate::verify::verify_archive;
use crate::writer::{ArchiveWriter, CreateRequest};
use crate::{Error, Result};

/// Answers whether a simulation id is known.
pub trait SimulationLookup: Send + Sync {
    fn exists(&self, simulation_id: &str) -> bool;
}

/// Accepts every simulation id.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnySimulation;

impl SimulationLookup for AnySimulation {
    fn exists(&self, _: &str) -> bool { true }
}

/// A fixed set of simulation ids.
#[derive(Clone, Debug, Default)]
pub struct KnownSimulations(BTreeSet<String>);

impl KnownSimulations {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(ids: I) -> Self { Self(ids.into_iter().map(Into::into).collect()) }
}

impl SimulationLookup for KnownSimulations {
    fn exists(&self, simulation_id: &str) -> bool { self.0.contains(simulation_id) }
}

/// Maps a location name to the sandbox archives live under.
pub trait LocationResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Sandbox>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticLocations(BTreeMap<String, Sandbox>);

impl StaticLocations {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, name: impl Into<String>, sandbox: Sandbox) -> Self {
        self.0.insert(name.into(), sandbox);
        self
    }
}

impl LocationResolver for StaticLocations {
    fn resolve(&self, name: &str) -> Result<Sandbox> {
        self.0.get(name).cloned().ok_or_else(|| Error::LocationNotFound(name.to_owned()))
    }
}

struct Inner {
    locations:   Arc<dyn LocationResolver>,
    simulations: Arc<dyn SimulationLookup>,
    classifier:  Classifier,
    config:      ArchiveConfig,
    locks:       PathLocks,
    operations:  OperationRegistry,
}

/// Cheap to clone; clones share locks and the operation registry.
#[derive(Clone)]
pub struct ArchiveService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ArchiveService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveService").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

impl ArchiveService {
    pub fn new(
        locations: Arc<dyn LocationResolver>,
        simulations: Arc<dyn SimulationLookup>,
        classifier: Classifier,
        config: ArchiveConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                locations,
                simulations,
                classifier,
                config,
                locks: PathLocks::new(),
                operations: OperationRegistry::new(),
            }),
        })
    }

    pub fn config(&self) -> &ArchiveConfig { &self.inner.config }

    pub fn operations(&self) -> &OperationRegistry { &self.inner.operations }

    pub fn store(&self, location: &str) -> Result<ArchiveStore> {
        let sandbox = self.inner.locations.resolve(location)?;
        Ok(ArchiveStore::new(location, sandbox))
    }

    fn writer(&self, location: &str) -> Result<ArchiveWriter> {
        let writer = ArchiveWriter::new(self.store(location)?, self.inner.classifier.clone(), self.inner.config.clone());
        Ok(writer.with_locks(self.inner.locks.clone()))
    }

    fn extractor(&self, location: &str) -> Result<Extractor> {
        Ok(Extractor::new(self.store(location)?, self.inner.locks.clone(), self.inner.config.clone()))
    }

    pub fn create(&self, location: &str, request: &CreateRequest, ctx: &OperationContext) -> Result<Sidecar> {
        if let Some(simulation) = &request.simulation_id {
            if !self.inner.simulations.exists(simulation) {
                return Err(Error::SimulationNotFound(simulation.clone()));
            }
        }
        self.writer(location)?.create(request, ctx)
    }

    /// Every readable archive at `location`. Unreadable sidecars are
    /// logged and left out.
    pub fn list(&self, location: &str) -> Result<Vec<ArchiveInfo>> {
        let store = self.store(location)?;
        let mut archives = Vec::new();
        for id in store.list()? {
            match store.load(&id) {
                Ok(sidecar) => archives.push(sidecar.archive),
                Err(err) if err.is_security() => return Err(err),
                Err(err) => warn!(archive = %id, error = %err, "skipping unreadable sidecar"),
            }
        }
        debug!(location, archives = archives.len(), "archives listed");
        Ok(archives)
    }

    pub fn show(&self, location: &str, id: &ArchiveId) -> Result<Sidecar> { self.store(location)?.load(id) }

    /// Records selected by `filter`, answered from the sidecar alone.
    pub fn list_files(&self, location: &str, id: &ArchiveId, filter: &ExtractionFilter) -> Result<Vec<FileRecord>> {
        Ok(self.extractor(location)?.plan(id, filter)?.candidates)
    }

    pub fn delete(&self, location: &str, id: &ArchiveId) -> Result<()> { self.store(location)?.delete(id) }

    pub fn extract(&self, location: &str, request: &ExtractRequest, ctx: &OperationContext) -> Result<ExtractionReport> {
        self.extractor(location)?.extract(request, ctx)
    }

    pub fn plan_assembly(&self, location: &str, request: &AssembleRequest) -> Result<AssemblyPlan> {
        Assembler::new(self.extractor(location)?).plan(request)
    }

    pub fn assemble(&self, location: &str, request: &AssembleRequest, ctx: &OperationContext) -> Result<AssemblyManifest> {
        Assembler::new(self.extractor(location)?).assemble(request, ctx)
    }

    pub fn verify(&self, location: &str, id: &ArchiveId, ctx: &OperationContext) -> Result<VerifyReport> {
        let store = self.store(location)?;
        let sidecar = store.load(id)?;
        verify_archive(&store, &sidecar, ctx)
    }

    /// The recorded integrity failure of an archive, if any.
    pub fn flagged(&self, location: &str, id: &ArchiveId) -> Result<Option<String>> { self.store(location)?.flag_reason(id) }

    pub fn spawn_create(
        &self,
        location: &str,
        request: CreateRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<OperationHandle<Sidecar>> {
        let service = self.clone();
        let location = location.to_owned();
        let label = format!("create in {location}");
        self.inner
            .operations
            .spawn(label, sink, move |ctx| service.create(&location, &request, &ctx))
    }

    pub fn spawn_extract(
        &self,
        location: &str,
        request: ExtractRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<OperationHandle<ExtractionReport>> {
        let service = self.clone();
        let location = location.to_owned();
        let label = format!("extract {}", request.archive_id);
        self.inner
            .operations
            .spawn(label, sink, move |ctx| service.extract(&location, &request, &ctx))
    }

    pub fn spawn_assemble(
        &self,
        location: &str,
        request: AssembleRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<OperationHandle<AssemblyManifest>> {
        let service = self.clone();
        let location = location.to_owned();
        let label = format!("assemble {} fragments", request.fragments.len());
        self.inner
            .operations
            .spawn(label, sink, move |ctx| service.assemble(&location, &request, &ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tellus_fs::{MemoryStorage, atomic_write};

    fn service(storage: &Arc<MemoryStorage>) -> ArchiveService {
        let locations = StaticLocations::new().with("work", Sandbox::new(storage.clone(), "/work/archives").unwrap());
        ArchiveService::new(
            Arc::new(locations),
            Arc::new(KnownSimulations::new(["ocean-01"])),
            Classifier::generic(),
            ArchiveConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn unknown_location_and_simulation_are_rejected() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let service = service(&storage);
        let source = Sandbox::new(storage.clone(), "/src")?;
        atomic_write(&source, "a.nc", b"x")?;

        let err = service.list("tape").unwrap_err();
        assert!(matches!(err, Error::LocationNotFound(name) if name == "tape"));

        let request = CreateRequest::new(source.clone()).simulation("atmos-99");
        let err = service.create("work", &request, &OperationContext::detached()).unwrap_err();
        assert!(matches!(err, Error::SimulationNotFound(_)));

        let sidecar = service.create("work", &request.simulation("ocean-01"), &OperationContext::detached())?;
        assert_eq!(sidecar.archive.simulation_id.as_deref(), Some("ocean-01"));
        assert_eq!(sidecar.archive.location, "work");
        Ok(())
    }

    #[test]
    fn list_show_and_delete() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let service = service(&storage);
        let source = Sandbox::new(storage.clone(), "/src")?;
        atomic_write(&source, "output/a.nc", b"data")?;
        atomic_write(&source, "run.log", b"log")?;

        let id = ArchiveId::new("first")?;
        service.create("work", &CreateRequest::new(source).id(id.clone()), &OperationContext::detached())?;

        let listed = service.list("work")?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(service.show("work", &id)?.inventory.file_count, 2);

        let logs = service.list_files("work", &id, &ExtractionFilter::new().pattern("*.log"))?;
        assert_eq!(logs.len(), 1);

        service.delete("work", &id)?;
        assert!(service.list("work")?.is_empty());
        assert!(matches!(service.show("work", &id), Err(Error::ArchiveNotFound(_))));
        Ok(())
    }
}
