//! Selective extraction driven by the sidecar.
//!
//! Candidates are computed from the sidecar alone. The body is then read
//! once in stored order: organized archives open only the candidates,
//! stream bodies are skip-scanned entry by entry.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};

use tellus_fs::{PathLocks, Sandbox, StagedFile, WriteJournal};
use tellus_verify::{Sha256Hasher, VerifiedReader};
use tracing::{debug, error, info, warn};

use crate::config::ArchiveConfig;
use crate::data::{
    ArchiveId, ArchiveInfo, ArchiveKind, ExtractionFilter, ExtractionReport, FileError, FileRecord, Sidecar,
};
use crate::progress::{OperationContext, Tracker};
use crate::store::ArchiveStore;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct ExtractRequest {
    pub archive_id:  ArchiveId,
    pub filter:      ExtractionFilter,
    pub destination: Sandbox,
    /// Replace files that already exist at the destination.
    pub overwrite:   bool,
    /// Roll back every file written by this run on any failure.
    pub atomic:      bool,
}

impl ExtractRequest {
    pub fn new(archive_id: ArchiveId, destination: Sandbox) -> Self {
        Self {
            archive_id,
            filter: ExtractionFilter::default(),
            destination,
            overwrite: false,
            atomic: false,
        }
    }

    pub fn filter(mut self, filter: ExtractionFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn overwrite(mut self, yes: bool) -> Self {
        self.overwrite = yes;
        self
    }

    pub fn atomic(mut self, yes: bool) -> Self {
        self.atomic = yes;
        self
    }
}

/// Candidates of one archive for one filter.
#[derive(Clone, Debug)]
pub struct ExtractionPlan {
    pub sidecar:    Sidecar,
    /// In body order.
    pub candidates: Vec<FileRecord>,
}

impl ExtractionPlan {
    pub fn bytes(&self) -> u64 { self.candidates.iter().map(|r| r.size).sum() }
}

/// A record and where it lands below the destination.
#[derive(Clone, Debug)]
pub(crate) struct Target<'a> {
    pub record: &'a FileRecord,
    pub dest:   String,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct WriteMode {
    pub overwrite: bool,
    pub atomic:    bool,
}

#[derive(Clone, Debug)]
pub struct Extractor {
    store:  ArchiveStore,
    locks:  PathLocks,
    config: ArchiveConfig,
}

impl Extractor {
    pub fn new(store: ArchiveStore, locks: PathLocks, config: ArchiveConfig) -> Self { Self { store, locks, config } }

    pub fn store(&self) -> &ArchiveStore { &self.store }

    pub fn config(&self) -> &ArchiveConfig { &self.config }

    /// Validate the filter, load the sidecar and select candidates.
    /// The archive body is not touched.
    pub fn plan(&self, archive_id: &ArchiveId, filter: &ExtractionFilter) -> Result<ExtractionPlan> {
        let compiled = filter.compile()?;
        let sidecar = self.store.load(archive_id)?;
        let candidates: Vec<FileRecord> = sidecar.files().iter().filter(|r| compiled.matches(r)).cloned().collect();
        debug!(archive = %archive_id, candidates = candidates.len(), total = sidecar.files().len(), "extraction planned");
        Ok(ExtractionPlan { sidecar, candidates })
    }

    pub fn extract(&self, request: &ExtractRequest, ctx: &OperationContext) -> Result<ExtractionReport> {
        let plan = self.plan(&request.archive_id, &request.filter)?;
        ctx.begin(&format!("extract {}", request.archive_id));
        info!(
            archive = %request.archive_id,
            candidates = plan.candidates.len(),
            bytes = plan.bytes(),
            atomic = request.atomic,
            "extracting"
        );

        let targets: Vec<Target<'_>> = plan
            .candidates
            .iter()
            .map(|record| Target {
                record,
                dest: record.path.clone(),
            })
            .collect();
        let mode = WriteMode {
            overwrite: request.overwrite,
            atomic:    request.atomic,
        };
        let result = self.extract_targets(&plan.sidecar, &targets, &request.destination, mode, ctx);
        match &result {
            Ok(report) => {
                info!(
                    archive = %request.archive_id,
                    extracted = report.extracted,
                    skipped = report.skipped,
                    errors = report.errors.len(),
                    "extraction finished"
                );
                ctx.complete(&format!("{} of {} files extracted", report.extracted, report.candidates));
            }
            Err(err) if err.is_cancelled() => ctx.cancelled(),
            Err(err) => warn!(archive = %request.archive_id, error = %err, "extraction failed"),
        }
        result
    }

    /// Write `targets` of one archive below `destination`.
    pub(crate) fn extract_targets(
        &self,
        sidecar: &Sidecar,
        targets: &[Target<'_>],
        destination: &Sandbox,
        mode: WriteMode,
        ctx: &OperationContext,
    ) -> Result<ExtractionReport> {
        let info = &sidecar.archive;
        let mut report = ExtractionReport::new(info.id.clone(), targets.len());
        if targets.is_empty() {
            return Ok(report);
        }
        // Every destination path is checked before the first write.
        for target in targets {
            destination.resolve(&target.dest).inspect_err(|e| {
                error!(archive = %info.id, path = %target.dest, error = %e, "destination rejected");
            })?;
        }

        let mut session = Session {
            info,
            destination,
            locks: &self.locks,
            mode,
            journal: mode.atomic.then(|| WriteJournal::new(destination)),
            tracker: ctx.tracker(targets.len(), targets.iter().map(|t| t.record.size).sum()),
            ctx,
            buffer: vec![0u8; self.config.chunk_size.max(1)],
            report: &mut report,
        };

        let outcome = match info.kind {
            ArchiveKind::Organized => self.read_members(&mut session, targets),
            ArchiveKind::Compressed | ArchiveKind::Split => self.scan_stream(&mut session, targets),
        };
        if let Err(err) = outcome {
            if err.is_integrity() {
                if let Err(flag_err) = self.store.flag(&info.id, &err.to_string()) {
                    warn!(archive = %info.id, error = %flag_err, "could not flag archive");
                }
            }
            // An uncommitted journal rolls back on drop.
            return Err(err);
        }
        let journal = session.journal.take();
        drop(session);
        if let Some(journal) = journal {
            journal.commit()?;
        }
        Ok(report)
    }

    fn read_members(&self, session: &mut Session<'_, '_>, targets: &[Target<'_>]) -> Result<()> {
        for target in targets {
            session.ctx.check("extract")?;
            let mut reader = match self.store.open_member(session.info, &target.record.path) {
                Ok(reader) => reader,
                Err(Error::Storage(e)) if e.is_not_found() => {
                    return Err(integrity(session.info, format!("member '{}' is missing", target.record.path)));
                }
                Err(e) => return Err(e),
            };
            session.file(&mut reader, target)?;
        }
        Ok(())
    }

    fn scan_stream(&self, session: &mut Session<'_, '_>, targets: &[Target<'_>]) -> Result<()> {
        let info = session.info;
        let stream = self.store.open_stream(info).map_err(|e| match e {
            Error::Storage(e) => integrity(info, format!("body unreadable: {e}")),
            other => other,
        })?;
        let wanted: HashMap<&str, &Target<'_>> = targets.iter().map(|t| (t.record.path.as_str(), t)).collect();
        let mut found = HashSet::new();

        let mut archive = tar::Archive::new(stream);
        let entries = archive.entries().map_err(|e| integrity(info, e.to_string()))?;
        for entry in entries {
            session.ctx.check("extract")?;
            let mut entry = entry.map_err(|e| integrity(info, e.to_string()))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry
                .path()
                .map_err(|e| integrity(info, e.to_string()))?
                .to_string_lossy()
                .into_owned();
            let Some(target) = wanted.get(path.as_str()) else {
                continue;
            };
            session.file(&mut entry, target)?;
            found.insert(path);
            if found.len() == wanted.len() {
                break;
            }
        }

        if let Some(missing) = targets.iter().find(|t| !found.contains(&t.record.path)) {
            return Err(integrity(info, format!("entry '{}' missing from body", missing.record.path)));
        }
        Ok(())
    }
}

fn integrity(info: &ArchiveInfo, reason: String) -> Error {
    Error::ArchiveIntegrity {
        archive_id: info.id.clone(),
        reason,
    }
}

enum Written {
    Extracted(u64),
    Skipped,
}

enum Failure {
    /// Stops the run: integrity, security, cancellation.
    Fatal(Error),
    /// A destination-side failure of one file.
    File(Error),
}

fn file_failure(err: impl Into<Error>) -> Failure {
    let err = err.into();
    if err.is_security() { Failure::Fatal(err) } else { Failure::File(err) }
}

struct Session<'a, 'r> {
    info:        &'a ArchiveInfo,
    destination: &'a Sandbox,
    locks:       &'a PathLocks,
    mode:        WriteMode,
    journal:     Option<WriteJournal>,
    tracker:     Tracker<'a>,
    ctx:         &'a OperationContext,
    buffer:      Vec<u8>,
    report:      &'r mut ExtractionReport,
}

impl Session<'_, '_> {
    fn file(&mut self, reader: &mut dyn Read, target: &Target<'_>) -> Result<()> {
        match self.write_one(reader, target) {
            Ok(Written::Extracted(bytes)) => {
                debug!(path = %target.dest, bytes, "extracted");
                self.report.extracted += 1;
                self.report.bytes += bytes;
                self.report.files.push(target.dest.clone());
                self.tracker.advance(&target.dest, bytes);
                Ok(())
            }
            Ok(Written::Skipped) => {
                debug!(path = %target.dest, "exists, skipped");
                self.report.skipped += 1;
                self.tracker.advance(&target.dest, target.record.size);
                Ok(())
            }
            Err(Failure::Fatal(err)) => Err(err),
            Err(Failure::File(err)) if self.mode.atomic => Err(err),
            Err(Failure::File(err)) => {
                warn!(path = %target.dest, error = %err, "file not extracted");
                self.report.errors.push(FileError {
                    path:    target.dest.clone(),
                    message: err.to_string(),
                });
                self.tracker.advance(&target.dest, 0);
                Ok(())
            }
        }
    }

    fn write_one(&mut self, reader: &mut dyn Read, target: &Target<'_>) -> std::result::Result<Written, Failure> {
        self.ctx.check("extract").map_err(Failure::Fatal)?;
        let record = target.record;
        let resolved = self.destination.resolve(&target.dest).map_err(|e| Failure::Fatal(e.into()))?;
        let _guard = self.locks.lock(&resolved);

        match self.destination.stat(&target.dest).map_err(file_failure)? {
            Some(meta) if meta.is_dir() => {
                return Err(Failure::File(Error::Validation(format!(
                    "destination '{}' is a directory",
                    target.dest
                ))));
            }
            Some(_) if !self.mode.overwrite => return Ok(Written::Skipped),
            _ => {}
        }

        let mut staged = StagedFile::new(self.destination, target.dest.clone()).map_err(file_failure)?;
        let mut verified = VerifiedReader::new(reader.take(record.size.saturating_add(1)), Sha256Hasher::new());
        loop {
            let n = verified
                .read(&mut self.buffer)
                .map_err(|e| Failure::Fatal(integrity(self.info, format!("reading '{}': {e}", record.path))))?;
            if n == 0 {
                break;
            }
            staged.write_all(&self.buffer[..n]).map_err(file_failure)?;
            if self.ctx.is_cancelled() {
                staged.discard();
                return Err(Failure::Fatal(Error::Cancelled {
                    operation: "extract".into(),
                }));
            }
        }
        verified
            .finish(&record.checksum, record.size)
            .map_err(|e| Failure::Fatal(integrity(self.info, format!("'{}': {e}", record.path))))?;

        let written = match self.journal.as_mut() {
            Some(journal) => journal.publish(staged),
            None => staged.publish(),
        }
        .map_err(file_failure)?;
        Ok(Written::Extracted(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{ArchiveWriter, CreateRequest};
    use std::sync::Arc;
    use tellus_classify::{Classifier, ContentType};
    use tellus_fs::{MemoryStorage, atomic_write, read_all};

    struct Fixture {
        storage:   Arc<MemoryStorage>,
        source:    Sandbox,
        dest:      Sandbox,
        writer:    ArchiveWriter,
        extractor: Extractor,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let sandbox = |base: &str| Sandbox::new(storage.clone(), base).unwrap();
        let store = ArchiveStore::new("mem", sandbox("/archives"));
        let config = ArchiveConfig::default().chunk_size(4);
        Fixture {
            source: sandbox("/sim"),
            dest: sandbox("/restore"),
            writer: ArchiveWriter::new(store.clone(), Classifier::generic(), config.clone()),
            extractor: Extractor::new(store, PathLocks::new(), config),
            storage,
        }
    }

    fn archive(fx: &Fixture, id: &str, kind: ArchiveKind, files: &[(&str, &[u8])]) -> ArchiveId {
        for (path, data) in files {
            atomic_write(&fx.source, path, data).unwrap();
        }
        let id = ArchiveId::new(id).unwrap();
        let request = CreateRequest::new(fx.source.clone()).id(id.clone()).kind(kind);
        fx.writer.create(&request, &OperationContext::detached()).unwrap();
        id
    }

    const FILES: &[(&str, &[u8])] = &[
        ("output/a.nc", b"ocean temperature"),
        ("output/b.nc", b"sea ice"),
        ("run.log", b"step 1\nstep 2\n"),
    ];

    #[test]
    fn only_candidates_are_written() -> Result<()> {
        for kind in [ArchiveKind::Compressed, ArchiveKind::Split, ArchiveKind::Organized] {
            let fx = fixture();
            let id = archive(&fx, "a", kind, FILES);
            let request = ExtractRequest::new(id, fx.dest.clone())
                .filter(ExtractionFilter::new().content_type(ContentType::Output).pattern("**/a.nc"));
            let report = fx.extractor.extract(&request, &OperationContext::detached())?;

            assert_eq!(report.files, vec!["output/a.nc"], "{kind}");
            assert_eq!(read_all(&fx.dest, "output/a.nc")?, b"ocean temperature");
            assert!(!fx.dest.exists("run.log")?);
        }
        Ok(())
    }

    #[test]
    fn existing_files_are_skipped_without_overwrite() -> Result<()> {
        let fx = fixture();
        let id = archive(&fx, "a", ArchiveKind::Compressed, FILES);
        atomic_write(&fx.dest, "run.log", b"local edit")?;

        let report = fx
            .extractor
            .extract(&ExtractRequest::new(id.clone(), fx.dest.clone()), &OperationContext::detached())?;
        assert_eq!((report.extracted, report.skipped), (2, 1));
        assert_eq!(read_all(&fx.dest, "run.log")?, b"local edit");

        let report = fx
            .extractor
            .extract(&ExtractRequest::new(id, fx.dest.clone()).overwrite(true), &OperationContext::detached())?;
        assert_eq!(report.extracted, 3);
        assert_eq!(read_all(&fx.dest, "run.log")?, b"step 1\nstep 2\n");
        Ok(())
    }

    #[test]
    fn corrupted_member_is_an_integrity_error_and_flags() -> Result<()> {
        let fx = fixture();
        let id = archive(&fx, "a", ArchiveKind::Organized, FILES);
        atomic_write(fx.extractor.store().sandbox(), "a.d/output/b.nc", b"sea ica")?;

        let err = fx
            .extractor
            .extract(&ExtractRequest::new(id.clone(), fx.dest.clone()), &OperationContext::detached())
            .unwrap_err();
        assert!(err.is_integrity(), "{err}");
        assert!(fx.extractor.store().flag_reason(&id)?.is_some());
        assert!(!fx.dest.exists("output/b.nc")?);
        Ok(())
    }

    #[test]
    fn destination_failures_are_per_file_unless_atomic() -> Result<()> {
        let fx = fixture();
        let id = archive(&fx, "a", ArchiveKind::Compressed, FILES);
        fx.storage.fail_paths_containing("/restore/output/b.nc");

        let report = fx
            .extractor
            .extract(&ExtractRequest::new(id.clone(), fx.dest.clone()), &OperationContext::detached())?;
        assert_eq!(report.extracted, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.into_result(), Err(Error::PartialExtraction { .. })));

        let other = fx.dest.sub("atomic")?;
        fx.storage.clear_faults();
        fx.storage.fail_paths_containing("/restore/atomic/run.log");
        let result = fx
            .extractor
            .extract(&ExtractRequest::new(id, other.clone()).atomic(true), &OperationContext::detached());
        assert!(result.is_err());
        assert!(other.walk("").map(|files| files.is_empty()).unwrap_or(true));
        Ok(())
    }
}
