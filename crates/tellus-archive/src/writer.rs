//! Archive creation: scan, classify, stream the body, publish the sidecar.
//!
//! The body is published before the sidecar, and a sidecar that fails to
//! publish takes the body down with it. An archive therefore either has
//! both halves or does not exist.

use std::collections::BTreeSet;
use std::io::{self, Read, Write};

use chrono::{DateTime, Utc};
use crossbeam::channel;
use tellus_classify::{Classifier, ContentType, Glob, Importance};
use tellus_fs::primitives::{is_partial, partial_path};
use tellus_fs::{PathLocks, Sandbox, StagedFile, WalkEntry, join_relative};
use tellus_verify::{HashingWriter, Sha256Hasher, VerifiedReader};
use tracing::{debug, info, warn};

use crate::codec::{BodySink, SplitWriter, part_name};
use crate::config::ArchiveConfig;
use crate::data::{ArchiveId, ArchiveInfo, ArchiveKind, Codec, FileRecord, Sidecar, is_archivable};
use crate::progress::OperationContext;
use crate::store::ArchiveStore;
use crate::{Error, Result};

/// What to archive and how.
#[derive(Clone, Debug)]
pub struct CreateRequest {
    pub source:            Sandbox,
    /// Directory below the source base; empty for the whole base.
    pub root:              String,
    pub archive_id:        Option<ArchiveId>,
    pub simulation_id:     Option<String>,
    pub kind:              ArchiveKind,
    /// Overrides the configured codec.
    pub codec:             Option<Codec>,
    pub include:           Vec<String>,
    pub exclude:           Vec<String>,
    pub content_types:     BTreeSet<ContentType>,
    pub importance:        BTreeSet<Importance>,
    pub include_temporary: bool,
    pub include_hidden:    bool,
    pub description:       Option<String>,
    pub version:           Option<String>,
    pub tags:              BTreeSet<String>,
}

impl CreateRequest {
    pub fn new(source: Sandbox) -> Self {
        Self {
            source,
            root: String::new(),
            archive_id: None,
            simulation_id: None,
            kind: ArchiveKind::default(),
            codec: None,
            include: Vec::new(),
            exclude: Vec::new(),
            content_types: BTreeSet::new(),
            importance: BTreeSet::new(),
            include_temporary: false,
            include_hidden: false,
            description: None,
            version: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn id(mut self, id: ArchiveId) -> Self {
        self.archive_id = Some(id);
        self
    }

    pub fn simulation(mut self, simulation_id: impl Into<String>) -> Self {
        self.simulation_id = Some(simulation_id.into());
        self
    }

    pub fn kind(mut self, kind: ArchiveKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include.push(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_types.insert(content_type);
        self
    }

    pub fn importance(mut self, importance: Importance) -> Self {
        self.importance.insert(importance);
        self
    }

    pub fn include_temporary(mut self, yes: bool) -> Self {
        self.include_temporary = yes;
        self
    }

    pub fn include_hidden(mut self, yes: bool) -> Self {
        self.include_hidden = yes;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Checked copy of a request: globs compiled, id fixed, root normalized.
struct Plan {
    id:      ArchiveId,
    root:    String,
    codec:   Codec,
    level:   u32,
    include: Vec<Glob>,
    exclude: Vec<Glob>,
}

/// A scanned source file awaiting its turn in the body.
struct Scanned {
    record:      FileRecord,
    date_format: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ArchiveWriter {
    store:      ArchiveStore,
    classifier: Classifier,
    config:     ArchiveConfig,
    locks:      PathLocks,
}

impl ArchiveWriter {
    pub fn new(store: ArchiveStore, classifier: Classifier, config: ArchiveConfig) -> Self {
        Self {
            store,
            classifier,
            config,
            locks: PathLocks::new(),
        }
    }

    /// Share id locks with other writers over the same locations.
    pub fn with_locks(mut self, locks: PathLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Build an archive and its sidecar. Returns the published sidecar.
    ///
    /// The archive id stays locked from the existence check until the
    /// sidecar is published, so one id is never created twice.
    pub fn create(&self, request: &CreateRequest, ctx: &OperationContext) -> Result<Sidecar> {
        let id = request.archive_id.clone().unwrap_or_else(ArchiveId::generate);
        let _guard = self.locks.lock(self.store.sandbox().resolve(ArchiveStore::sidecar_name(&id))?);
        let plan = self.plan(request, id)?;
        ctx.begin(&format!("create {}", plan.id));
        info!(archive = %plan.id, kind = %request.kind, location = self.store.location(), "creating archive");

        match self.run(request, &plan, ctx) {
            Ok(sidecar) => {
                info!(
                    archive = %plan.id,
                    files = sidecar.inventory.file_count,
                    bytes = sidecar.inventory.total_size,
                    "archive created"
                );
                ctx.complete(&format!("{} files archived", sidecar.inventory.file_count));
                Ok(sidecar)
            }
            Err(err) => {
                if err.is_cancelled() {
                    ctx.cancelled();
                }
                warn!(archive = %plan.id, error = %err, "archive creation failed");
                Err(err)
            }
        }
    }

    fn plan(&self, request: &CreateRequest, id: ArchiveId) -> Result<Plan> {
        self.config.validate()?;
        let globs = |patterns: &[String]| -> Result<Vec<Glob>> {
            patterns
                .iter()
                .map(|p| Glob::new(p).map_err(|e| Error::Validation(e.to_string())))
                .collect()
        };
        let include = globs(&request.include)?;
        let exclude = globs(&request.exclude)?;
        let root = tellus_fs::normalize_relative(&request.root)?;

        if self.store.exists(&id)? {
            return Err(Error::ArchiveExists(id));
        }
        let codec = request.codec.unwrap_or(self.config.codec);
        let level = match codec {
            Codec::Gzip => self.config.compression_level.min(9),
            Codec::Zstd => self.config.compression_level.clamp(1, 22),
        };
        Ok(Plan {
            id,
            root,
            codec,
            level,
            include,
            exclude,
        })
    }

    fn run(&self, request: &CreateRequest, plan: &Plan, ctx: &OperationContext) -> Result<Sidecar> {
        let walked: Vec<WalkEntry> = request
            .source
            .walk(&plan.root)?
            .into_iter()
            .filter(|entry| self.selected(request, plan, &entry.path))
            .collect();
        debug!(archive = %plan.id, files = walked.len(), "source enumerated");

        let scanned = self.scan(&request.source, &plan.root, walked, ctx)?;
        let mut date_formats = BTreeSet::new();
        let mut records = Vec::with_capacity(scanned.len());
        for item in scanned {
            if !self.restricted(request, &item.record) {
                continue;
            }
            if let (Some(format), Some(_)) = (item.date_format, item.record.date) {
                date_formats.insert(format);
            }
            records.push(item.record);
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));

        let (parts, body_size, body_checksum) = match request.kind {
            ArchiveKind::Compressed | ArchiveKind::Split => {
                let (parts, size, checksum) = self.write_stream(request, plan, &records, ctx)?;
                (parts, size, Some(checksum))
            }
            ArchiveKind::Organized => {
                let size = self.write_organized(request, plan, &records, ctx)?;
                (1, size, None)
            }
        };

        let info = ArchiveInfo {
            id: plan.id.clone(),
            kind: request.kind,
            codec: plan.codec,
            location: self.store.location().to_owned(),
            created: Utc::now(),
            simulation_id: request.simulation_id.clone(),
            description: request.description.clone(),
            version: request.version.clone(),
            tags: request.tags.clone(),
            parts,
            body_size,
            body_checksum,
        };
        let mut sidecar = Sidecar::build(info, records, date_formats);
        sidecar.metadata_version = self.config.metadata_version.clone();

        if let Err(err) = ctx.check("create").and_then(|_| self.store.save(&sidecar)) {
            self.remove_body(&sidecar.archive);
            return Err(err);
        }
        Ok(sidecar)
    }

    fn selected(&self, request: &CreateRequest, plan: &Plan, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        if is_partial(name) || (!request.include_hidden && !is_archivable(path)) {
            return false;
        }
        if !plan.include.is_empty() && !plan.include.iter().any(|g| g.is_match(path)) {
            return false;
        }
        !plan.exclude.iter().any(|g| g.is_match(path))
    }

    fn restricted(&self, request: &CreateRequest, record: &FileRecord) -> bool {
        if !request.content_types.is_empty() && !request.content_types.contains(&record.content_type) {
            return false;
        }
        if !request.importance.is_empty() {
            return request.importance.contains(&record.importance);
        }
        request.include_temporary || record.importance != Importance::Temporary
    }

    /// Hash and classify every file on a bounded pool of workers.
    fn scan(&self, source: &Sandbox, root: &str, entries: Vec<WalkEntry>, ctx: &OperationContext) -> Result<Vec<Scanned>> {
        let total = entries.len();
        let workers = self.config.workers.clamp(1, total.max(1));
        let (job_tx, job_rx) = channel::bounded::<(usize, WalkEntry)>(workers * 2);
        let (done_tx, done_rx) = channel::unbounded::<(usize, Result<Scanned>)>();

        let outcome = crossbeam::thread::scope(|scope| {
            for _ in 0..workers {
                let jobs = job_rx.clone();
                let done = done_tx.clone();
                scope.spawn(move |_| {
                    for (index, entry) in jobs.iter() {
                        let result = match ctx.check("create") {
                            Ok(()) => self.scan_one(source, root, entry),
                            Err(err) => Err(err),
                        };
                        if done.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            for job in entries.into_iter().enumerate() {
                if ctx.is_cancelled() || job_tx.send(job).is_err() {
                    break;
                }
            }
            drop(job_tx);

            let mut slots: Vec<Option<Scanned>> = (0..total).map(|_| None).collect();
            let mut first_error = None;
            for (index, result) in done_rx.iter() {
                match result {
                    Ok(scanned) => slots[index] = Some(scanned),
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => {
                    ctx.check("create")?;
                    Ok(slots.into_iter().flatten().collect())
                }
            }
        });
        outcome.map_err(|_| Error::Io(io::Error::other("scan worker panicked")))?
    }

    fn scan_one(&self, source: &Sandbox, root: &str, entry: WalkEntry) -> Result<Scanned> {
        let full = join_relative(root, &entry.path);
        let mut reader = VerifiedReader::new(source.read(&full)?, Sha256Hasher::new());
        io::copy(&mut reader, &mut io::sink()).map_err(|e| tellus_fs::read_error(&full, e))?;
        let (digest, size) = reader.into_digest();

        let class = self.classifier.classify(&entry.path, size);
        let modified = entry.modified.map(DateTime::<Utc>::from).unwrap_or_else(Utc::now);
        debug!(path = %entry.path, content_type = %class.content_type, "classified");
        Ok(Scanned {
            record:      FileRecord {
                path: entry.path,
                size,
                checksum: hex::encode(digest),
                modified,
                content_type: class.content_type,
                importance: class.importance,
                date: class.date,
                tags: class.tags.into_iter().collect(),
            },
            date_format: class.date_format,
        })
    }

    /// Stream records into a compressed tar body, single-threaded and in
    /// path order.
    fn write_stream(
        &self,
        request: &CreateRequest,
        plan: &Plan,
        records: &[FileRecord],
        ctx: &OperationContext,
    ) -> Result<(u32, u64, String)> {
        let sandbox = self.store.sandbox();
        let body = ArchiveStore::body_name(&plan.id, plan.codec);
        let sink = match request.kind {
            ArchiveKind::Split => BodySink::Split(SplitWriter::new(sandbox, body, self.config.split_part_size)),
            _ => BodySink::Single(StagedFile::new(sandbox, body)?),
        };
        let encoder = plan
            .codec
            .encoder(HashingWriter::new(sink, Sha256Hasher::new()), plan.level)?;
        let mut builder = tar::Builder::new(encoder);

        let mut tracker = ctx.tracker(records.len(), records.iter().map(|r| r.size).sum());
        for record in records {
            ctx.check("create")?;
            let full = join_relative(&plan.root, &record.path);
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(record.size);
            header.set_mode(0o644);
            header.set_mtime(record.modified.timestamp().max(0) as u64);

            let mut reader = VerifiedReader::new(request.source.read(&full)?.take(record.size), Sha256Hasher::new());
            builder.append_data(&mut header, &record.path, &mut reader)?;
            reader
                .finish(&record.checksum, record.size)
                .map_err(|_| Error::SourceChanged { path: full.clone() })?;
            tracker.advance(&record.path, record.size);
        }

        let hashing = builder.into_inner()?.finish()?;
        let (sink, checksum, size) = hashing.finish();
        ctx.check("create")?;
        let parts = sink.publish()?;
        Ok((parts, size, checksum))
    }

    /// Copy records into a staging tree and rename it into place.
    fn write_organized(
        &self,
        request: &CreateRequest,
        plan: &Plan,
        records: &[FileRecord],
        ctx: &OperationContext,
    ) -> Result<u64> {
        let sandbox = self.store.sandbox();
        let target = ArchiveStore::organized_dir(&plan.id);
        let staging = StagingDir::new(sandbox, partial_path(&target))?;

        let mut tracker = ctx.tracker(records.len(), records.iter().map(|r| r.size).sum());
        let mut buffer = vec![0u8; self.config.chunk_size];
        for record in records {
            ctx.check("create")?;
            let full = join_relative(&plan.root, &record.path);
            let mut staged = StagedFile::new(sandbox, join_relative(&staging.path, &record.path))?;
            let mut reader = VerifiedReader::new(request.source.read(&full)?.take(record.size), Sha256Hasher::new());
            loop {
                let n = reader.read(&mut buffer).map_err(|e| tellus_fs::read_error(&full, e))?;
                if n == 0 {
                    break;
                }
                staged.write_all(&buffer[..n])?;
            }
            reader
                .finish(&record.checksum, record.size)
                .map_err(|_| Error::SourceChanged { path: full.clone() })?;
            staged.publish()?;
            tracker.advance(&record.path, record.size);
        }

        ctx.check("create")?;
        staging.commit(&target)?;
        Ok(records.iter().map(|r| r.size).sum())
    }

    fn remove_body(&self, info: &ArchiveInfo) {
        let sandbox = self.store.sandbox();
        let body = ArchiveStore::body_name(&info.id, info.codec);
        let names: Vec<String> = match info.kind {
            ArchiveKind::Compressed => vec![body],
            ArchiveKind::Split => (0..info.parts as usize).map(|i| part_name(&body, i)).collect(),
            ArchiveKind::Organized => vec![ArchiveStore::organized_dir(&info.id)],
        };
        for name in names {
            if let Err(err) = sandbox.delete(&name) {
                warn!(path = %name, error = %err, "could not remove orphaned archive body");
            }
        }
    }
}

/// Hidden directory removed on drop unless renamed into place.
struct StagingDir {
    sandbox: Sandbox,
    path:    String,
    done:    bool,
}

impl StagingDir {
    fn new(sandbox: &Sandbox, path: String) -> Result<Self> {
        sandbox.create_dir_all(&path)?;
        Ok(Self {
            sandbox: sandbox.clone(),
            path,
            done: false,
        })
    }

    fn commit(mut self, target: &str) -> Result<()> {
        self.sandbox.rename(&self.path, target)?;
        self.done = true;
        Ok(())
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.done {
            if let Err(err) = self.sandbox.delete(&self.path) {
                debug!(path = %self.path, error = %err, "failed to remove staging directory");
            }
        }
    }
}
