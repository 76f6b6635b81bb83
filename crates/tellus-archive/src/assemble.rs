//! Reassembly of one dataset from several archive fragments.
//!
//! Fragments are processed in list order (temporal mode reorders them by
//! date range first). Each candidate is decided against whatever occupies
//! its destination path, then the winners of a fragment are extracted in
//! one pass over that fragment's body. Every decision lands in the
//! manifest, in the order it was taken.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tellus_fs::Sandbox;
use tracing::{debug, info, warn};

use crate::data::{
    ArchiveId, AssemblyManifest, AssemblyMode, ConflictStrategy, Decision, DecisionBasis, ExtractionFilter,
    FileRecord, Outcome,
};
use crate::extract::{ExtractionPlan, Extractor, Target, WriteMode};
use crate::progress::OperationContext;
use crate::{Error, Result};

/// One archive's contribution, optionally narrowed by a filter.
#[derive(Clone, Debug)]
pub struct Fragment {
    pub archive_id: ArchiveId,
    pub filter:     ExtractionFilter,
}

impl Fragment {
    pub fn new(archive_id: ArchiveId) -> Self {
        Self {
            archive_id,
            filter: ExtractionFilter::default(),
        }
    }

    pub fn filter(mut self, filter: ExtractionFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// What occupies a destination path when an incoming file arrives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Occupant {
    /// Written earlier in this run.
    Assembled { archive_id: ArchiveId, record: FileRecord },
    /// A file present before the run started.
    Existing { size: u64, modified: Option<DateTime<Utc>> },
    Directory,
    /// A file sits where a parent directory of the path is needed.
    AncestorFile { ancestor: String },
}

impl Occupant {
    fn size(&self) -> Option<u64> {
        match self {
            Self::Assembled { record, .. } => Some(record.size),
            Self::Existing { size, .. } => Some(*size),
            Self::Directory | Self::AncestorFile { .. } => None,
        }
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Assembled { record, .. } => Some(record.modified),
            Self::Existing { modified, .. } => *modified,
            Self::Directory | Self::AncestorFile { .. } => None,
        }
    }
}

/// Handed to the interactive resolver.
#[derive(Debug)]
pub struct Conflict<'a> {
    pub path:       &'a str,
    pub occupant:   &'a Occupant,
    pub archive_id: &'a ArchiveId,
    pub incoming:   &'a FileRecord,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictChoice {
    KeepExisting,
    TakeIncoming,
    /// Stop the run with `ConflictUnresolved`.
    Abort,
}

pub type ConflictCallback = Arc<dyn Fn(&Conflict<'_>) -> ConflictChoice + Send + Sync>;

#[derive(Clone)]
pub struct AssembleRequest {
    pub fragments:   Vec<Fragment>,
    pub destination: Sandbox,
    pub strategy:    ConflictStrategy,
    pub mode:        AssemblyMode,
    pub resolver:    Option<ConflictCallback>,
}

impl fmt::Debug for AssembleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssembleRequest")
            .field("fragments", &self.fragments)
            .field("destination", &self.destination)
            .field("strategy", &self.strategy)
            .field("mode", &self.mode)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl AssembleRequest {
    pub fn new(destination: Sandbox, strategy: ConflictStrategy) -> Self {
        Self {
            fragments: Vec::new(),
            destination,
            strategy,
            mode: AssemblyMode::default(),
            resolver: None,
        }
    }

    pub fn fragment(mut self, fragment: Fragment) -> Self {
        self.fragments.push(fragment);
        self
    }

    pub fn mode(mut self, mode: AssemblyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn resolver(mut self, resolver: impl Fn(&Conflict<'_>) -> ConflictChoice + Send + Sync + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }
}

/// One fragment's candidates and their destination paths.
#[derive(Clone, Debug)]
pub struct FragmentPlan {
    pub archive_id: ArchiveId,
    pub extraction: ExtractionPlan,
    /// Destination path per candidate, same order.
    pub targets:    Vec<String>,
}

/// A destination path claimed by more than one fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Overlap {
    pub path:      String,
    pub fragments: Vec<ArchiveId>,
}

#[derive(Clone, Debug)]
pub struct AssemblyPlan {
    /// In processing order.
    pub fragments: Vec<FragmentPlan>,
    pub overlaps:  Vec<Overlap>,
    /// No fragment writes into another's paths, files or directories.
    pub disjoint:  bool,
    /// Destination paths already occupied before the run, by the path
    /// itself or by a file standing in for one of its directories.
    pub occupied:  Vec<String>,
}

/// Decision outcome for one candidate.
enum Step {
    Decided(Decision),
    Unresolved { path: String, reason: String },
}

#[derive(Clone, Debug)]
pub struct Assembler {
    extractor: Extractor,
}

impl Assembler {
    pub fn new(extractor: Extractor) -> Self { Self { extractor } }

    /// Validate every filter, load every sidecar and work out overlaps.
    /// No archive body is read.
    pub fn plan(&self, request: &AssembleRequest) -> Result<AssemblyPlan> {
        if request.fragments.is_empty() {
            return Err(Error::Validation("assembly needs at least one fragment".into()));
        }
        for fragment in &request.fragments {
            fragment.filter.compile()?;
        }

        let mut fragments = Vec::with_capacity(request.fragments.len());
        for fragment in &request.fragments {
            let extraction = self.extractor.plan(&fragment.archive_id, &fragment.filter)?;
            let targets = extraction
                .candidates
                .iter()
                .map(|record| destination_path(request.mode, record))
                .collect();
            fragments.push(FragmentPlan {
                archive_id: fragment.archive_id.clone(),
                extraction,
                targets,
            });
        }
        if request.mode == AssemblyMode::Temporal {
            // Stable: undated fragments go last, in list order.
            fragments.sort_by_key(|f| {
                let start = f.extraction.sidecar.fragment.date_range.as_ref().map(|r| r.start);
                (start.is_none(), start)
            });
        }

        let mut claims: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        let mut dirs: HashMap<String, BTreeSet<usize>> = HashMap::new();
        for (index, fragment) in fragments.iter().enumerate() {
            for target in &fragment.targets {
                claims.entry(target.as_str()).or_default().push(index);
                let mut dir = target.as_str();
                while let Some((parent, _)) = dir.rsplit_once('/') {
                    dirs.entry(parent.to_owned()).or_default().insert(index);
                    dir = parent;
                }
            }
        }
        let overlaps: Vec<Overlap> = claims
            .iter()
            .filter(|(_, owners)| owners.len() > 1)
            .map(|(path, owners)| Overlap {
                path:      (*path).to_owned(),
                fragments: owners.iter().map(|&i| fragments[i].archive_id.clone()).collect(),
            })
            .collect();
        let file_over_dir = claims.iter().any(|(path, owners)| {
            dirs.get(*path)
                .is_some_and(|users| users.iter().any(|user| !owners.contains(user)))
        });
        let mut occupied = Vec::new();
        for path in claims.keys() {
            if existing_occupant(&request.destination, path)?.is_some() {
                occupied.push((*path).to_owned());
            }
        }

        Ok(AssemblyPlan {
            disjoint: overlaps.is_empty() && !file_over_dir,
            overlaps,
            occupied,
            fragments,
        })
    }

    pub fn assemble(&self, request: &AssembleRequest, ctx: &OperationContext) -> Result<AssemblyManifest> {
        let plan = self.plan(request)?;
        ctx.begin(&format!("assemble {} fragments", plan.fragments.len()));
        info!(
            fragments = plan.fragments.len(),
            strategy = %request.strategy,
            overlaps = plan.overlaps.len(),
            disjoint = plan.disjoint,
            "assembling"
        );

        // Concurrent fragments must not be able to conflict at all, with each
        // other or with what the destination already holds.
        let concurrent = plan.disjoint
            && plan.occupied.is_empty()
            && plan.fragments.len() > 1
            && request.strategy != ConflictStrategy::Interactive;
        let result = if concurrent {
            self.run_concurrent(request, &plan, ctx)
        } else {
            self.run_sequential(request, &plan, ctx)
        };
        match &result {
            Ok(manifest) => {
                info!(files = manifest.files.len(), decisions = manifest.decisions.len(), "assembly finished");
                ctx.complete(&format!("{} files assembled", manifest.files.len()));
            }
            Err(err) if err.is_cancelled() => ctx.cancelled(),
            Err(err) => warn!(error = %err, "assembly stopped"),
        }
        result
    }

    fn run_sequential(&self, request: &AssembleRequest, plan: &AssemblyPlan, ctx: &OperationContext) -> Result<AssemblyManifest> {
        let mut manifest = AssemblyManifest::new(request.strategy, request.mode);
        let mut assembled = HashMap::new();
        for fragment in &plan.fragments {
            self.run_fragment(request, fragment, &mut assembled, &mut manifest, ctx)?;
        }
        Ok(manifest)
    }

    /// Fragments here cannot conflict, so each runs against its own
    /// manifest and the parts are merged in processing order. A failure
    /// stops scheduling further batches.
    fn run_concurrent(&self, request: &AssembleRequest, plan: &AssemblyPlan, ctx: &OperationContext) -> Result<AssemblyManifest> {
        let workers = self.extractor.config().workers.max(1);
        let mut manifest = AssemblyManifest::new(request.strategy, request.mode);
        for batch in plan.fragments.chunks(workers) {
            let results = crossbeam::thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|fragment| {
                        scope.spawn(move |_| {
                            let mut part = AssemblyManifest::new(request.strategy, request.mode);
                            let mut assembled = HashMap::new();
                            self.run_fragment(request, fragment, &mut assembled, &mut part, ctx)
                                .map(|_| part)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or_else(|_| Err(Error::Io(io::Error::other("fragment worker panicked")))))
                    .collect::<Vec<_>>()
            })
            .map_err(|_| Error::Io(io::Error::other("fragment worker panicked")))?;

            // First failure in list order wins.
            for result in results {
                merge(&mut manifest, result?);
            }
        }
        Ok(manifest)
    }

    fn run_fragment(
        &self,
        request: &AssembleRequest,
        fragment: &FragmentPlan,
        assembled: &mut HashMap<String, Occupant>,
        manifest: &mut AssemblyManifest,
        ctx: &OperationContext,
    ) -> Result<()> {
        let mut decided: Vec<(&FileRecord, Decision)> = Vec::new();
        let mut unresolved = None;
        for (record, dest) in fragment.extraction.candidates.iter().zip(&fragment.targets) {
            ctx.check("assemble")?;
            match self.decide(request, &fragment.archive_id, record, dest, assembled)? {
                Step::Decided(decision) => decided.push((record, decision)),
                Step::Unresolved { path, reason } => {
                    unresolved = Some((path, reason));
                    break;
                }
            }
        }

        let targets: Vec<Target<'_>> = decided
            .iter()
            .filter(|(_, decision)| decision.outcome.writes())
            .map(|(record, decision)| Target {
                record,
                dest: decision.path.clone(),
            })
            .collect();
        let mode = WriteMode {
            overwrite: true,
            atomic:    false,
        };
        let report = self
            .extractor
            .extract_targets(&fragment.extraction.sidecar, &targets, &request.destination, mode, ctx)?;
        if !report.is_complete() {
            return Err(Error::PartialExtraction {
                report: Box::new(report),
            });
        }

        for (record, decision) in decided {
            if decision.outcome.writes() {
                assembled.insert(decision.path.clone(), Occupant::Assembled {
                    archive_id: fragment.archive_id.clone(),
                    record:     record.clone(),
                });
            }
            manifest.record(decision);
        }
        match unresolved {
            None => Ok(()),
            Some((path, reason)) => {
                warn!(path = %path, reason = %reason, "assembly conflict unresolved");
                Err(Error::ConflictUnresolved {
                    path,
                    reason,
                    manifest: Box::new(manifest.clone()),
                })
            }
        }
    }

    fn occupant(&self, destination: &Sandbox, path: &str, assembled: &HashMap<String, Occupant>) -> Result<Option<Occupant>> {
        for ancestor in ancestors(path) {
            if assembled.contains_key(ancestor) {
                return Ok(Some(Occupant::AncestorFile {
                    ancestor: ancestor.to_owned(),
                }));
            }
        }
        if let Some(occupant) = assembled.get(path) {
            return Ok(Some(occupant.clone()));
        }
        existing_occupant(destination, path)
    }

    fn decide(
        &self,
        request: &AssembleRequest,
        archive_id: &ArchiveId,
        record: &FileRecord,
        dest: &str,
        assembled: &HashMap<String, Occupant>,
    ) -> Result<Step> {
        let decision = |basis: DecisionBasis, outcome: Outcome| {
            Step::Decided(Decision {
                path: dest.to_owned(),
                archive_id: archive_id.clone(),
                source_path: record.path.clone(),
                basis,
                outcome,
            })
        };
        let unresolved = |reason: &str| Step::Unresolved {
            path:   dest.to_owned(),
            reason: reason.to_owned(),
        };
        // Ties and unknowns keep what is there.
        let replace_if = |wins: bool, basis: DecisionBasis| {
            if wins {
                decision(basis, Outcome::Replaced)
            } else {
                decision(basis, Outcome::KeptExisting)
            }
        };

        let Some(occupant) = self.occupant(&request.destination, dest, assembled)? else {
            debug!(path = dest, archive = %archive_id, "no conflict");
            return Ok(decision(DecisionBasis::NoConflict, Outcome::Written));
        };

        let step = match request.strategy {
            ConflictStrategy::FirstWins => decision(DecisionBasis::First, Outcome::KeptExisting),
            ConflictStrategy::SkipConflicts => {
                warn!(path = dest, archive = %archive_id, "conflict skipped");
                decision(DecisionBasis::Skipped, Outcome::KeptExisting)
            }
            _ if occupant == Occupant::Directory => unresolved("destination is a directory"),
            _ if matches!(occupant, Occupant::AncestorFile { .. }) => {
                unresolved("a file occupies one of the destination's parent directories")
            }
            ConflictStrategy::NewestWins => replace_if(
                occupant.modified().is_some_and(|existing| record.modified > existing),
                DecisionBasis::Newest,
            ),
            ConflictStrategy::LargestWins => {
                replace_if(occupant.size().is_some_and(|existing| record.size > existing), DecisionBasis::Largest)
            }
            ConflictStrategy::MergeDirectoriesOnly => unresolved("file conflict under merge-directories-only"),
            ConflictStrategy::Interactive => match &request.resolver {
                None => unresolved("interactive strategy without a decision callback"),
                Some(resolver) => {
                    let conflict = Conflict {
                        path: dest,
                        occupant: &occupant,
                        archive_id,
                        incoming: record,
                    };
                    match resolver(&conflict) {
                        ConflictChoice::KeepExisting => decision(DecisionBasis::Interactive, Outcome::KeptExisting),
                        ConflictChoice::TakeIncoming => decision(DecisionBasis::Interactive, Outcome::Replaced),
                        ConflictChoice::Abort => unresolved("aborted by resolver"),
                    }
                }
            },
        };
        if let Step::Decided(decision) = &step {
            debug!(path = dest, archive = %archive_id, basis = %decision.basis, outcome = ?decision.outcome, "conflict decided");
        }
        Ok(step)
    }
}

/// Parent directories of a `/`-separated path, outermost first.
fn ancestors(path: &str) -> impl Iterator<Item = &str> { path.match_indices('/').map(move |(index, _)| &path[..index]) }

/// What the destination storage holds at `path`, or above it.
fn existing_occupant(destination: &Sandbox, path: &str) -> Result<Option<Occupant>> {
    // Outermost first: below a file nothing else can exist.
    for ancestor in ancestors(path) {
        match destination.stat(ancestor)? {
            None => return Ok(None),
            Some(meta) if meta.is_dir() => {}
            Some(_) => {
                return Ok(Some(Occupant::AncestorFile {
                    ancestor: ancestor.to_owned(),
                }));
            }
        }
    }
    Ok(destination.stat(path)?.map(|meta| {
        if meta.is_dir() {
            Occupant::Directory
        } else {
            Occupant::Existing {
                size:     meta.size,
                modified: meta.modified.map(DateTime::<Utc>::from),
            }
        }
    }))
}

fn destination_path(mode: AssemblyMode, record: &FileRecord) -> String {
    match mode {
        AssemblyMode::ContentType => format!("{}/{}", record.content_type, record.path),
        AssemblyMode::Merge | AssemblyMode::Temporal => record.path.clone(),
    }
}

fn merge(manifest: &mut AssemblyManifest, part: AssemblyManifest) {
    for decision in part.decisions {
        manifest.record(decision);
    }
}
