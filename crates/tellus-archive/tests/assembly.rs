//! Conflict strategies, planning and background assembly.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Harness, LOCATION, id, tree};
use tellus_archive::data::{AssemblyMode, ConflictStrategy, DecisionBasis, ExtractionFilter, Outcome};
use tellus_archive::{
    AssembleRequest, ConflictChoice, Error, Fragment, NoopProgress, Occupant, OperationContext, OperationStatus,
};
use tellus_fs::{atomic_write, read_all};

fn two_overlapping(harness: &Harness) {
    harness.archive_files("left", &[("output/shared.nc", b"left, short"), ("output/left.nc", b"l")]);
    harness.archive_files("right", &[
        ("output/right.nc", b"r"),
        ("output/shared.nc", b"right, considerably longer"),
    ]);
}

fn request(harness: &Harness, dest: &str, strategy: ConflictStrategy) -> AssembleRequest {
    AssembleRequest::new(harness.sandbox(dest), strategy)
        .fragment(Fragment::new(id("left")))
        .fragment(Fragment::new(id("right")))
}

#[test]
fn merge_directories_only_allows_shared_directories() {
    let harness = Harness::new();
    harness.archive_files("left", &[("output/a.nc", b"a")]);
    harness.archive_files("right", &[("output/b.nc", b"b")]);

    let request = request(&harness, "/assembled/merge", ConflictStrategy::MergeDirectoriesOnly);
    let manifest = harness
        .service
        .assemble(LOCATION, &request, &OperationContext::detached())
        .unwrap();
    assert_eq!(manifest.files.len(), 2);
    assert!(manifest.decisions.iter().all(|d| d.basis == DecisionBasis::NoConflict));
}

#[test]
fn merge_directories_only_rejects_file_conflicts() {
    let harness = Harness::new();
    two_overlapping(&harness);

    let request = request(&harness, "/assembled/merge", ConflictStrategy::MergeDirectoriesOnly);
    let err = harness
        .service
        .assemble(LOCATION, &request, &OperationContext::detached())
        .unwrap_err();
    let Error::ConflictUnresolved { path, manifest, .. } = err else {
        panic!("expected an unresolved conflict, got {err:?}");
    };
    assert_eq!(path, "output/shared.nc");
    // left's two files and right.nc were decided before the conflict.
    assert_eq!(manifest.decisions.len(), 3);
    assert_eq!(manifest.entry("output/shared.nc").unwrap().archive_id, id("left"));
}

#[test]
fn skip_conflicts_never_overwrites() {
    let harness = Harness::new();
    two_overlapping(&harness);
    let dest = harness.sandbox("/assembled/skip");
    atomic_write(&dest, "output/left.nc", b"already here").unwrap();

    let request = request(&harness, "/assembled/skip", ConflictStrategy::SkipConflicts);
    let manifest = harness
        .service
        .assemble(LOCATION, &request, &OperationContext::detached())
        .unwrap();

    assert_eq!(read_all(&dest, "output/left.nc").unwrap(), b"already here");
    assert_eq!(read_all(&dest, "output/shared.nc").unwrap(), b"left, short");
    let skipped: Vec<_> = manifest
        .decisions
        .iter()
        .filter(|d| d.basis == DecisionBasis::Skipped)
        .map(|d| d.path.as_str())
        .collect();
    assert_eq!(skipped, vec!["output/left.nc", "output/shared.nc"]);
    assert!(manifest.entry("output/left.nc").is_none());
}

#[test]
fn largest_wins_against_preexisting_file() {
    let harness = Harness::new();
    two_overlapping(&harness);
    let dest = harness.sandbox("/assembled/largest");
    atomic_write(&dest, "output/shared.nc", b"medium sized file").unwrap();

    let request = request(&harness, "/assembled/largest", ConflictStrategy::LargestWins);
    let manifest = harness
        .service
        .assemble(LOCATION, &request, &OperationContext::detached())
        .unwrap();

    let shared: Vec<_> = manifest
        .decisions
        .iter()
        .filter(|d| d.path == "output/shared.nc")
        .map(|d| (d.archive_id.to_string(), d.basis, d.outcome))
        .collect();
    assert_eq!(shared, vec![
        ("left".to_string(), DecisionBasis::Largest, Outcome::KeptExisting),
        ("right".to_string(), DecisionBasis::Largest, Outcome::Replaced),
    ]);
    assert_eq!(read_all(&dest, "output/shared.nc").unwrap(), b"right, considerably longer");
}

#[test]
fn interactive_uses_the_callback() {
    let harness = Harness::new();
    two_overlapping(&harness);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();

    let request = request(&harness, "/assembled/interactive", ConflictStrategy::Interactive).resolver(move |conflict| {
        seen.fetch_add(1, Ordering::SeqCst);
        assert_eq!(conflict.path, "output/shared.nc");
        assert!(matches!(conflict.occupant, Occupant::Assembled { archive_id, .. } if archive_id.as_str() == "left"));
        ConflictChoice::TakeIncoming
    });
    let manifest = harness
        .service
        .assemble(LOCATION, &request, &OperationContext::detached())
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let entry = manifest.entry("output/shared.nc").unwrap();
    assert_eq!(entry.archive_id, id("right"));
    assert_eq!(entry.basis, DecisionBasis::Interactive);
}

#[test]
fn interactive_without_callback_fails_at_first_conflict() {
    let harness = Harness::new();
    two_overlapping(&harness);

    let request = request(&harness, "/assembled/interactive", ConflictStrategy::Interactive);
    match harness.service.assemble(LOCATION, &request, &OperationContext::detached()) {
        Err(Error::ConflictUnresolved { path, reason, .. }) => {
            assert_eq!(path, "output/shared.nc");
            assert!(reason.contains("callback"));
        }
        other => panic!("expected an unresolved conflict, got {other:?}"),
    }
}

#[test]
fn aborting_callback_stops_the_run() {
    let harness = Harness::new();
    two_overlapping(&harness);

    let request = request(&harness, "/assembled/abort", ConflictStrategy::Interactive).resolver(|_| ConflictChoice::Abort);
    let err = harness
        .service
        .assemble(LOCATION, &request, &OperationContext::detached())
        .unwrap_err();
    assert!(matches!(err, Error::ConflictUnresolved { .. }));
}

#[test]
fn invalid_fragment_filter_is_rejected_before_any_write() {
    let harness = Harness::new();
    two_overlapping(&harness);

    let dest = harness.sandbox("/assembled/invalid");
    let request = AssembleRequest::new(dest, ConflictStrategy::FirstWins)
        .fragment(Fragment::new(id("left")))
        .fragment(Fragment::new(id("right")).filter(ExtractionFilter::new().pattern("output/[")));
    let err = harness
        .service
        .assemble(LOCATION, &request, &OperationContext::detached())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(
        harness
            .storage
            .paths()
            .iter()
            .all(|p| !p.starts_with("/assembled"))
    );
}

#[test]
fn disjoint_fragments_assemble_concurrently_in_list_order() {
    let harness = Harness::new();
    let names = ["f0", "f1", "f2", "f3", "f4"];
    for (i, name) in names.iter().enumerate() {
        let path = format!("output/part{i}/data.nc");
        harness.archive_files(name, &[(path.as_str(), name.as_bytes())]);
    }

    let dest = harness.sandbox("/assembled/disjoint");
    let request = names.iter().fold(AssembleRequest::new(dest.clone(), ConflictStrategy::NewestWins), |r, name| {
        r.fragment(Fragment::new(id(name)))
    });
    assert!(harness.service.plan_assembly(LOCATION, &request).unwrap().disjoint);

    let manifest = harness
        .service
        .assemble(LOCATION, &request, &OperationContext::detached())
        .unwrap();
    let order: Vec<_> = manifest.decisions.iter().map(|d| d.archive_id.to_string()).collect();
    assert_eq!(order, names);
    assert_eq!(tree(&dest).len(), names.len());
}

#[test]
fn content_type_partition_avoids_collisions() {
    let harness = Harness::new();
    harness.archive_files("mixed", &[("run.log", b"log"), ("namelist.cfg", b"cfg"), ("out.nc", b"nc")]);

    let dest = harness.sandbox("/assembled/partition");
    let request = AssembleRequest::new(dest.clone(), ConflictStrategy::MergeDirectoriesOnly)
        .mode(AssemblyMode::ContentType)
        .fragment(Fragment::new(id("mixed")));
    harness
        .service
        .assemble(LOCATION, &request, &OperationContext::detached())
        .unwrap();

    let paths: Vec<_> = tree(&dest).into_iter().map(|(p, _)| p).collect();
    assert_eq!(paths, vec!["config/namelist.cfg", "log/run.log", "output/out.nc"]);
}

#[test]
fn background_assembly_reports_through_its_handle() {
    let harness = Harness::new();
    two_overlapping(&harness);

    let request = request(&harness, "/assembled/background", ConflictStrategy::FirstWins);
    let handle = harness
        .service
        .spawn_assemble(LOCATION, request, Arc::new(NoopProgress))
        .unwrap();
    let id = handle.id();
    let manifest = handle.wait().unwrap();
    assert_eq!(manifest.files.len(), 3);
    assert_eq!(harness.service.operations().status(id), Some(OperationStatus::Completed));
}

#[test]
fn preexisting_conflict_stops_before_later_fragments() {
    let harness = Harness::new();
    harness.archive_files("f1", &[("a/x.nc", b"incoming")]);
    harness.archive_files("f2", &[("b/y.nc", b"later")]);
    let dest = harness.sandbox("/assembled/occupied");
    atomic_write(&dest, "a/x.nc", b"already here").unwrap();

    let request = AssembleRequest::new(dest.clone(), ConflictStrategy::MergeDirectoriesOnly)
        .fragment(Fragment::new(id("f1")))
        .fragment(Fragment::new(id("f2")));
    let plan = harness.service.plan_assembly(LOCATION, &request).unwrap();
    assert!(plan.disjoint);
    assert_eq!(plan.occupied, vec!["a/x.nc".to_string()]);

    match harness.service.assemble(LOCATION, &request, &OperationContext::detached()) {
        Err(Error::ConflictUnresolved { path, manifest, .. }) => {
            assert_eq!(path, "a/x.nc");
            assert!(manifest.files.is_empty());
        }
        other => panic!("expected an unresolved conflict, got {other:?}"),
    }
    assert!(!dest.exists("b/y.nc").unwrap());
    assert_eq!(read_all(&dest, "a/x.nc").unwrap(), b"already here");
}

#[test]
fn file_standing_in_for_a_directory_goes_through_the_strategy() {
    let harness = Harness::new();
    harness.archive_files("flat", &[("output", b"flat file")]);
    harness.archive_files("nested", &[("output/x.nc", b"nested")]);
    let fragments = |strategy| {
        AssembleRequest::new(harness.sandbox(&format!("/assembled/{strategy}")), strategy)
            .fragment(Fragment::new(id("flat")))
            .fragment(Fragment::new(id("nested")))
    };

    let manifest = harness
        .service
        .assemble(LOCATION, &fragments(ConflictStrategy::FirstWins), &OperationContext::detached())
        .unwrap();
    let nested = &manifest.decisions[1];
    assert_eq!((nested.path.as_str(), nested.outcome), ("output/x.nc", Outcome::KeptExisting));
    assert_eq!(manifest.entry("output").unwrap().archive_id, id("flat"));

    match harness
        .service
        .assemble(LOCATION, &fragments(ConflictStrategy::NewestWins), &OperationContext::detached())
    {
        Err(Error::ConflictUnresolved { path, manifest, .. }) => {
            assert_eq!(path, "output/x.nc");
            assert_eq!(manifest.files.len(), 1);
        }
        other => panic!("expected an unresolved conflict, got {other:?}"),
    }
}

#[test]
fn preexisting_file_above_the_path_is_skipped() {
    let harness = Harness::new();
    harness.archive_files("nested", &[("output/x.nc", b"nested"), ("run.log", b"log")]);
    let dest = harness.sandbox("/assembled/blocked");
    atomic_write(&dest, "output", b"flat file").unwrap();

    let request = AssembleRequest::new(dest.clone(), ConflictStrategy::SkipConflicts).fragment(Fragment::new(id("nested")));
    let manifest = harness
        .service
        .assemble(LOCATION, &request, &OperationContext::detached())
        .unwrap();
    let skipped: Vec<_> = manifest
        .decisions
        .iter()
        .filter(|d| d.basis == DecisionBasis::Skipped)
        .map(|d| d.path.as_str())
        .collect();
    assert_eq!(skipped, vec!["output/x.nc"]);
    assert_eq!(read_all(&dest, "output").unwrap(), b"flat file");
    assert_eq!(read_all(&dest, "run.log").unwrap(), b"log");
}
