//! Archive kinds, all-or-nothing creation and integrity checks.

mod common;

use std::sync::Arc;

use common::{Harness, LOCATION, id, payload, tree};
use tellus_archive::data::{ArchiveKind, Codec, ExtractionFilter};
use tellus_archive::store::ArchiveStore;
use tellus_archive::{ArchiveConfig, CreateRequest, Error, ExtractRequest, NoopProgress, OperationContext};
use tellus_classify::Classifier;
use tellus_fs::{atomic_write, read_all};

#[test]
fn split_zstd_archive_restores_every_file() {
    let config = ArchiveConfig::default().codec(Codec::Zstd, 3).split_part_size(256);
    let harness = Harness::with(Classifier::generic(), config);
    let big = payload(1, 8000);
    let source = harness.source("split", &[("output/big.nc", &big), ("run.log", b"done")]);

    let sidecar = harness.archive("split", CreateRequest::new(source.clone()).kind(ArchiveKind::Split));
    assert_eq!(sidecar.archive.codec, Codec::Zstd);
    assert!(sidecar.archive.parts > 1);
    let archives = harness.sandbox("/archives");
    assert!(archives.exists("split.tar.zst.000").unwrap());

    let dest = harness.sandbox("/restore/split");
    harness
        .service
        .extract(LOCATION, &ExtractRequest::new(id("split"), dest.clone()), &OperationContext::detached())
        .unwrap();
    assert_eq!(tree(&dest), tree(&source));
}

#[test]
fn organized_archive_reads_only_candidates() {
    let harness = Harness::new();
    let source = harness.source("organized", &[("output/a.nc", b"a"), ("output/b.nc", b"b"), ("run.log", b"log")]);
    harness.archive("organized", CreateRequest::new(source).kind(ArchiveKind::Organized));

    // A damaged member that is not selected must not matter.
    let archives = harness.sandbox("/archives");
    atomic_write(&archives, "organized.d/run.log", b"tampered").unwrap();

    let dest = harness.sandbox("/restore/organized");
    let request = ExtractRequest::new(id("organized"), dest.clone()).filter(ExtractionFilter::new().pattern("output/*"));
    let report = harness
        .service
        .extract(LOCATION, &request, &OperationContext::detached())
        .unwrap();
    assert_eq!(report.extracted, 2);
    assert_eq!(harness.service.flagged(LOCATION, &id("organized")).unwrap(), None);

    let verify = harness
        .service
        .verify(LOCATION, &id("organized"), &OperationContext::detached())
        .unwrap();
    assert_eq!(verify.checked, 3);
    assert_eq!(verify.problems.len(), 1);
    assert!(verify.problems[0].starts_with("run.log"));
    assert!(harness.service.flagged(LOCATION, &id("organized")).unwrap().is_some());
}

#[test]
fn verify_passes_then_detects_a_damaged_body() {
    let harness = Harness::new();
    harness.archive_files("body", &[("output/a.nc", &payload(3, 4000)), ("namelist.cfg", b"&run\n/\n")]);

    let report = harness
        .service
        .verify(LOCATION, &id("body"), &OperationContext::detached())
        .unwrap();
    assert!(report.is_ok(), "{:?}", report.problems);
    assert_eq!(report.checked, 2);

    let archives = harness.sandbox("/archives");
    let mut body = read_all(&archives, "body.tar.gz").unwrap();
    let middle = body.len() / 2;
    body[middle] ^= 0xff;
    atomic_write(&archives, "body.tar.gz", &body).unwrap();

    let report = harness
        .service
        .verify(LOCATION, &id("body"), &OperationContext::detached())
        .unwrap();
    assert!(!report.is_ok());
    assert!(harness.service.flagged(LOCATION, &id("body")).unwrap().is_some());
    // The archive itself is left as it was.
    assert_eq!(read_all(&archives, "body.tar.gz").unwrap(), body);
}

#[test]
fn missing_split_part_is_an_integrity_error() {
    let config = ArchiveConfig::default().split_part_size(128);
    let harness = Harness::with(Classifier::generic(), config);
    let source = harness.source("parts", &[("output/a.nc", &payload(9, 3000))]);
    let sidecar = harness.archive("parts", CreateRequest::new(source).kind(ArchiveKind::Split));
    assert!(sidecar.archive.parts > 2);

    let archives = harness.sandbox("/archives");
    archives.delete("parts.tar.gz.001").unwrap();

    let dest = harness.sandbox("/restore/parts");
    let err = harness
        .service
        .extract(LOCATION, &ExtractRequest::new(id("parts"), dest.clone()), &OperationContext::detached())
        .unwrap_err();
    assert!(err.is_integrity(), "{err}");
    assert!(harness.service.flagged(LOCATION, &id("parts")).unwrap().is_some());
    assert!(!dest.exists("output/a.nc").unwrap());
}

#[test]
fn failed_sidecar_publish_leaves_no_archive() {
    let harness = Harness::new();
    let source = harness.source("doomed", &[("output/a.nc", b"a"), ("output/b.nc", b"b")]);
    harness.storage.fail_paths_containing("doomed.json");

    let request = CreateRequest::new(source).id(id("doomed"));
    let err = harness
        .service
        .create(LOCATION, &request, &OperationContext::detached())
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)), "{err}");
    assert!(
        harness
            .storage
            .paths()
            .iter()
            .all(|p| !p.starts_with("/archives"))
    );

    harness.storage.clear_faults();
    harness
        .service
        .create(LOCATION, &request, &OperationContext::detached())
        .unwrap();
    let store: ArchiveStore = harness.service.store(LOCATION).unwrap();
    assert_eq!(store.list().unwrap(), vec![id("doomed")]);
}

#[test]
fn sidecar_with_escaping_path_is_rejected() {
    let harness = Harness::new();
    let mut sidecar = harness.archive_files("escape", &[("output/a.nc", b"a")]);
    sidecar.inventory.files[0].path = "../../etc/a.nc".into();
    let archives = harness.sandbox("/archives");
    atomic_write(&archives, "escape.json", &sidecar.to_json().unwrap()).unwrap();

    let dest = harness.sandbox("/restore/escape");
    let err = harness
        .service
        .extract(LOCATION, &ExtractRequest::new(id("escape"), dest), &OperationContext::detached())
        .unwrap_err();
    assert!(matches!(err, Error::SidecarInvalid { .. }), "{err}");
    assert!(harness.storage.paths().iter().all(|p| !p.starts_with("/restore") && !p.starts_with("/etc")));
}

#[test]
fn background_extraction_completes_through_its_handle() {
    let harness = Harness::new();
    harness.archive_files("bg", &[("output/a.nc", &payload(5, 2000))]);

    let dest = harness.sandbox("/restore/bg");
    let handle = harness
        .service
        .spawn_extract(LOCATION, ExtractRequest::new(id("bg"), dest), Arc::new(NoopProgress))
        .unwrap();
    let report = handle.wait().unwrap();
    assert_eq!(report.extracted, 1);
    assert!(harness.service.operations().list().iter().all(|op| op.status.is_finished()));
}

#[test]
fn concurrent_creates_under_one_id_yield_one_archive() {
    let harness = Harness::new();
    let first = harness.source("race-a", &[("output/a.nc", &payload(21, 6000))]);
    let second = harness.source("race-b", &[("output/b.nc", &payload(22, 6000))]);

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|source| {
                let service = harness.service.clone();
                scope.spawn(move || {
                    let request = CreateRequest::new(source).id(id("race"));
                    service.create(LOCATION, &request, &OperationContext::detached())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(Error::ArchiveExists(_)))));
    let report = harness
        .service
        .verify(LOCATION, &id("race"), &OperationContext::detached())
        .unwrap();
    assert!(report.is_ok(), "{:?}", report.problems);
}
