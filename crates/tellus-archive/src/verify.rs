//! Full-body verification of a stored archive against its sidecar.

use std::collections::HashSet;
use std::io::{self, Read};

use tellus_verify::{Sha256Hasher, VerifiedReader};
use tracing::{info, warn};

use crate::data::{ArchiveKind, FileRecord, Sidecar, VerifyReport};
use crate::progress::OperationContext;
use crate::store::ArchiveStore;
use crate::{Error, Result};

/// Read every member, compare it with its record and check that the
/// inventory is complete. Mismatches are collected, not returned as
/// errors; any mismatch flags the archive.
pub fn verify_archive(store: &ArchiveStore, sidecar: &Sidecar, ctx: &OperationContext) -> Result<VerifyReport> {
    let info = &sidecar.archive;
    ctx.begin(&format!("verify {}", info.id));
    let mut report = VerifyReport {
        archive_id: info.id.clone(),
        checked:    0,
        problems:   Vec::new(),
    };

    let result = match info.kind {
        ArchiveKind::Organized => verify_members(store, sidecar, &mut report, ctx),
        ArchiveKind::Compressed | ArchiveKind::Split => {
            verify_body_checksum(store, sidecar, &mut report)?;
            verify_stream(store, sidecar, &mut report, ctx)
        }
    };
    if let Err(err) = result {
        if err.is_cancelled() {
            ctx.cancelled();
        }
        return Err(err);
    }

    if report.is_ok() {
        info!(archive = %info.id, checked = report.checked, "archive verified");
    } else {
        let reason = format!("{} problem(s), first: {}", report.problems.len(), report.problems[0]);
        store.flag(&info.id, &reason)?;
    }
    ctx.complete(&format!("{} files checked, {} problems", report.checked, report.problems.len()));
    Ok(report)
}

fn check_member(record: &FileRecord, reader: impl Read, report: &mut VerifyReport) -> io::Result<()> {
    let mut verified = VerifiedReader::new(reader, Sha256Hasher::new());
    io::copy(&mut verified, &mut io::sink())?;
    report.checked += 1;
    if let Err(e) = verified.finish(&record.checksum, record.size) {
        warn!(path = %record.path, error = %e, "member does not match its record");
        report.problems.push(format!("{}: {e}", record.path));
    }
    Ok(())
}

fn verify_members(store: &ArchiveStore, sidecar: &Sidecar, report: &mut VerifyReport, ctx: &OperationContext) -> Result<()> {
    let mut tracker = ctx.tracker(sidecar.files().len(), sidecar.inventory.total_size);
    for record in sidecar.files() {
        ctx.check("verify")?;
        match store.open_member(&sidecar.archive, &record.path) {
            Ok(reader) => {
                if let Err(e) = check_member(record, reader, report) {
                    report.problems.push(format!("{}: unreadable: {e}", record.path));
                }
            }
            Err(Error::Storage(e)) if e.is_not_found() => {
                report.problems.push(format!("{}: missing", record.path));
            }
            Err(e) => return Err(e),
        }
        tracker.advance(&record.path, record.size);
    }
    Ok(())
}

fn verify_body_checksum(store: &ArchiveStore, sidecar: &Sidecar, report: &mut VerifyReport) -> Result<()> {
    let info = &sidecar.archive;
    let Some(expected) = &info.body_checksum else {
        return Ok(());
    };
    let raw = match store.open_raw(info) {
        Ok(raw) => raw,
        Err(err) if err.is_integrity() => {
            report.problems.push(err.to_string());
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    let mut verified = VerifiedReader::new(raw, Sha256Hasher::new());
    if let Err(e) = io::copy(&mut verified, &mut io::sink()) {
        report.problems.push(format!("body unreadable: {e}"));
        return Ok(());
    }
    if let Err(e) = verified.finish(expected, info.body_size) {
        report.problems.push(format!("body: {e}"));
    }
    Ok(())
}

fn verify_stream(store: &ArchiveStore, sidecar: &Sidecar, report: &mut VerifyReport, ctx: &OperationContext) -> Result<()> {
    let info = &sidecar.archive;
    let stream = match store.open_stream(info) {
        Ok(stream) => stream,
        Err(err) if err.is_integrity() || matches!(err, Error::Storage(_)) => {
            report.problems.push(format!("body unreadable: {err}"));
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    let mut tracker = ctx.tracker(sidecar.files().len(), sidecar.inventory.total_size);
    let mut seen = HashSet::new();
    let mut archive = tar::Archive::new(stream);

    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(e) => {
            report.problems.push(format!("body unreadable: {e}"));
            return Ok(());
        }
    };
    for entry in entries {
        ctx.check("verify")?;
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.problems.push(format!("body truncated or corrupt: {e}"));
                break;
            }
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = match entry.path() {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(e) => {
                report.problems.push(format!("unreadable entry name: {e}"));
                continue;
            }
        };
        let Some(record) = sidecar.record(&path) else {
            report.problems.push(format!("{path}: not in inventory"));
            continue;
        };
        if let Err(e) = check_member(record, entry, report) {
            report.problems.push(format!("{path}: unreadable: {e}"));
            break;
        }
        seen.insert(path);
        tracker.advance(&record.path, record.size);
    }

    for record in sidecar.files() {
        if !seen.contains(&record.path) {
            report.problems.push(format!("{}: missing from body", record.path));
        }
    }
    Ok(())
}
