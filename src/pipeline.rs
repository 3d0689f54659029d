//! Batch orchestration
//!
//! Files are handled strictly one at a time: encrypt, wrap, remove the
//! intermediate payload, then move on. Outcomes are folded into an
//! explicit [`RunTotals`] accumulator and reported to an [`AuditSink`].

use crate::audit::AuditSink;
use crate::container;
use crate::engine::ArchiveEngine;
use crate::error::{ErrorCategory, ErrorKind, Result, ShroudError};
use crate::paths;
use crate::secret::Secret;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// The result of processing one candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The container was written at this path.
    Success(PathBuf),
    /// Nothing was written.
    Skipped(String),
    /// Nothing durable was written, or (payload cleanup failure) a
    /// container exists but the run could not finish cleanly.
    Failed(String),
}

/// Running counts for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunTotals {
    pub fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Success(_) => self.succeeded += 1,
            FileOutcome::Skipped(_) => self.skipped += 1,
            FileOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

/// What a finished (or interrupted) batch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub totals: RunTotals,
    pub interrupted: bool,
}

/// Protect a single file: skip if already archived, otherwise encrypt it
/// into a fresh payload next to it, wrap that payload into a container at
/// a unique path, and delete the payload.
///
/// The source file is only ever read.
pub fn process_file(engine: &dyn ArchiveEngine, secret: &Secret, source: &Path) -> FileOutcome {
    match paths::archive_already_exists(source) {
        Ok(true) => return FileOutcome::Skipped("already archived".to_string()),
        Ok(false) => {}
        Err(e) => return FileOutcome::Failed(e.chain_message()),
    }

    let dir = match source.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let payload = paths::new_payload_path(dir);
    let destination = paths::resolve_unique(&paths::container_path_for(source));
    log::debug!(
        "{}: payload {}, container {}",
        source.display(),
        payload.display(),
        destination.display()
    );

    if let Err(e) = engine.encrypt(source, &payload, secret) {
        remove_payload_quietly(&payload);
        return FileOutcome::Failed(format!("encrypt: {}", e.chain_message()));
    }

    if let Err(e) = container::wrap(&payload, &destination) {
        remove_payload_quietly(&payload);
        return FileOutcome::Failed(format!("wrap: {}", e.chain_message()));
    }

    if let Err(e) = fs::remove_file(&payload) {
        return FileOutcome::Failed(format!(
            "container written to {} but failed to remove payload {}: {}",
            destination.display(),
            payload.display(),
            e
        ));
    }

    FileOutcome::Success(destination)
}

fn remove_payload_quietly(payload: &Path) {
    if let Ok(meta) = fs::symlink_metadata(payload) {
        if meta.file_type().is_file() {
            if let Err(e) = fs::remove_file(payload) {
                log::warn!("failed to remove payload {}: {}", payload.display(), e);
            }
        }
    }
}

/// Process `files` in order, stopping as soon as `interrupted` is set.
///
/// Every outcome is written to `audit`; the secret never is.
pub fn run_batch(
    engine: &dyn ArchiveEngine,
    secret: &Secret,
    files: &[PathBuf],
    audit: &mut dyn AuditSink,
    interrupted: &AtomicBool,
) -> RunSummary {
    let total = files.len();
    let mut totals = RunTotals::default();
    audit.record(&format!("Run started: {} candidate file(s)", total));

    for (index, file) in files.iter().enumerate() {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        log::info!("[{}/{}] processing {}", index + 1, total, file.display());

        let outcome = process_file(engine, secret, file);
        totals.record(&outcome);
        audit.record(&describe(file, &outcome));
    }

    let interrupted = interrupted.load(Ordering::SeqCst);
    if interrupted {
        audit.record(&format!(
            "Interrupted by user after {} of {} file(s) | Success: {} | Skipped: {} | Errors: {}",
            totals.processed(),
            total,
            totals.succeeded,
            totals.skipped,
            totals.failed
        ));
    } else {
        audit.record(&format!(
            "Completed. Total files: {} | Success: {} | Skipped: {} | Errors: {}",
            total, totals.succeeded, totals.skipped, totals.failed
        ));
    }

    RunSummary {
        total,
        totals,
        interrupted,
    }
}

/// One audit line for `outcome`.
pub fn describe(file: &Path, outcome: &FileOutcome) -> String {
    match outcome {
        FileOutcome::Success(container) => {
            format!("Success: {} -> {}", file.display(), container.display())
        }
        FileOutcome::Skipped(reason) => format!("Skipped ({}): {}", reason, file.display()),
        FileOutcome::Failed(reason) => format!("Failed: {} -> {}", file.display(), reason),
    }
}

/// Recover the original file from a container produced by [`process_file`]
/// and return the restored path(s).
///
/// The payload is unwrapped into a scoped temporary directory and decrypted
/// into a staging directory inside `out_dir`. Restored files are then
/// linked into `out_dir` only under names that are still free; an existing
/// entry is refused with [`ErrorKind::UnsafeTargetRefused`] and left as it
/// was. Both temporary directories are removed on return.
pub fn restore_container(
    engine: &dyn ArchiveEngine,
    secret: &Secret,
    container_path: &Path,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    if !out_dir.is_dir() {
        return Err(ShroudError::with_kind(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("output directory {} does not exist", out_dir.display()),
        ));
    }
    let scratch = tempfile::Builder::new()
        .prefix(".shroud-restore-")
        .tempdir()
        .map_err(|e| {
            ShroudError::io(ErrorCategory::Internal, "failed to create scratch directory", e)
        })?;
    let payload = container::unwrap(container_path, scratch.path())
        .map_err(|e| e.with_context(format!("failed to unwrap {}", container_path.display())))?;

    // The engine answers yes to its own overwrite prompts, so it only ever
    // writes into a directory of ours. Staging lives inside `out_dir` so
    // the final link never crosses filesystems.
    let staging = tempfile::Builder::new()
        .prefix(".shroud-restore-")
        .tempdir_in(out_dir)
        .map_err(|e| {
            ShroudError::io(
                ErrorCategory::User,
                format!("failed to create staging directory in {}", out_dir.display()),
                e,
            )
        })?;
    engine.decrypt(&payload, staging.path(), secret).map_err(|e| {
        e.with_context(format!(
            "failed to decrypt {} (wrong password or corrupt payload)",
            container_path.display()
        ))
    })?;
    place_restored(staging.path(), out_dir)
        .map_err(|e| e.with_context(format!("failed to restore {}", container_path.display())))
}

/// Move every file in `staging` into `out_dir` without replacing anything.
///
/// All names are checked before the first one is placed, so a single
/// collision leaves `out_dir` untouched.
fn place_restored(staging: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let list_error = |e: io::Error| {
        ShroudError::io(
            ErrorCategory::Internal,
            format!("failed to list {}", staging.display()),
            e,
        )
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(staging).map_err(list_error)? {
        let entry = entry.map_err(list_error)?;
        let file_type = entry.file_type().map_err(list_error)?;
        if !file_type.is_file() {
            return Err(ShroudError::with_kind(
                ErrorCategory::User,
                ErrorKind::UnsafeTargetRefused,
                format!(
                    "decrypted payload holds {}, which is not a regular file",
                    entry.file_name().to_string_lossy()
                ),
            ));
        }
        let target = out_dir.join(entry.file_name());
        if paths::path_is_taken(&target) {
            return Err(refuse_existing(&target, None));
        }
        names.push(entry.file_name());
    }
    if names.is_empty() {
        return Err(ShroudError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::EngineInvocationFailed,
            "engine reported success but extracted nothing",
        ));
    }
    names.sort();

    let mut restored = Vec::with_capacity(names.len());
    for name in names {
        let target = out_dir.join(&name);
        link_no_clobber(&staging.join(&name), &target)?;
        restored.push(target);
    }
    Ok(restored)
}

/// Make `from` appear at `to`, failing if anything occupies `to`.
///
/// A hard link refuses an existing target atomically. Where the filesystem
/// has no hard links the target is re-checked and `from` renamed instead.
/// The staging copy goes away with its directory.
fn link_no_clobber(from: &Path, to: &Path) -> Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(refuse_existing(to, Some(e))),
        Err(e) => {
            log::debug!("hard link to {} failed ({}); renaming", to.display(), e);
            if paths::path_is_taken(to) {
                return Err(refuse_existing(to, None));
            }
            fs::rename(from, to).map_err(|e| {
                ShroudError::io(
                    ErrorCategory::Internal,
                    format!("failed to move restored file to {}", to.display()),
                    e,
                )
            })
        }
    }
}

fn refuse_existing(path: &Path, source: Option<io::Error>) -> ShroudError {
    let msg = format!("refusing to overwrite existing {}", path.display());
    match source {
        Some(e) => ShroudError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::UnsafeTargetRefused,
            msg,
            e,
        ),
        None => ShroudError::with_kind(ErrorCategory::User, ErrorKind::UnsafeTargetRefused, msg),
    }
}
