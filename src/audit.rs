//! Append-only audit log
//!
//! One line per event, `[YYYY-MM-DD HH:MM:SS] message`, local time. Callers
//! never pass the secret in; nothing here could tell it apart from any
//! other text.

use crate::error::{ErrorCategory, Result, ShroudError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default audit log file name, created in the root directory.
pub const DEFAULT_LOG_NAME: &str = "shroud-log.txt";

/// Destination for audit events.
pub trait AuditSink {
    fn record(&mut self, message: &str);
}

/// Audit log backed by a file opened in append mode.
pub struct AuditLog {
    path: PathBuf,
    file: File,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                ShroudError::io(
                    ErrorCategory::User,
                    format!("failed to open audit log {}", path.display()),
                    e,
                )
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for AuditLog {
    /// Append one line. A failed write is reported through `log` and does
    /// not stop the run.
    fn record(&mut self, message: &str) {
        log::info!("{}", message);
        let line = format_line(&chrono::Local::now(), message);
        if let Err(e) = self.file.write_all(line.as_bytes()) {
            log::warn!("failed to append to audit log {}: {}", self.path.display(), e);
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    pub lines: Vec<String>,
}

impl AuditSink for MemoryAudit {
    fn record(&mut self, message: &str) {
        self.lines.push(message.to_string());
    }
}

fn format_line<Tz: chrono::TimeZone>(at: &chrono::DateTime<Tz>, message: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("[{}] {}\n", at.format("%Y-%m-%d %H:%M:%S"), message)
}
