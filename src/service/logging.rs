//! Audit log service request dispatch
//!
//! Every request becomes one line `[<subject_id>]: <event>` appended to the
//! log file. All connections share one file handle behind a single lock, so
//! lines from concurrent clients never interleave.

use super::RequestHandler;
use crate::types::{Request, RequestKind, Response, ServiceError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Handler for the logging service
#[derive(Debug)]
pub struct AuditLogHandler {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLogHandler {
    /// Open (or create) the log file at `path` for appending
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Resource`] ("Failed to open log file") if the
    /// file cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ServiceError::resource("Failed to open log file", e))?;
        Ok(AuditLogHandler {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line and flush it
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Resource`] ("Failed to write log file") on any
    /// I/O failure.
    pub fn append(&self, line: &str) -> Result<(), ServiceError> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(file, "{}", line)
            .and_then(|()| file.flush())
            .map_err(|e| ServiceError::resource("Failed to write log file", e))
    }

    fn append_or_warn(&self, line: &str) {
        if let Err(e) = self.append(line) {
            warn!(path = %self.path.display(), error = ?e, "audit log write failed");
        }
    }
}

/// Format the audit line for `request` from `peer`
pub fn audit_line(request: &Request, peer: &str) -> String {
    let event = match request.kind {
        RequestKind::Login => format!("logged in from {}", peer),
        RequestKind::Logout => format!("logged out from {}", peer),
        RequestKind::Deposit => format!("deposited {}", request.amount),
        RequestKind::Withdraw => format!("withdrew {}", request.amount),
        RequestKind::Balance => format!("viewed balance: {}", request.amount),
        RequestKind::AccrueInterest => "accrued interest in all accounts".to_string(),
        RequestKind::UploadFile => format!("uploaded file: {}", request.name),
        RequestKind::DownloadFile => format!("downloaded file: {}", request.name),
        RequestKind::Quit => format!("unknown action (type={})", request.kind.code()),
    };
    format!("[{}]: {}", request.subject_id, event)
}

impl RequestHandler for AuditLogHandler {
    fn name(&self) -> &str {
        "logging"
    }

    fn handle(&self, request: &Request, peer: &str) -> Response {
        let line = audit_line(request, peer);
        debug!(line = %line, "audit");
        match self.append(&line) {
            Ok(()) => Response::success("Logged successfully"),
            Err(e) => Response::failure(e.to_string()),
        }
    }

    fn on_start(&self, port: u16) {
        self.append_or_warn(&format!("=== Logging server started on port {} ===", port));
    }

    fn on_shutdown(&self) {
        self.append_or_warn("=== Logging server shutdown ===");
    }
}
