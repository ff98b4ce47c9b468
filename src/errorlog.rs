use crate::config::ERROR_LOG_FILE;
use crate::model::{EntityKind, GraphRecordId};
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Append-only text log of per-record failures.
///
/// Shared by every scan worker and the consumer; each line is formatted in
/// full before the lock is taken.
#[derive(Debug)]
pub struct ErrorLog {
    writer: Mutex<Option<BufWriter<File>>>,
    path: Option<PathBuf>,
    entries: AtomicU64,
}

pub fn error_log_path(dir: &Path) -> PathBuf {
    dir.join(ERROR_LOG_FILE)
}

impl ErrorLog {
    /// Opens `store-copy.log` under `dir` for appending, creating `dir` if needed.
    pub fn create(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = error_log_path(dir);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = ?path, "Error log opened");
        Ok(Self {
            writer: Mutex::new(Some(BufWriter::new(file))),
            path: Some(path),
            entries: AtomicU64::new(0),
        })
    }

    /// A log that only counts entries.
    pub fn disabled() -> Self {
        Self {
            writer: Mutex::new(None),
            path: None,
            entries: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record_node(&self, id: GraphRecordId, cause: &dyn Display) {
        self.append(format!("Node: {id} {cause}\n"));
    }

    /// `rel_type` is the source-space type name when the record could be read.
    pub fn record_relationship(
        &self,
        id: GraphRecordId,
        rel_type: Option<&str>,
        cause: &dyn Display,
    ) {
        let line = match rel_type {
            Some(rel_type) => format!("Rel: copy Relationship: {id}-[:{rel_type}]->? {cause}\n"),
            None => format!("Rel: copy Relationship: {id} {cause}\n"),
        };
        self.append(line);
    }

    pub fn record_loader(&self, kind: EntityKind, id: GraphRecordId, cause: &dyn Display) {
        self.append(format!("Loader: create {kind} {id} {cause}\n"));
    }

    pub fn record_message(&self, message: &str) {
        self.append(format!("{message}\n"));
    }

    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    pub fn flush(&self) {
        let mut guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(writer) = guard.as_mut() {
            if let Err(e) = writer.flush() {
                warn!(error = %e, "Failed to flush error log");
            }
        }
    }

    fn append(&self, line: String) {
        self.entries.fetch_add(1, Ordering::Relaxed);
        let mut guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(writer) = guard.as_mut() {
            if let Err(e) = writer.write_all(line.as_bytes()) {
                warn!(error = %e, "Failed to write error log entry");
            }
        }
    }
}

impl Drop for ErrorLog {
    fn drop(&mut self) {
        self.flush();
    }
}
