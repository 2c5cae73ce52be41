//! Collected exception reports.
//!
//! [`ReportStore`] is the sink behind `exceptional tail --store`: every report the
//! reader decodes is appended to a JSON-lines file under a sequential id, and can be
//! listed or looked up by id later (`exceptional reports list|get`).
//!
//! The file is opened once and fully loaded; ids continue from the highest one found.
//! A line that does not parse is a [`RingError::Codec`] rather than being skipped, so a
//! damaged store is noticed instead of silently renumbered.

use crate::error::{RingError, RingResult};
use crate::report::ExceptionReport;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A report together with the id it was stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredReport {
    /// Sequential id, starting at 1.
    pub id: u64,
    /// The collected report.
    pub report: ExceptionReport,
}

/// Append-only JSON-lines store of collected reports.
#[derive(Debug)]
pub struct ReportStore {
    path: PathBuf,
    writer: BufWriter<File>,
    reports: Vec<StoredReport>,
}

impl ReportStore {
    /// Open (or create) the store at `path`, loading everything already in it.
    pub fn open<P: AsRef<Path>>(path: P) -> RingResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let mut reports = Vec::new();
        for (line_no, line) in BufReader::new(&file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let stored: StoredReport = serde_json::from_str(&line).map_err(|e| {
                RingError::Codec(format!("{}:{}: {e}", path.display(), line_no + 1))
            })?;
            reports.push(stored);
        }
        debug!(path = %path.display(), reports = reports.len(), "report store opened");

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            reports,
        })
    }

    /// Append `report` and return its id. The line is flushed before returning.
    pub fn insert(&mut self, report: ExceptionReport) -> RingResult<u64> {
        let id = self.reports.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let stored = StoredReport { id, report };

        serde_json::to_writer(&mut self.writer, &stored)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        info!(id, message = ?stored.report.message, "report stored");
        self.reports.push(stored);
        Ok(id)
    }

    /// All stored reports, oldest first.
    pub fn list(&self) -> &[StoredReport] {
        &self.reports
    }

    /// The report stored under `id`.
    pub fn get(&self, id: u64) -> Option<&StoredReport> {
        self.reports.iter().find(|r| r.id == id)
    }

    /// Number of stored reports.
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// Whether nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// File backing the store.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
