//! Iteration report log — append-only JSONL with strictly increasing ids.
//!
//! The supervisor is the only writer. External pollers read records newer
//! than the last id they saw, tracked in a small cursor file, so the writer
//! never blocks on a reader and no "latest report" file is ever rewritten.
//!
//! Each line is an independent JSON object, making the format resilient to
//! partial writes: a torn last line is skipped on read. Opening a log whose
//! last line lacks its newline terminates that fragment first, so the next
//! record starts on a line of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::FailureKind;
use crate::metrics::PerformanceMetrics;
use factorlab_core::domain::{BacktestWindow, IterationId, ParameterSet, ParamsHash};

/// Bumped whenever a field changes meaning.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("report serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Window,
    PassRejected,
    Holdout,
    Terminal,
}

/// One line of the report log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    pub schema_version: u32,
    pub iteration_id: IterationId,
    pub timestamp: DateTime<Utc>,
    pub kind: ReportKind,
    pub pass: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<BacktestWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_params: Option<ParameterSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_hash: Option<ParamsHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_metrics: Option<PerformanceMetrics>,
    pub accepted: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

/// Report content before the log assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDraft {
    pub kind: ReportKind,
    pub pass: usize,
    pub window: Option<BacktestWindow>,
    pub candidate_params: Option<ParameterSet>,
    pub validation_metrics: Option<PerformanceMetrics>,
    pub accepted: bool,
    pub reason: String,
    pub failure_kind: Option<FailureKind>,
}

impl ReportDraft {
    pub fn new(kind: ReportKind, pass: usize, reason: impl Into<String>) -> Self {
        Self {
            kind,
            pass,
            window: None,
            candidate_params: None,
            validation_metrics: None,
            accepted: false,
            reason: reason.into(),
            failure_kind: None,
        }
    }

    pub fn window(mut self, window: BacktestWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn params(mut self, params: ParameterSet) -> Self {
        self.candidate_params = Some(params);
        self
    }

    pub fn metrics(mut self, metrics: PerformanceMetrics) -> Self {
        self.validation_metrics = Some(metrics);
        self
    }

    pub fn accepted(mut self, accepted: bool) -> Self {
        self.accepted = accepted;
        self
    }

    pub fn failure(mut self, kind: FailureKind) -> Self {
        self.failure_kind = Some(kind);
        self
    }
}

// ─── Log ────────────────────────────────────────────────────────────

/// JSONL report log manager.
#[derive(Debug)]
pub struct ReportLog {
    path: PathBuf,
    last_id: Option<IterationId>,
}

impl ReportLog {
    /// Open (or start) a log, continuing the id sequence of existing records.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let path = path.into();
        if terminate_torn_tail(&path).map_err(io_err(&path))? {
            warn!(path = %path.display(), "report log ended mid-line; torn record sealed off");
        }
        let last_id = read_reports(&path)?.last().map(|r| r.iteration_id);
        debug!(path = %path.display(), last_id = ?last_id, "report log opened");
        Ok(Self { path, last_id })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_id(&self) -> Option<IterationId> {
        self.last_id
    }

    /// Assign the next id and a timestamp, then append one line.
    pub fn append(&mut self, draft: ReportDraft) -> Result<IterationReport, ReportError> {
        let iteration_id = self.last_id.map_or(IterationId(1), IterationId::next);
        let report = IterationReport {
            schema_version: REPORT_SCHEMA_VERSION,
            iteration_id,
            timestamp: Utc::now(),
            kind: draft.kind,
            pass: draft.pass,
            window: draft.window,
            params_hash: draft.candidate_params.as_ref().map(ParameterSet::fingerprint),
            candidate_params: draft.candidate_params,
            validation_metrics: draft.validation_metrics,
            accepted: draft.accepted,
            reason: draft.reason,
            failure_kind: draft.failure_kind,
        };
        let json = serde_json::to_string(&report)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err(&self.path))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err(&self.path))?;
        writeln!(file, "{json}").map_err(io_err(&self.path))?;
        file.flush().map_err(io_err(&self.path))?;

        self.last_id = Some(iteration_id);
        Ok(report)
    }

    pub fn read_all(&self) -> Result<Vec<IterationReport>, ReportError> {
        read_reports(&self.path)
    }

    /// Records with an id strictly greater than `cursor`.
    pub fn read_after(&self, cursor: Option<IterationId>) -> Result<Vec<IterationReport>, ReportError> {
        Ok(read_reports(&self.path)?
            .into_iter()
            .filter(|r| cursor.map_or(true, |c| r.iteration_id > c))
            .collect())
    }
}

/// Append a newline when the file does not end with one. Returns whether it did.
fn terminate_torn_tail(path: &Path) -> io::Result<bool> {
    let mut file = match OpenOptions::new().read(true).append(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(false);
    }
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(true)
}

/// Read every well-formed record. Malformed lines are skipped.
pub fn read_reports(path: &Path) -> Result<Vec<IterationReport>, ReportError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path).map_err(io_err(path))?;
    let reader = io::BufReader::new(file);
    let mut reports = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err(path))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IterationReport>(&line) {
            Ok(report) => reports.push(report),
            Err(e) => warn!(line = n + 1, error = %e, "skipping malformed report line"),
        }
    }
    Ok(reports)
}

// ─── Cursor ─────────────────────────────────────────────────────────

/// Persisted "last seen" iteration id of a poller.
#[derive(Debug, Clone)]
pub struct ReportCursor {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct CursorFile {
    last_seen: IterationId,
}

impl ReportCursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Last seen id; `None` when the cursor file does not exist or is unreadable.
    pub fn load(&self) -> Option<IterationId> {
        let content = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str::<CursorFile>(&content)
            .ok()
            .map(|c| c.last_seen)
    }

    pub fn save(&self, last_seen: IterationId) -> Result<(), ReportError> {
        let json = serde_json::to_string(&CursorFile { last_seen })?;
        write_atomic(&self.path, json.as_bytes()).map_err(io_err(&self.path))
    }

    /// Records newer than the cursor; advances the cursor past them.
    pub fn poll(&self, log: &ReportLog) -> Result<Vec<IterationReport>, ReportError> {
        let fresh = log.read_after(self.load())?;
        if let Some(last) = fresh.last() {
            self.save(last.iteration_id)?;
        }
        Ok(fresh)
    }
}

/// Write to a sibling temp file, then rename over the target.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
