//! Trace log of recorded descriptors
//!
//! One JSON-lines file per rank. Appends take an exclusive `fs2` lock because a
//! resumed checkpoint shares the file with the live branch it was forked from.

pub mod correlate;
pub mod rollback;

pub use correlate::{correlate, Correlation, MessageLink};
pub use rollback::{rollback_plan, RollbackPlan, RollbackPoint};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::models::{Branch, CheckpointId, Descriptor, Rank};

/// One intercepted call as seen by the rank that made it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceRecord {
    pub rank: Rank,
    pub seq: u64,
    /// OS process id of the branch that made the call
    pub pid: u32,
    pub branch: Branch,
    /// Process id of the parked checkpoint, when one was taken
    pub checkpoint_pid: Option<i32>,
    pub descriptor: Descriptor,
    pub recorded_at: DateTime<Utc>,
}

impl TraceRecord {
    pub fn id(&self) -> CheckpointId {
        CheckpointId::new(self.rank, self.seq)
    }
}

/// Path of a rank's trace file inside `dir`
pub fn trace_path(dir: &Path, rank: Rank) -> PathBuf {
    dir.join(format!("trace-rank-{rank}.jsonl"))
}

/// Append-only writer for one rank's trace file.
#[derive(Debug)]
pub struct TraceSink {
    path: PathBuf,
    file: File,
}

impl TraceSink {
    pub fn open(dir: &Path, rank: Rank) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create trace directory: {}", dir.display()))?;
        let path = trace_path(dir, rank);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open trace file: {}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &TraceRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("Failed to serialize trace record")?;
        line.push(b'\n');

        self.file
            .lock_exclusive()
            .with_context(|| format!("Failed to acquire exclusive lock: {}", self.path.display()))?;
        let written = self
            .file
            .write_all(&line)
            .and_then(|_| self.file.flush())
            .with_context(|| format!("Failed to write trace file: {}", self.path.display()));
        let _ = FileExt::unlock(&self.file);
        written
    }
}

/// Read one trace file, skipping blank lines
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceRecord>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    file.lock_shared()
        .with_context(|| format!("Failed to acquire shared lock: {}", path.display()))?;

    let mut records = Vec::new();
    for (index, line) in BufReader::new(&file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read file: {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: TraceRecord = serde_json::from_str(&line).with_context(|| {
            format!("Malformed trace record at {}:{}", path.display(), index + 1)
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Load every rank's trace file in `dir`, ordered by rank, then branch
/// (live first), then sequence number.
pub fn read_trace_dir(dir: &Path) -> Result<Vec<TraceRecord>> {
    let pattern = dir.join("trace-rank-*.jsonl");
    let pattern = pattern.to_string_lossy();

    let mut records = Vec::new();
    for path in glob::glob(&pattern).context("Invalid trace directory pattern")? {
        let path = path.context("Failed to list trace directory")?;
        records.extend(read_trace_file(&path)?);
    }

    records.sort_by(|a, b| {
        (a.rank, !a.branch.is_live(), a.seq, a.recorded_at)
            .cmp(&(b.rank, !b.branch.is_live(), b.seq, b.recorded_at))
    });
    Ok(records)
}

/// Records made by live branches only
pub fn live_records(records: &[TraceRecord]) -> impl Iterator<Item = &TraceRecord> {
    records.iter().filter(|r| r.branch.is_live())
}
