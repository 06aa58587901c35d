//! Submission references, materialized trees, and pipeline outcomes.

use crate::error::RuleViolation;
use crate::fingerprint::SimilaritySummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where a submission's source tree comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceLocator {
    /// A remote git repository, optionally pinned to a ref.
    Git {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    /// A directory already on local disk (snapshot by reference, no copy).
    Local { path: PathBuf },
}

/// An immutable reference to one student submission.
///
/// Created by the surrounding service; the pipeline never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRef {
    pub submission_id: String,
    pub step_id: String,
    pub group_id: String,
    pub project_id: String,
    pub source: SourceLocator,
    pub submitted_at: DateTime<Utc>,
}

/// One file in a materialized tree, relative to the tree root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// A submission's source tree on local disk, read-only for the pipeline.
///
/// Destroyed when the pipeline run completes; only fingerprints persist.
#[derive(Debug, Clone)]
pub struct MaterializedTree {
    pub root: PathBuf,
    pub files: Vec<FileEntry>,
    pub total_bytes: u64,
}

impl MaterializedTree {
    /// Absolute path of an inventory entry.
    pub fn absolute(&self, entry: &FileEntry) -> PathBuf {
        self.root.join(&entry.path)
    }

    /// Whether the inventory contains a file at the given relative path.
    pub fn contains(&self, relative: &Path) -> bool {
        self.files.iter().any(|f| f.path == relative)
    }
}

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Done,
    Failed,
}

/// Result of one configured rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<RuleViolation>,
}

/// A non-fatal problem recorded during a run (per-file or per-peer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunWarning {
    /// Stable error code, e.g. `tokenizerFailure`.
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub message: String,
}

/// Terminal error of a failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeError {
    pub code: String,
    pub message: String,
}

/// Wall-clock milliseconds spent in each pipeline phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub acquire_ms: u64,
    pub validate_ms: u64,
    pub tokenize_ms: u64,
    pub fingerprint_ms: u64,
    pub store_ms: u64,
    pub compare_ms: u64,
}

/// Everything a caller learns from one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub state: RunState,
    pub submission_id: String,
    pub step_id: String,
    /// Per-rule pass/fail, in configured order. Empty when acquisition failed.
    pub rule_results: Vec<RuleOutcome>,
    /// Peer similarity summaries, sorted by score descending.
    pub summaries: Vec<SimilaritySummary>,
    /// Summaries whose score met or exceeded the alert threshold.
    pub alerts: Vec<SimilaritySummary>,
    pub warnings: Vec<RunWarning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    pub timings: PhaseTimings,
}

impl PipelineOutcome {
    /// A failed outcome with a single terminal error code.
    pub fn failed(
        submission_id: &str,
        step_id: &str,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            state: RunState::Failed,
            submission_id: submission_id.to_string(),
            step_id: step_id.to_string(),
            rule_results: Vec::new(),
            summaries: Vec::new(),
            alerts: Vec::new(),
            warnings: Vec::new(),
            error: Some(OutcomeError {
                code: code.to_string(),
                message: message.into(),
            }),
            timings: PhaseTimings::default(),
        }
    }
}
