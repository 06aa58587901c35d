//! Fingerprints, fingerprint sets, and comparison results.

use crate::token::Span;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One winnowed fingerprint: a k-gram hash, its position in the token
/// stream, and the byte-span union of the k tokens it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: u64,
    /// Index of the k-gram's first token in the stream.
    pub position: u32,
    pub span: Span,
}

/// Fingerprints for one file of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprints {
    /// Path relative to the tree root, `/`-separated.
    pub path: String,
    pub fingerprints: Vec<Fingerprint>,
}

/// The complete winnowed fingerprint set for one submission, partitioned
/// by file. Written to the store once, read-only thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintSet {
    pub submission_id: String,
    pub step_id: String,
    pub files: Vec<FileFingerprints>,
}

impl FingerprintSet {
    pub fn new(submission_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            step_id: step_id.into(),
            files: Vec::new(),
        }
    }

    /// Total fingerprint count across all files.
    pub fn total(&self) -> usize {
        self.files.iter().map(|f| f.fingerprints.len()).sum()
    }

    /// Number of distinct hashes across all files.
    pub fn unique_hashes(&self) -> usize {
        self.files
            .iter()
            .flat_map(|f| f.fingerprints.iter().map(|fp| fp.hash))
            .collect::<HashSet<_>>()
            .len()
    }
}

/// A maximal run of consecutive shared fingerprints between two
/// submissions, mapped back to source byte ranges on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRegion {
    /// Hash of the first shared fingerprint in the run.
    pub hash: u64,
    pub a_file: String,
    pub a_span: Span,
    pub b_file: String,
    pub b_span: Span,
    /// Number of consecutive shared fingerprints in the run.
    pub token_length: u32,
}

/// The persisted result of comparing two submissions within one step.
///
/// `(A, B)` and `(B, A)` are equivalent; the store keeps the ordering
/// with `submission_a < submission_b` lexicographically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub id: String,
    pub submission_a: String,
    pub submission_b: String,
    pub step_id: String,
    /// Containment-style score in [0, 1].
    pub score: f64,
    /// Set when either side had fewer unique fingerprints than the
    /// confidence floor.
    pub low_confidence: bool,
    /// Set when region extraction hit the pair-count ceiling. The score
    /// itself is still exact.
    pub truncated: bool,
    pub regions: Vec<MatchRegion>,
    pub created_at: DateTime<Utc>,
}

impl SimilarityResult {
    /// Canonical (a, b) ordering for a pair of submission ids.
    pub fn canonical_pair<'a>(x: &'a str, y: &'a str) -> (&'a str, &'a str) {
        if x <= y { (x, y) } else { (y, x) }
    }

    /// Summary row for outcome listings, relative to `own_id`'s view.
    pub fn summarize(&self, own_id: &str) -> SimilaritySummary {
        let peer = if self.submission_a == own_id {
            &self.submission_b
        } else {
            &self.submission_a
        };
        SimilaritySummary {
            peer_submission_id: peer.clone(),
            score: self.score,
            truncated: self.truncated,
            low_confidence: self.low_confidence,
            region_count: self.regions.len(),
        }
    }
}

/// One row of a pipeline outcome's ranked peer listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilaritySummary {
    pub peer_submission_id: String,
    pub score: f64,
    pub truncated: bool,
    pub low_confidence: bool,
    pub region_count: usize,
}
