//! End-to-end pipeline orchestration for one submission.
//!
//! State machine: Acquired → Validated → Tokenized → Fingerprinted →
//! Stored → Compared → Done, with any step able to divert to Failed.
//! Per-file work and per-peer comparisons run on a bounded worker pool;
//! the deadline is checked cooperatively between files, never mid-file.

use crate::acquire::acquire;
use crate::compare::{CompareConfig, compare};
use crate::fingerprint::fingerprint_stream;
use crate::rules::{RuleSpec, build_rules, run_gate};
use rayon::prelude::*;
use simscan_core::config::PipelineOptions;
use simscan_core::error::code;
use simscan_core::fingerprint::{FileFingerprints, FingerprintSet, SimilarityResult};
use simscan_core::token::TokenStream;
use simscan_core::types::{
    FileEntry, MaterializedTree, OutcomeError, PhaseTimings, PipelineOutcome, RuleOutcome,
    RunState, RunWarning, SubmissionRef,
};
use simscan_store::{FingerprintStore, StoreError};
use simscan_tokenize::{Classification, FallbackLexer, Lexer, TreeSitterLexer, classify_file};
use std::io::Read as _;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Warning code for files excluded by the per-file byte cap. Not part
/// of the terminal error taxonomy; appears only in outcome warnings.
const FILE_TOO_LARGE: &str = "fileTooLarge";

/// Whole-run deadline, checked cooperatively between units of work.
struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    fn new(limit_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            limit: Duration::from_millis(limit_ms),
        }
    }

    fn expired(&self) -> bool {
        self.started.elapsed() >= self.limit
    }
}

/// Run the full pipeline for one submission and persist its artifacts.
///
/// Never returns `Err`: every failure mode is folded into a `Failed`
/// outcome with a single terminal code. Re-running with the same
/// submission id overwrites that id's artifacts atomically.
pub fn run_pipeline(
    submission: &SubmissionRef,
    rule_specs: &[RuleSpec],
    options: &PipelineOptions,
    store: &FingerprintStore,
) -> PipelineOutcome {
    let deadline = Deadline::new(options.deadline_ms);
    let mut timings = PhaseTimings::default();

    if let Err(e) = options.validate() {
        return PipelineOutcome::failed(
            &submission.submission_id,
            &submission.step_id,
            code::RULE_EXECUTION_ERROR,
            format!("invalid pipeline options: {e}"),
        );
    }

    // ── Acquire ─────────────────────────────────────────────────────
    let phase = Instant::now();
    let scratch = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            return PipelineOutcome::failed(
                &submission.submission_id,
                &submission.step_id,
                code::ACQUISITION_FAILED,
                format!("cannot create scratch directory: {e}"),
            );
        }
    };
    let tree = match acquire(&submission.source, options, scratch.path()) {
        Ok(tree) => tree,
        Err(e) => {
            return PipelineOutcome::failed(
                &submission.submission_id,
                &submission.step_id,
                e.code(),
                e.to_string(),
            );
        }
    };
    timings.acquire_ms = phase.elapsed().as_millis() as u64;
    info!(
        submission = %submission.submission_id,
        files = tree.files.len(),
        bytes = tree.total_bytes,
        "acquired submission tree"
    );

    // ── Validate ────────────────────────────────────────────────────
    let phase = Instant::now();
    let rules = match build_rules(rule_specs) {
        Ok(rules) => rules,
        Err(violations) => {
            let first_code = violations[0].code.clone();
            let rule_results = violations
                .into_iter()
                .map(|v| RuleOutcome {
                    rule: v.rule.clone(),
                    passed: false,
                    violations: vec![v],
                })
                .collect();
            return failed_with_rules(submission, first_code, rule_results, timings);
        }
    };
    let rule_results = run_gate(&rules, &tree);
    timings.validate_ms = phase.elapsed().as_millis() as u64;
    if rule_results.iter().any(|r| !r.passed) {
        let first_code = rule_results
            .iter()
            .flat_map(|r| &r.violations)
            .map(|v| v.code.clone())
            .next()
            .unwrap_or_else(|| code::FILE_VALIDATION_FAILED.to_string());
        info!(submission = %submission.submission_id, code = %first_code, "rule gate blocked submission");
        return failed_with_rules(submission, first_code, rule_results, timings);
    }

    // Bounded worker pool; falls back to the global pool if the build
    // fails (resource exhaustion).
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.effective_parallelism())
        .build()
        .ok();

    // ── Tokenize ────────────────────────────────────────────────────
    let phase = Instant::now();
    let (streams, mut warnings) = match &pool {
        Some(pool) => pool.install(|| tokenize_tree(&tree, options, &deadline)),
        None => tokenize_tree(&tree, options, &deadline),
    };
    timings.tokenize_ms = phase.elapsed().as_millis() as u64;
    if deadline.expired() {
        // Nothing was written yet; the store holds no partial artifacts.
        return failed_with_rules(
            submission,
            code::DEADLINE_EXCEEDED.to_string(),
            rule_results,
            timings,
        );
    }

    // ── Fingerprint ─────────────────────────────────────────────────
    let phase = Instant::now();
    let files: Vec<FileFingerprints> = match &pool {
        Some(pool) => pool.install(|| fingerprint_streams(&streams, options)),
        None => fingerprint_streams(&streams, options),
    };
    let mut set = FingerprintSet::new(&submission.submission_id, &submission.step_id);
    set.files = files;
    timings.fingerprint_ms = phase.elapsed().as_millis() as u64;
    if deadline.expired() {
        return failed_with_rules(
            submission,
            code::DEADLINE_EXCEEDED.to_string(),
            rule_results,
            timings,
        );
    }

    // ── Store ───────────────────────────────────────────────────────
    let phase = Instant::now();
    if let Err(e) = store.insert_submission(&set, &streams) {
        // The transaction rolled back; no partial artifacts remain.
        warn!(submission = %submission.submission_id, error = %e, "store write failed");
        return failed_with_rules(
            submission,
            code::FINGERPRINT_STORE_WRITE_FAILED.to_string(),
            rule_results,
            timings,
        );
    }
    timings.store_ms = phase.elapsed().as_millis() as u64;

    // ── Compare ─────────────────────────────────────────────────────
    let phase = Instant::now();
    let peers = match store.step_submissions(&submission.step_id) {
        Ok(peers) => peers
            .into_iter()
            .filter(|p| p != &submission.submission_id)
            .collect::<Vec<_>>(),
        Err(e) => {
            warnings.push(RunWarning {
                code: code::COMPARATOR_FAILURE.to_string(),
                file: None,
                message: format!("cannot enumerate step peers: {e}"),
            });
            Vec::new()
        }
    };

    let compare_config = CompareConfig::from(options);
    let peer_outcomes: Vec<Result<SimilarityResult, RunWarning>> = match &pool {
        Some(pool) => pool.install(|| {
            compare_peers(store, &set, &peers, &compare_config, &deadline)
        }),
        None => compare_peers(store, &set, &peers, &compare_config, &deadline),
    };
    if deadline.expired() {
        return failed_with_rules(
            submission,
            code::DEADLINE_EXCEEDED.to_string(),
            rule_results,
            timings,
        );
    }

    let mut summaries = Vec::new();
    for outcome in peer_outcomes {
        match outcome {
            Ok(result) => summaries.push(result.summarize(&submission.submission_id)),
            Err(warning) => warnings.push(warning),
        }
    }
    summaries.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.peer_submission_id.cmp(&b.peer_submission_id))
    });
    let alerts: Vec<_> = summaries
        .iter()
        .filter(|s| s.score >= options.alert_threshold)
        .cloned()
        .collect();
    timings.compare_ms = phase.elapsed().as_millis() as u64;

    info!(
        submission = %submission.submission_id,
        peers = summaries.len(),
        alerts = alerts.len(),
        warnings = warnings.len(),
        "pipeline run complete"
    );

    PipelineOutcome {
        state: RunState::Done,
        submission_id: submission.submission_id.clone(),
        step_id: submission.step_id.clone(),
        rule_results,
        summaries,
        alerts,
        warnings,
        error: None,
        timings,
    }
}

fn failed_with_rules(
    submission: &SubmissionRef,
    error_code: String,
    rule_results: Vec<RuleOutcome>,
    timings: PhaseTimings,
) -> PipelineOutcome {
    PipelineOutcome {
        state: RunState::Failed,
        submission_id: submission.submission_id.clone(),
        step_id: submission.step_id.clone(),
        rule_results,
        summaries: Vec::new(),
        alerts: Vec::new(),
        warnings: Vec::new(),
        error: Some(OutcomeError {
            message: format!("pipeline failed with {error_code}"),
            code: error_code,
        }),
        timings,
    }
}

type TokenizeOutput = (Vec<TokenStream>, Vec<RunWarning>);

/// Classify and tokenize every inventory file in parallel. Excluded or
/// failing files produce warnings, never a run failure. Files already
/// dispatched keep running when the deadline expires; queued files are
/// dropped.
fn tokenize_tree(
    tree: &MaterializedTree,
    options: &PipelineOptions,
    deadline: &Deadline,
) -> TokenizeOutput {
    let per_file: Vec<(Option<TokenStream>, Option<RunWarning>)> = tree
        .files
        .par_iter()
        .map(|entry| {
            if deadline.expired() {
                return (None, None);
            }
            tokenize_file(tree, entry, options)
        })
        .collect();

    let mut streams = Vec::new();
    let mut warnings = Vec::new();
    for (stream, warning) in per_file {
        if let Some(stream) = stream {
            streams.push(stream);
        }
        if let Some(warning) = warning {
            warnings.push(warning);
        }
    }
    (streams, warnings)
}

fn tokenize_file(
    tree: &MaterializedTree,
    entry: &FileEntry,
    options: &PipelineOptions,
) -> (Option<TokenStream>, Option<RunWarning>) {
    let rel = entry.path.to_string_lossy().replace('\\', "/");
    let absolute = tree.absolute(entry);

    let head = match read_head(&absolute) {
        Ok(head) => head,
        Err(e) => {
            return (
                None,
                Some(RunWarning {
                    code: code::TOKENIZER_FAILURE.to_string(),
                    file: Some(rel),
                    message: format!("cannot read file head: {e}"),
                }),
            );
        }
    };

    let classification = classify_file(&entry.path, &head, entry.size, options.per_file_byte_cap);
    match classification {
        Classification::Binary => (None, None),
        Classification::TooLarge => (
            None,
            Some(RunWarning {
                code: FILE_TOO_LARGE.to_string(),
                file: Some(rel),
                message: format!(
                    "file is {} bytes, over the {}-byte per-file cap",
                    entry.size, options.per_file_byte_cap,
                ),
            }),
        ),
        Classification::Source(_) | Classification::Fallback => {
            let source = match std::fs::read(&absolute) {
                Ok(bytes) => bytes,
                Err(e) => {
                    return (
                        None,
                        Some(RunWarning {
                            code: code::TOKENIZER_FAILURE.to_string(),
                            file: Some(rel),
                            message: format!("cannot read file: {e}"),
                        }),
                    );
                }
            };
            match classification {
                Classification::Source(language) => {
                    match TreeSitterLexer::new(language).tokenize(&rel, &source) {
                        Ok(stream) => (Some(stream), None),
                        Err(e) => {
                            // Grammar trouble downgrades the file, never
                            // the run. The fallback lexer cannot fail.
                            let warning = RunWarning {
                                code: code::TOKENIZER_FAILURE.to_string(),
                                file: Some(rel.clone()),
                                message: format!(
                                    "{} tokenizer failed ({e}); using fallback",
                                    language.name(),
                                ),
                            };
                            let stream = FallbackLexer
                                .tokenize(&rel, &source)
                                .unwrap_or_else(|_| TokenStream::new(&rel, "fallback"));
                            (Some(stream), Some(warning))
                        }
                    }
                }
                _ => {
                    let stream = FallbackLexer
                        .tokenize(&rel, &source)
                        .unwrap_or_else(|_| TokenStream::new(&rel, "fallback"));
                    (Some(stream), None)
                }
            }
        }
    }
}

fn read_head(path: &std::path::Path) -> std::io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    let mut head = vec![0u8; simscan_tokenize::classify::SNIFF_BYTES];
    let mut filled = 0;
    loop {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == head.len() {
            break;
        }
    }
    head.truncate(filled);
    Ok(head)
}

fn fingerprint_streams(
    streams: &[TokenStream],
    options: &PipelineOptions,
) -> Vec<FileFingerprints> {
    streams
        .par_iter()
        .map(|stream| FileFingerprints {
            path: stream.path.clone(),
            fingerprints: fingerprint_stream(stream, options.k_gram_size, options.window_size),
        })
        .collect()
}

/// Compare against every peer concurrently. A failure on one peer is
/// isolated to that peer; the others proceed.
fn compare_peers(
    store: &FingerprintStore,
    own: &FingerprintSet,
    peers: &[String],
    config: &CompareConfig,
    deadline: &Deadline,
) -> Vec<Result<SimilarityResult, RunWarning>> {
    peers
        .par_iter()
        .filter_map(|peer| {
            if deadline.expired() {
                return None;
            }
            Some(compare_one_peer(store, own, peer, config))
        })
        .collect()
}

fn compare_one_peer(
    store: &FingerprintStore,
    own: &FingerprintSet,
    peer: &str,
    config: &CompareConfig,
) -> Result<SimilarityResult, RunWarning> {
    let peer_warning = |message: String| RunWarning {
        code: code::COMPARATOR_FAILURE.to_string(),
        file: None,
        message,
    };

    let peer_set = store
        .load_fingerprint_set(&own.step_id, peer)
        .map_err(|e| peer_warning(format!("cannot load peer {peer}: {e}")))?
        .ok_or_else(|| peer_warning(format!("peer {peer} indexed but has no fingerprint set")))?;

    let result = compare(own, &peer_set, config);
    store
        .put_similarity(&result)
        .map_err(|e| peer_warning(format!("cannot persist result for peer {peer}: {e}")))?;
    Ok(result)
}

/// Read access to a run's persisted comparison artifacts, for rendering
/// alignments externally.
pub struct ResultHandle<'a> {
    store: &'a FingerprintStore,
    step_id: String,
    submission_id: String,
}

impl<'a> ResultHandle<'a> {
    pub fn new(store: &'a FingerprintStore, step_id: &str, submission_id: &str) -> Self {
        Self {
            store,
            step_id: step_id.to_string(),
            submission_id: submission_id.to_string(),
        }
    }

    /// The stored result against one peer, including match regions.
    pub fn result(&self, peer: &str) -> Result<Option<SimilarityResult>, StoreError> {
        self.store
            .load_similarity(&self.step_id, &self.submission_id, peer)
    }

    /// A stored token stream, for mapping regions onto source text.
    /// Works for this submission and for its peers.
    pub fn token_stream(
        &self,
        submission_id: &str,
        file_path: &str,
    ) -> Result<Option<TokenStream>, StoreError> {
        self.store.load_token_stream(submission_id, file_path)
    }
}
