//! Domain operations over the KV engine.

use crate::keys;
use crate::kv::KvEngine;
use crate::version::{DB_FILE, VERSION_FILE, schema_version};
use crate::StoreError;
use simscan_core::codec::{
    decode_fingerprint_set, decode_similarity_result, decode_token_stream,
    encode_fingerprint_set, encode_similarity_result, encode_token_stream,
};
use simscan_core::fingerprint::{FingerprintSet, SimilarityResult};
use simscan_core::token::TokenStream;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The durable fingerprint store. One instance owns one store directory.
#[derive(Debug)]
pub struct FingerprintStore {
    kv: KvEngine,
    /// None for in-memory stores.
    root: Option<PathBuf>,
    version: String,
}

/// Aggregate figures for `simscan info`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub schema_version: String,
    /// Submission count per step, step id ascending.
    pub submissions_per_step: BTreeMap<String, usize>,
    pub fingerprint_sets: usize,
    pub token_streams: usize,
    pub similarity_results: usize,
    /// Database file size in bytes; 0 for in-memory stores.
    pub db_bytes: u64,
}

/// What `migrate` did to a store directory.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationReport {
    pub previous_version: Option<String>,
    pub current_version: String,
    /// Entries dropped because the old layout cannot be read back.
    /// Submissions must be re-ingested through the pipeline.
    pub cleared_entries: usize,
}

impl FingerprintStore {
    /// Open (or create) the store at `dir` for the given winnowing
    /// parameters. Fails with [`StoreError::VersionMismatch`] when the
    /// directory was written under different parameters.
    pub fn open(dir: &Path, k_gram_size: usize, window_size: usize) -> Result<Self, StoreError> {
        let version = schema_version(k_gram_size, window_size);
        std::fs::create_dir_all(dir)?;

        let version_file = dir.join(VERSION_FILE);
        if version_file.exists() {
            let found = std::fs::read_to_string(&version_file)?.trim().to_string();
            if found != version {
                return Err(StoreError::VersionMismatch {
                    found,
                    expected: version,
                });
            }
        } else {
            std::fs::write(&version_file, format!("{version}\n"))?;
        }

        let kv = KvEngine::open(&dir.join(DB_FILE))?;
        Self::check_sentinel_key(&kv, &version)?;
        info!(store = %dir.display(), %version, "opened fingerprint store");
        Ok(Self {
            kv,
            root: Some(dir.to_path_buf()),
            version,
        })
    }

    /// In-memory store for tests; no sentinel file, same key sentinel.
    pub fn open_in_memory(k_gram_size: usize, window_size: usize) -> Result<Self, StoreError> {
        let version = schema_version(k_gram_size, window_size);
        let kv = KvEngine::open_in_memory()?;
        Self::check_sentinel_key(&kv, &version)?;
        Ok(Self {
            kv,
            root: None,
            version,
        })
    }

    fn check_sentinel_key(kv: &KvEngine, version: &str) -> Result<(), StoreError> {
        match kv.get(keys::SCHEMA_KEY)? {
            Some(bytes) => {
                let found = String::from_utf8_lossy(&bytes).to_string();
                if found != version {
                    return Err(StoreError::VersionMismatch {
                        found,
                        expected: version.to_string(),
                    });
                }
            }
            None => kv.put(keys::SCHEMA_KEY, version.as_bytes())?,
        }
        Ok(())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Persist one submission's artifacts in a single transaction:
    /// fingerprint set, token streams, and the step-index entry. Re-runs
    /// with the same submission id overwrite prior artifacts atomically.
    pub fn insert_submission(
        &self,
        set: &FingerprintSet,
        streams: &[TokenStream],
    ) -> Result<(), StoreError> {
        let fp_key = keys::fingerprint_set(&set.step_id, &set.submission_id);
        let payload = encode_fingerprint_set(set);
        self.kv.with_tx(|tx| {
            // Drop any token streams from a prior run of this id first;
            // the new file set may not cover the old one.
            tx.delete_prefix(&keys::token_prefix(&set.submission_id))?;
            tx.put(&fp_key, &payload)?;
            for stream in streams {
                tx.put(
                    &keys::token_stream(&set.submission_id, &stream.path),
                    &encode_token_stream(stream),
                )?;
            }
            tx.put(&keys::step_entry(&set.step_id, &set.submission_id), b"")?;
            Ok(())
        })?;
        debug!(
            submission = %set.submission_id,
            step = %set.step_id,
            fingerprints = set.total(),
            files = streams.len(),
            "stored submission artifacts"
        );
        Ok(())
    }

    /// Submission ids present for a step, lexicographically ordered.
    /// Scans index keys only; no payloads are loaded.
    pub fn step_submissions(&self, step_id: &str) -> Result<Vec<String>, StoreError> {
        let prefix = keys::step_prefix(step_id);
        Ok(self
            .kv
            .scan_keys(&prefix)?
            .into_iter()
            .map(|k| k[prefix.len()..].to_string())
            .collect())
    }

    pub fn load_fingerprint_set(
        &self,
        step_id: &str,
        submission_id: &str,
    ) -> Result<Option<FingerprintSet>, StoreError> {
        let key = keys::fingerprint_set(step_id, submission_id);
        match self.kv.get(&key)? {
            Some(bytes) => decode_fingerprint_set(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Codec { key, source }),
            None => Ok(None),
        }
    }

    pub fn put_similarity(&self, result: &SimilarityResult) -> Result<(), StoreError> {
        let key = keys::similarity(&result.step_id, &result.submission_a, &result.submission_b);
        self.kv.put(&key, &encode_similarity_result(result))
    }

    pub fn load_similarity(
        &self,
        step_id: &str,
        x: &str,
        y: &str,
    ) -> Result<Option<SimilarityResult>, StoreError> {
        let key = keys::similarity(step_id, x, y);
        match self.kv.get(&key)? {
            Some(bytes) => decode_similarity_result(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Codec { key, source }),
            None => Ok(None),
        }
    }

    /// Every stored result for a step.
    pub fn step_similarities(&self, step_id: &str) -> Result<Vec<SimilarityResult>, StoreError> {
        let mut results = Vec::new();
        for key in self.kv.scan_keys(&keys::similarity_prefix(step_id))? {
            if let Some(bytes) = self.kv.get(&key)? {
                let result = decode_similarity_result(&bytes)
                    .map_err(|source| StoreError::Codec { key, source })?;
                results.push(result);
            }
        }
        Ok(results)
    }

    pub fn load_token_stream(
        &self,
        submission_id: &str,
        file_path: &str,
    ) -> Result<Option<TokenStream>, StoreError> {
        let key = keys::token_stream(submission_id, file_path);
        match self.kv.get(&key)? {
            Some(bytes) => decode_token_stream(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Codec { key, source }),
            None => Ok(None),
        }
    }

    /// Delete one submission and everything hanging off it: fingerprint
    /// set, token streams, every similarity result it participates in,
    /// and its step-index entry. Runs in one transaction.
    pub fn delete_submission(&self, step_id: &str, submission_id: &str) -> Result<(), StoreError> {
        self.kv.with_tx(|tx| {
            tx.delete(&keys::fingerprint_set(step_id, submission_id))?;
            tx.delete_prefix(&keys::token_prefix(submission_id))?;
            for key in tx.scan_keys(&keys::similarity_prefix(step_id))? {
                if let Some((a, b)) = keys::similarity_pair(&key, step_id)
                    && (a == submission_id || b == submission_id)
                {
                    tx.delete(&key)?;
                }
            }
            tx.delete(&keys::step_entry(step_id, submission_id))?;
            Ok(())
        })?;
        info!(submission = submission_id, step = step_id, "deleted submission");
        Ok(())
    }

    /// Aggregate statistics for operator tooling.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut submissions_per_step: BTreeMap<String, usize> = BTreeMap::new();
        for key in self.kv.scan_keys("idx/step/")? {
            if let Some(rest) = key.strip_prefix("idx/step/")
                && let Some((step, _)) = rest.split_once('/')
            {
                *submissions_per_step.entry(step.to_string()).or_insert(0) += 1;
            }
        }
        let db_bytes = match &self.root {
            Some(root) => std::fs::metadata(root.join(DB_FILE)).map(|m| m.len()).unwrap_or(0),
            None => 0,
        };
        Ok(StoreStats {
            schema_version: self.version.clone(),
            submissions_per_step,
            fingerprint_sets: self.kv.scan_keys("fp/")?.len(),
            token_streams: self.kv.scan_keys("tok/")?.len(),
            similarity_results: self.kv.scan_keys("sim/")?.len(),
            db_bytes,
        })
    }

    /// Check a store directory against the current parameters and, when
    /// the versions disagree, clear it for re-ingestion. Old payloads are
    /// unreadable under new parameters by definition (the fingerprints
    /// themselves change), so migration means re-running the pipeline.
    pub fn migrate(
        dir: &Path,
        k_gram_size: usize,
        window_size: usize,
    ) -> Result<MigrationReport, StoreError> {
        let current = schema_version(k_gram_size, window_size);
        std::fs::create_dir_all(dir)?;
        let version_file = dir.join(VERSION_FILE);
        let previous = if version_file.exists() {
            Some(std::fs::read_to_string(&version_file)?.trim().to_string())
        } else {
            None
        };

        if previous.as_deref() == Some(current.as_str()) {
            return Ok(MigrationReport {
                previous_version: previous,
                current_version: current,
                cleared_entries: 0,
            });
        }

        let kv = KvEngine::open(&dir.join(DB_FILE))?;
        let cleared = kv.with_tx(|tx| {
            let mut n = 0;
            for prefix in ["fp/", "tok/", "sim/", "idx/"] {
                n += tx.delete_prefix(prefix)?;
            }
            tx.put(keys::SCHEMA_KEY, current.as_bytes())?;
            Ok(n)
        })?;
        std::fs::write(&version_file, format!("{current}\n"))?;
        info!(
            store = %dir.display(),
            from = ?previous,
            to = %current,
            cleared,
            "migrated store"
        );
        Ok(MigrationReport {
            previous_version: previous,
            current_version: current,
            cleared_entries: cleared,
        })
    }
}
