//! Pipeline options and process configuration.
//!
//! Precedence: explicit per-request options > `simscan.toml` + `SIMSCAN_*`
//! environment variables > built-in defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tunable parameters for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// k-gram size for fingerprinting. Must be ≥ 2.
    pub k_gram_size: usize,
    /// Winnowing window size in k-gram hashes. Must be ≥ k.
    pub window_size: usize,
    /// Scores at or above this threshold raise an alert.
    pub alert_threshold: f64,
    /// Files larger than this are excluded from tokenization and reported.
    pub per_file_byte_cap: u64,
    /// Acquisition aborts once the materialized tree exceeds this.
    pub total_tree_byte_cap: u64,
    /// Whole-run deadline. Expiry fails the run with `deadlineExceeded`.
    pub deadline_ms: u64,
    /// Worker pool width. 0 means the logical CPU count.
    pub parallelism: usize,
    /// Ceiling on shared-position pairs during region extraction; beyond
    /// it regions are truncated (the score stays exact).
    pub max_region_pairs: u64,
    /// Below this many unique fingerprints on either side, results are
    /// flagged low-confidence.
    pub low_confidence_floor: usize,
    /// Local source locators must resolve under this root when set.
    pub allowed_source_root: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            k_gram_size: 5,
            window_size: 7,
            alert_threshold: 0.7,
            per_file_byte_cap: 1_048_576,
            total_tree_byte_cap: 524_288_000,
            deadline_ms: 600_000,
            parallelism: 0,
            max_region_pairs: 1_000_000,
            low_confidence_floor: 10,
            allowed_source_root: None,
        }
    }
}

/// Helper to parse an env var and apply it to an options field.
fn env_override<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(n) = v.parse()
    {
        *target = n;
    }
}

impl PipelineOptions {
    /// Load process configuration: `simscan.toml` in `config_dir` (when
    /// present), then `SIMSCAN_*` environment overrides, then validation.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("simscan.toml");

        let mut options = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        env_override("SIMSCAN_K_GRAM_SIZE", &mut options.k_gram_size);
        env_override("SIMSCAN_WINDOW_SIZE", &mut options.window_size);
        env_override("SIMSCAN_ALERT_THRESHOLD", &mut options.alert_threshold);
        env_override("SIMSCAN_PER_FILE_BYTE_CAP", &mut options.per_file_byte_cap);
        env_override(
            "SIMSCAN_TOTAL_TREE_BYTE_CAP",
            &mut options.total_tree_byte_cap,
        );
        env_override("SIMSCAN_DEADLINE_MS", &mut options.deadline_ms);
        env_override("SIMSCAN_PARALLELISM", &mut options.parallelism);
        env_override("SIMSCAN_MAX_REGION_PAIRS", &mut options.max_region_pairs);

        options.validate()?;
        Ok(options)
    }

    /// Reject parameter combinations the fingerprinter cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.k_gram_size < 2 {
            anyhow::bail!("k_gram_size ({}) must be at least 2", self.k_gram_size);
        }
        if self.window_size < self.k_gram_size {
            anyhow::bail!(
                "window_size ({}) must be at least k_gram_size ({})",
                self.window_size,
                self.k_gram_size,
            );
        }
        if !(0.0..=1.0).contains(&self.alert_threshold) {
            anyhow::bail!(
                "alert_threshold ({}) must lie in [0, 1]",
                self.alert_threshold,
            );
        }
        Ok(())
    }

    /// Effective worker pool width.
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            self.parallelism
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        }
    }

    /// Guarantee length for winnowing: any shared token substring of at
    /// least this length produces at least one shared fingerprint.
    pub fn guarantee_length(&self) -> usize {
        self.window_size + self.k_gram_size - 1
    }
}
