//! Stable error codes and the pipeline error taxonomy.
//!
//! Codes are machine-readable strings surfaced verbatim in outcomes;
//! errors are values carrying a code plus context, never control flow.

use serde::{Deserialize, Serialize};

/// Stable error codes. The strings are part of the external contract.
pub mod code {
    // Acquisition
    pub const ACQUISITION_FAILED: &str = "acquisitionFailed";
    pub const REPOSITORY_TOO_LARGE: &str = "repositoryTooLarge";
    pub const PATH_NOT_ALLOWED: &str = "pathNotAllowed";

    // Rule gate
    pub const MISSING_REQUIRED_FILES: &str = "missingRequiredFiles";
    pub const FORBIDDEN_FILES_FOUND: &str = "forbiddenFilesFound";
    pub const FILE_VALIDATION_FAILED: &str = "fileValidationFailed";
    pub const REPOSITORY_SIZE_EXCEEDED: &str = "repositorySizeExceeded";
    pub const MISSING_REQUIRED_DIRECTORIES: &str = "missingRequiredDirectories";
    pub const FORBIDDEN_DIRECTORIES_FOUND: &str = "forbiddenDirectoriesFound";
    pub const DIRECTORY_DEPTH_EXCEEDED: &str = "directoryDepthExceeded";
    pub const EMPTY_DIRECTORIES_FOUND: &str = "emptyDirectoriesFound";
    pub const DIRECTORY_STRUCTURE_VALIDATION_FAILED: &str = "directoryStructureValidationFailed";
    pub const INVALID_PARAMETER_TYPE: &str = "invalidParameterType";
    pub const INVALID_PARAMETER_VALUE: &str = "invalidParameterValue";
    pub const INVALID_PATTERN_TYPE: &str = "invalidPatternType";
    pub const MISSING_REQUIRED_PARAMETERS: &str = "missingRequiredParameters";
    pub const RULE_EXECUTION_ERROR: &str = "ruleExecutionError";

    // Pipeline
    pub const TOKENIZER_FAILURE: &str = "tokenizerFailure";
    pub const FINGERPRINT_STORE_WRITE_FAILED: &str = "fingerprintStoreWriteFailed";
    pub const COMPARATOR_FAILURE: &str = "comparatorFailure";
    pub const DEADLINE_EXCEEDED: &str = "deadlineExceeded";
}

/// A structured rule-gate failure: stable code plus the offending
/// paths/patterns. Rules aggregate these; they never panic or throw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub code: String,
    /// Name of the rule that produced this violation.
    pub rule: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
}

impl RuleViolation {
    pub fn new(code: &str, rule: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            rule: rule.to_string(),
            message: message.into(),
            paths: Vec::new(),
            patterns: Vec::new(),
        }
    }

    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_patterns(mut self, patterns: Vec<String>) -> Self {
        self.patterns = patterns;
        self
    }
}

/// Fatal pipeline errors. Non-fatal problems (tokenizer downgrades,
/// per-peer comparator failures) travel as outcome warnings instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{message}")]
    Acquisition {
        /// One of the acquisition codes in [`code`].
        code: &'static str,
        message: String,
    },

    #[error("rule gate failed with {} violation(s)", violations.len())]
    Validation { violations: Vec<RuleViolation> },

    #[error("fingerprint store write failed: {message}")]
    StoreWrite { message: String },

    #[error("deadline exceeded after {elapsed_ms} ms")]
    DeadlineExceeded { elapsed_ms: u64 },
}

impl PipelineError {
    /// The single terminal code reported in a failed outcome.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Acquisition { code, .. } => code,
            // The aggregated violations keep their own codes; the run
            // itself reports the generic gate failure.
            Self::Validation { .. } => code::FILE_VALIDATION_FAILED,
            Self::StoreWrite { .. } => code::FINGERPRINT_STORE_WRITE_FAILED,
            Self::DeadlineExceeded { .. } => code::DEADLINE_EXCEEDED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_codes() {
        let e = PipelineError::Acquisition {
            code: code::REPOSITORY_TOO_LARGE,
            message: "clone exceeded 500 MiB".to_string(),
        };
        assert_eq!(e.code(), "repositoryTooLarge");

        let e = PipelineError::DeadlineExceeded { elapsed_ms: 1200 };
        assert_eq!(e.code(), "deadlineExceeded");
        assert!(e.to_string().contains("1200"));
    }

    #[test]
    fn test_violation_builder() {
        let v = RuleViolation::new(code::MISSING_REQUIRED_FILES, "file_presence", "no README")
            .with_patterns(vec!["README*".to_string()]);
        assert_eq!(v.code, "missingRequiredFiles");
        assert_eq!(v.patterns, vec!["README*"]);
        assert!(v.paths.is_empty());
    }
}
