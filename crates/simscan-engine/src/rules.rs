//! Structural validation rules, run as a gate before tokenization.
//!
//! Rules arrive as `{name, params}` pairs and are resolved against the
//! closed set of built-in kinds at setup time; an unknown name is a
//! setup failure, never a runtime surprise. The gate runs every
//! configured rule and aggregates all failures; it does not stop at
//! the first one.

use globset::{Glob, GlobMatcher};
use serde::Deserialize;
use serde_json::Value;
use simscan_core::error::{RuleViolation, code};
use simscan_core::types::{MaterializedTree, RuleOutcome};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// A rule as configured by the caller: name plus free-form parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

/// A compiled, ready-to-run rule.
#[derive(Debug)]
pub struct GateRule {
    pub name: String,
    kind: RuleKind,
}

#[derive(Debug)]
enum RuleKind {
    FilePresence {
        must_exist: Vec<(String, GlobMatcher)>,
        forbidden: Vec<(String, GlobMatcher)>,
    },
    MaxArchiveSize {
        max_size_mb: u64,
    },
    DirectoryStructure {
        required: Vec<(String, GlobMatcher)>,
        forbidden: Vec<(String, GlobMatcher)>,
        max_depth: Option<usize>,
        allow_empty_dirs: bool,
    },
}

/// Compile rule specs. All setup problems are reported together, with
/// the same stable codes the gate itself uses.
pub fn build_rules(specs: &[RuleSpec]) -> Result<Vec<GateRule>, Vec<RuleViolation>> {
    let mut rules = Vec::new();
    let mut violations = Vec::new();

    for spec in specs {
        match build_rule(spec) {
            Ok(rule) => rules.push(rule),
            Err(v) => violations.push(v),
        }
    }

    if violations.is_empty() {
        Ok(rules)
    } else {
        Err(violations)
    }
}

fn build_rule(spec: &RuleSpec) -> Result<GateRule, RuleViolation> {
    let kind = match spec.name.as_str() {
        "file_presence" => build_file_presence(spec)?,
        "max_archive_size" => build_max_archive_size(spec)?,
        "directory_structure" => build_directory_structure(spec)?,
        other => {
            return Err(RuleViolation::new(
                code::RULE_EXECUTION_ERROR,
                other,
                format!("unknown rule name {other:?}"),
            ));
        }
    };
    Ok(GateRule {
        name: spec.name.clone(),
        kind,
    })
}

fn build_file_presence(spec: &RuleSpec) -> Result<RuleKind, RuleViolation> {
    let must_exist = pattern_list(spec, "must_exist")?;
    let forbidden = pattern_list(spec, "forbidden")?;
    if must_exist.is_empty() && forbidden.is_empty() {
        return Err(RuleViolation::new(
            code::MISSING_REQUIRED_PARAMETERS,
            &spec.name,
            "file_presence needs `must_exist` and/or `forbidden`",
        ));
    }
    Ok(RuleKind::FilePresence {
        must_exist,
        forbidden,
    })
}

fn build_max_archive_size(spec: &RuleSpec) -> Result<RuleKind, RuleViolation> {
    let Some(value) = spec.params.get("max_size_mb") else {
        return Err(RuleViolation::new(
            code::MISSING_REQUIRED_PARAMETERS,
            &spec.name,
            "max_archive_size needs `max_size_mb`",
        ));
    };
    let Some(mb) = value.as_u64() else {
        return Err(RuleViolation::new(
            code::INVALID_PARAMETER_TYPE,
            &spec.name,
            format!("`max_size_mb` must be a non-negative integer, got {value}"),
        ));
    };
    if mb == 0 {
        return Err(RuleViolation::new(
            code::INVALID_PARAMETER_VALUE,
            &spec.name,
            "`max_size_mb` must be positive",
        ));
    }
    Ok(RuleKind::MaxArchiveSize { max_size_mb: mb })
}

fn build_directory_structure(spec: &RuleSpec) -> Result<RuleKind, RuleViolation> {
    let required = pattern_list(spec, "required_directories")?;
    let forbidden = pattern_list(spec, "forbidden_directories")?;

    let max_depth = match spec.params.get("max_depth") {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_u64() {
            Some(depth) => Some(depth as usize),
            None => {
                return Err(RuleViolation::new(
                    code::INVALID_PARAMETER_TYPE,
                    &spec.name,
                    format!("`max_depth` must be a non-negative integer, got {value}"),
                ));
            }
        },
    };

    let allow_empty_dirs = match spec.params.get("allow_empty_dirs") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(value) => {
            return Err(RuleViolation::new(
                code::INVALID_PARAMETER_TYPE,
                &spec.name,
                format!("`allow_empty_dirs` must be a boolean, got {value}"),
            ));
        }
    };

    Ok(RuleKind::DirectoryStructure {
        required,
        forbidden,
        max_depth,
        allow_empty_dirs,
    })
}

/// Parse an optional array-of-glob-strings parameter and compile it.
fn pattern_list(
    spec: &RuleSpec,
    key: &str,
) -> Result<Vec<(String, GlobMatcher)>, RuleViolation> {
    let Some(value) = spec.params.get(key) else {
        return Ok(Vec::new());
    };
    let Some(items) = value.as_array() else {
        return Err(RuleViolation::new(
            code::INVALID_PARAMETER_TYPE,
            &spec.name,
            format!("`{key}` must be an array of glob strings, got {value}"),
        ));
    };

    let mut patterns = Vec::with_capacity(items.len());
    for item in items {
        let Some(pattern) = item.as_str() else {
            return Err(RuleViolation::new(
                code::INVALID_PATTERN_TYPE,
                &spec.name,
                format!("`{key}` entries must be strings, got {item}"),
            )
            .with_patterns(vec![item.to_string()]));
        };
        // `*` stays within one path segment; `**` crosses segments.
        let glob = Glob::new(pattern).map_err(|e| {
            RuleViolation::new(
                code::INVALID_PATTERN_TYPE,
                &spec.name,
                format!("`{key}` pattern {pattern:?} is not a valid glob: {e}"),
            )
            .with_patterns(vec![pattern.to_string()])
        })?;
        patterns.push((pattern.to_string(), glob.compile_matcher()));
    }
    Ok(patterns)
}

/// Run every rule against the tree. All failures are aggregated; the
/// caller decides that any failure blocks the pipeline.
pub fn run_gate(rules: &[GateRule], tree: &MaterializedTree) -> Vec<RuleOutcome> {
    rules
        .iter()
        .map(|rule| {
            let violations = run_rule(rule, tree);
            debug!(rule = %rule.name, passed = violations.is_empty(), "rule evaluated");
            RuleOutcome {
                rule: rule.name.clone(),
                passed: violations.is_empty(),
                violations,
            }
        })
        .collect()
}

fn run_rule(rule: &GateRule, tree: &MaterializedTree) -> Vec<RuleViolation> {
    match &rule.kind {
        RuleKind::FilePresence {
            must_exist,
            forbidden,
        } => run_file_presence(&rule.name, tree, must_exist, forbidden),
        RuleKind::MaxArchiveSize { max_size_mb } => {
            run_max_archive_size(&rule.name, tree, *max_size_mb)
        }
        RuleKind::DirectoryStructure {
            required,
            forbidden,
            max_depth,
            allow_empty_dirs,
        } => run_directory_structure(
            &rule.name,
            tree,
            required,
            forbidden,
            *max_depth,
            *allow_empty_dirs,
        ),
    }
}

fn run_file_presence(
    rule: &str,
    tree: &MaterializedTree,
    must_exist: &[(String, GlobMatcher)],
    forbidden: &[(String, GlobMatcher)],
) -> Vec<RuleViolation> {
    let mut violations = Vec::new();

    let unmatched: Vec<String> = must_exist
        .iter()
        .filter(|(_, matcher)| !tree.files.iter().any(|f| matcher.is_match(&f.path)))
        .map(|(pattern, _)| pattern.clone())
        .collect();
    if !unmatched.is_empty() {
        violations.push(
            RuleViolation::new(
                code::MISSING_REQUIRED_FILES,
                rule,
                format!("{} required file pattern(s) matched nothing", unmatched.len()),
            )
            .with_patterns(unmatched),
        );
    }

    let mut hit_patterns = Vec::new();
    let mut hit_paths = BTreeSet::new();
    for (pattern, matcher) in forbidden {
        let hits: Vec<&Path> = tree
            .files
            .iter()
            .filter(|f| matcher.is_match(&f.path))
            .map(|f| f.path.as_path())
            .collect();
        if !hits.is_empty() {
            hit_patterns.push(pattern.clone());
            hit_paths.extend(hits.iter().map(|p| p.display().to_string()));
        }
    }
    if !hit_patterns.is_empty() {
        violations.push(
            RuleViolation::new(
                code::FORBIDDEN_FILES_FOUND,
                rule,
                format!("{} forbidden file(s) present", hit_paths.len()),
            )
            .with_paths(hit_paths.into_iter().collect())
            .with_patterns(hit_patterns),
        );
    }

    violations
}

fn run_max_archive_size(
    rule: &str,
    tree: &MaterializedTree,
    max_size_mb: u64,
) -> Vec<RuleViolation> {
    let cap = max_size_mb * 1024 * 1024;
    if tree.total_bytes <= cap {
        return Vec::new();
    }
    vec![RuleViolation::new(
        code::REPOSITORY_SIZE_EXCEEDED,
        rule,
        format!(
            "tree is {} bytes, exceeding the {max_size_mb} MiB cap",
            tree.total_bytes,
        ),
    )]
}

fn run_directory_structure(
    rule: &str,
    tree: &MaterializedTree,
    required: &[(String, GlobMatcher)],
    forbidden: &[(String, GlobMatcher)],
    max_depth: Option<usize>,
    allow_empty_dirs: bool,
) -> Vec<RuleViolation> {
    let mut violations = Vec::new();

    // Directories come from disk, not the file inventory: empty
    // directories have no inventory entries at all.
    let dirs = match collect_directories(&tree.root) {
        Ok(dirs) => dirs,
        Err(message) => {
            return vec![RuleViolation::new(
                code::DIRECTORY_STRUCTURE_VALIDATION_FAILED,
                rule,
                message,
            )];
        }
    };

    let missing: Vec<String> = required
        .iter()
        .filter(|(_, matcher)| !dirs.iter().any(|d| matcher.is_match(&d.path)))
        .map(|(pattern, _)| pattern.clone())
        .collect();
    if !missing.is_empty() {
        violations.push(
            RuleViolation::new(
                code::MISSING_REQUIRED_DIRECTORIES,
                rule,
                format!("{} required director(y/ies) missing", missing.len()),
            )
            .with_patterns(missing),
        );
    }

    let mut forbidden_hits = BTreeSet::new();
    let mut forbidden_patterns = Vec::new();
    for (pattern, matcher) in forbidden {
        let hits: Vec<String> = dirs
            .iter()
            .filter(|d| matcher.is_match(&d.path))
            .map(|d| d.path.display().to_string())
            .collect();
        if !hits.is_empty() {
            forbidden_patterns.push(pattern.clone());
            forbidden_hits.extend(hits);
        }
    }
    if !forbidden_patterns.is_empty() {
        violations.push(
            RuleViolation::new(
                code::FORBIDDEN_DIRECTORIES_FOUND,
                rule,
                format!("{} forbidden director(y/ies) present", forbidden_hits.len()),
            )
            .with_paths(forbidden_hits.into_iter().collect())
            .with_patterns(forbidden_patterns),
        );
    }

    if let Some(limit) = max_depth {
        let too_deep: Vec<String> = dirs
            .iter()
            .filter(|d| d.depth > limit)
            .map(|d| d.path.display().to_string())
            .collect();
        if !too_deep.is_empty() {
            violations.push(
                RuleViolation::new(
                    code::DIRECTORY_DEPTH_EXCEEDED,
                    rule,
                    format!("director(y/ies) deeper than {limit} edge(s) from the root"),
                )
                .with_paths(too_deep),
            );
        }
    }

    if !allow_empty_dirs {
        let empty: Vec<String> = dirs
            .iter()
            .filter(|d| d.entry_count == 0)
            .map(|d| d.path.display().to_string())
            .collect();
        if !empty.is_empty() {
            violations.push(
                RuleViolation::new(
                    code::EMPTY_DIRECTORIES_FOUND,
                    rule,
                    format!("{} empty director(y/ies) present", empty.len()),
                )
                .with_paths(empty),
            );
        }
    }

    violations
}

struct DirEntry {
    path: std::path::PathBuf,
    /// Edges from the tree root.
    depth: usize,
    entry_count: usize,
}

fn collect_directories(root: &Path) -> Result<Vec<DirEntry>, String> {
    let mut dirs = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && matches!(e.file_name().to_str(), Some(".git" | ".hg" | ".svn")))
        });
    for entry in walker {
        let entry = entry.map_err(|e| format!("walk of {} failed: {e}", root.display()))?;
        if !entry.file_type().is_dir() || entry.depth() == 0 {
            continue;
        }
        let entry_count = std::fs::read_dir(entry.path())
            .map_err(|e| format!("read_dir of {} failed: {e}", entry.path().display()))?
            .count();
        dirs.push(DirEntry {
            path: entry
                .path()
                .strip_prefix(root)
                .expect("walk entries live under the root")
                .to_path_buf(),
            depth: entry.depth(),
            entry_count,
        });
    }
    Ok(dirs)
}
