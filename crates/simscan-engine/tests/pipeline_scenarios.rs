use chrono::Utc;
use serde_json::json;
use simscan_core::config::PipelineOptions;
use simscan_core::types::{RunState, SourceLocator, SubmissionRef};
use simscan_engine::rules::RuleSpec;
use simscan_engine::run_pipeline;
use simscan_store::FingerprintStore;
use std::path::Path;

const MAIN_PY: &str = r#"
def bubble_sort(items):
    n = len(items)
    for i in range(n):
        for j in range(0, n - i - 1):
            if items[j] > items[j + 1]:
                items[j], items[j + 1] = items[j + 1], items[j]
    return items


def fib(limit):
    values = [0, 1]
    while len(values) < limit:
        values.append(values[-1] + values[-2])
    return values


def main():
    data = [9, 4, 7, 1, 8, 3]
    ordered = bubble_sort(data)
    series = fib(10)
    total = 0
    for value in series:
        if value % 2 == 0:
            total += value
        else:
            total -= 1
    print(ordered, series, total)


if __name__ == "__main__":
    main()
"#;

/// MAIN_PY with every identifier renamed.
const MAIN_PY_RENAMED: &str = r#"
def sink_order(entries):
    count = len(entries)
    for outer in range(count):
        for inner in range(0, count - outer - 1):
            if entries[inner] > entries[inner + 1]:
                entries[inner], entries[inner + 1] = entries[inner + 1], entries[inner]
    return entries


def sequence(bound):
    cells = [0, 1]
    while len(cells) < bound:
        cells.append(cells[-1] + cells[-2])
    return cells


def run():
    numbers = [9, 4, 7, 1, 8, 3]
    sorted_numbers = sink_order(numbers)
    chain = sequence(10)
    acc = 0
    for item in chain:
        if item % 2 == 0:
            acc += item
        else:
            acc -= 1
    print(sorted_numbers, chain, acc)


if __name__ == "__main__":
    run()
"#;

const FILE_A_PY: &str = r#"
class Matrix:
    def __init__(self, rows, cols):
        self.rows = rows
        self.cols = cols
        self.data = [[0] * cols for _ in range(rows)]

    def set(self, r, c, value):
        self.data[r][c] = value

    def trace(self):
        total = 0
        for i in range(min(self.rows, self.cols)):
            total += self.data[i][i]
        return total
"#;

const FILE_B_PY: &str = r#"
def histogram(words):
    counts = {}
    for word in words:
        key = word.strip().lower()
        counts[key] = counts.get(key, 0) + 1
    return counts
"#;

const UNRELATED_PY: &str = r#"
import json


def load_config(path):
    try:
        with open(path) as handle:
            raw = json.load(handle)
    except FileNotFoundError:
        return {}
    settings = {}
    for key, value in raw.items():
        if isinstance(value, str) and value.isdigit():
            settings[key] = int(value)
        else:
            settings[key] = value
    return settings


def merge(base, override):
    merged = dict(base)
    for key, value in override.items():
        current = merged.get(key)
        if isinstance(current, dict) and isinstance(value, dict):
            merged[key] = merge(current, value)
        else:
            merged[key] = value
    return merged


def describe(settings):
    lines = []
    for key in sorted(settings):
        lines.append("%s=%r" % (key, settings[key]))
    return "\n".join(lines)
"#;

fn submission(id: &str, step: &str, root: &Path) -> SubmissionRef {
    SubmissionRef {
        submission_id: id.to_string(),
        step_id: step.to_string(),
        group_id: "group-1".to_string(),
        project_id: "project-1".to_string(),
        source: SourceLocator::Local {
            path: root.to_path_buf(),
        },
        submitted_at: Utc::now(),
    }
}

fn write_tree(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
    dir
}

fn options() -> PipelineOptions {
    PipelineOptions::default()
}

#[test]
fn test_exact_clone_detection() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let options = options();

    let tree1 = write_tree(&[("main.py", MAIN_PY)]);
    let tree2 = write_tree(&[("main.py", MAIN_PY)]);

    let first = run_pipeline(
        &submission("s1", "step-1", tree1.path()),
        &[],
        &options,
        &store,
    );
    assert_eq!(first.state, RunState::Done);
    assert!(first.summaries.is_empty());

    let second = run_pipeline(
        &submission("s2", "step-1", tree2.path()),
        &[],
        &options,
        &store,
    );
    assert_eq!(second.state, RunState::Done);
    assert_eq!(second.summaries.len(), 1);
    let summary = &second.summaries[0];
    assert_eq!(summary.peer_submission_id, "s1");
    assert_eq!(summary.score, 1.0);
    assert!(!summary.low_confidence);
    // Score 1.0 clears the 0.7 alert threshold
    assert_eq!(second.alerts.len(), 1);

    // One region covering the whole file on each side
    let result = store.load_similarity("step-1", "s1", "s2").unwrap().unwrap();
    assert_eq!(result.regions.len(), 1);
    let region = &result.regions[0];
    assert_eq!(region.a_file, "main.py");
    assert_eq!(region.b_file, "main.py");
    assert_eq!(region.a_span, region.b_span);
}

#[test]
fn test_identifier_rename_scores_one() {
    let store = FingerprintStore::open_in_memory(3, 5).unwrap();
    let options = PipelineOptions {
        k_gram_size: 3,
        window_size: 5,
        ..Default::default()
    };

    let tree1 = write_tree(&[("sol.py", "def f(x): return x+1\n")]);
    let tree2 = write_tree(&[("sol.py", "def g(y): return y+1\n")]);

    run_pipeline(&submission("s1", "step-1", tree1.path()), &[], &options, &store);
    let outcome = run_pipeline(
        &submission("s2", "step-1", tree2.path()),
        &[],
        &options,
        &store,
    );
    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.summaries[0].score, 1.0);
}

#[test]
fn test_full_rename_of_larger_program_scores_one() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let options = options();

    let tree1 = write_tree(&[("main.py", MAIN_PY)]);
    let tree2 = write_tree(&[("main.py", MAIN_PY_RENAMED)]);

    run_pipeline(&submission("s1", "step-1", tree1.path()), &[], &options, &store);
    let outcome = run_pipeline(
        &submission("s2", "step-1", tree2.path()),
        &[],
        &options,
        &store,
    );
    assert_eq!(outcome.summaries[0].score, 1.0);
    assert!(!outcome.summaries[0].low_confidence);
}

#[test]
fn test_partial_copy_is_detected_with_moderate_score() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let options = options();

    let tree1 = write_tree(&[("a.py", FILE_A_PY), ("b.py", FILE_B_PY)]);
    let tree2 = write_tree(&[("b.py", FILE_B_PY), ("other.py", UNRELATED_PY)]);

    run_pipeline(&submission("s1", "step-1", tree1.path()), &[], &options, &store);
    let outcome = run_pipeline(
        &submission("s2", "step-1", tree2.path()),
        &[],
        &options,
        &store,
    );

    let summary = &outcome.summaries[0];
    assert!(
        summary.score > 0.05 && summary.score < 0.6,
        "partial copy should score moderately, got {}",
        summary.score,
    );
    assert!(!summary.low_confidence);
    assert!(!summary.truncated);

    // The dominant region aligns the copied file on both sides
    let result = store.load_similarity("step-1", "s1", "s2").unwrap().unwrap();
    let longest = result
        .regions
        .iter()
        .max_by_key(|r| r.token_length)
        .unwrap();
    assert_eq!(longest.a_file, "b.py");
    assert_eq!(longest.b_file, "b.py");
}

#[test]
fn test_reformatting_only_scores_one() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let options = options();

    let original = "function area(w, h) { return w * h; }\nfunction perim(w, h) { return 2 * (w + h); }\nmodule.exports = { area, perim };\n";
    let reformatted = "// geometry helpers\nfunction area(w, h) {\n    return w * h;\n}\n\n/* perimeter */\nfunction perim(w, h) {\n    return 2 * (w + h);\n}\n\nmodule.exports = {\n    area,\n    perim\n};\n";

    let tree1 = write_tree(&[("geo.js", original)]);
    let tree2 = write_tree(&[("geo.js", reformatted)]);

    run_pipeline(&submission("s1", "step-1", tree1.path()), &[], &options, &store);
    let outcome = run_pipeline(
        &submission("s2", "step-1", tree2.path()),
        &[],
        &options,
        &store,
    );
    assert_eq!(outcome.summaries[0].score, 1.0);
}

#[test]
fn test_rule_gate_blocks_without_fingerprints() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let options = options();

    let tree = write_tree(&[("main.py", MAIN_PY)]);
    let rules = vec![RuleSpec {
        name: "file_presence".to_string(),
        params: json!({"must_exist": ["README*"]}),
    }];

    let outcome = run_pipeline(
        &submission("s1", "step-1", tree.path()),
        &rules,
        &options,
        &store,
    );
    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.error.unwrap().code, "missingRequiredFiles");
    assert!(!outcome.rule_results[0].passed);

    // Nothing was persisted
    assert!(store.load_fingerprint_set("step-1", "s1").unwrap().is_none());
    assert!(store.step_submissions("step-1").unwrap().is_empty());
}

#[test]
fn test_gate_failure_reports_all_rules() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let tree = write_tree(&[("main.py", MAIN_PY)]);
    let rules = vec![
        RuleSpec {
            name: "file_presence".to_string(),
            params: json!({"must_exist": ["README*"]}),
        },
        RuleSpec {
            name: "directory_structure".to_string(),
            params: json!({"required_directories": ["src"]}),
        },
    ];

    let outcome = run_pipeline(
        &submission("s1", "step-1", tree.path()),
        &rules,
        &options(),
        &store,
    );
    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.rule_results.len(), 2);
    assert!(outcome.rule_results.iter().all(|r| !r.passed));
}

#[test]
fn test_deadline_leaves_no_partial_artifacts() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let options = PipelineOptions {
        deadline_ms: 0,
        ..Default::default()
    };

    let tree = write_tree(&[
        ("a.py", MAIN_PY),
        ("b.py", FILE_A_PY),
        ("c.py", FILE_B_PY),
    ]);
    let outcome = run_pipeline(
        &submission("s1", "step-1", tree.path()),
        &[],
        &options,
        &store,
    );
    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.error.unwrap().code, "deadlineExceeded");
    assert!(store.load_fingerprint_set("step-1", "s1").unwrap().is_none());
}

#[test]
fn test_rerun_is_idempotent() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let options = options();

    let tree1 = write_tree(&[("main.py", MAIN_PY)]);
    let tree2 = write_tree(&[("main.py", MAIN_PY_RENAMED)]);

    run_pipeline(&submission("s1", "step-1", tree1.path()), &[], &options, &store);
    run_pipeline(&submission("s2", "step-1", tree2.path()), &[], &options, &store);
    let first = store.load_similarity("step-1", "s1", "s2").unwrap().unwrap();

    // Re-running s2 overwrites its artifacts and reproduces the result
    run_pipeline(&submission("s2", "step-1", tree2.path()), &[], &options, &store);
    let second = store.load_similarity("step-1", "s1", "s2").unwrap().unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.score, second.score);
    assert_eq!(first.regions, second.regions);
    assert_eq!(store.step_submissions("step-1").unwrap(), vec!["s1", "s2"]);
}

#[test]
fn test_empty_tree_scores_zero_against_peers() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let options = options();

    let full = write_tree(&[("main.py", MAIN_PY)]);
    run_pipeline(&submission("s1", "step-1", full.path()), &[], &options, &store);

    let empty = tempfile::tempdir().unwrap();
    let outcome = run_pipeline(
        &submission("s2", "step-1", empty.path()),
        &[],
        &options,
        &store,
    );
    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.summaries[0].score, 0.0);
    assert!(outcome.alerts.is_empty());

    let set = store.load_fingerprint_set("step-1", "s2").unwrap().unwrap();
    assert_eq!(set.total(), 0);
}

#[test]
fn test_binary_files_are_skipped() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let tree = write_tree(&[("main.py", MAIN_PY)]);
    // A binary blob next to the source file
    let blob: Vec<u8> = (0..512u32).flat_map(|i| [(i % 256) as u8, 0, 0]).collect();
    std::fs::write(tree.path().join("data.bin"), &blob).unwrap();

    let outcome = run_pipeline(
        &submission("s1", "step-1", tree.path()),
        &[],
        &options(),
        &store,
    );
    assert_eq!(outcome.state, RunState::Done);

    let set = store.load_fingerprint_set("step-1", "s1").unwrap().unwrap();
    assert!(set.files.iter().all(|f| f.path != "data.bin"));
}

#[test]
fn test_oversized_file_is_reported_and_excluded() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let options = PipelineOptions {
        per_file_byte_cap: 64,
        ..Default::default()
    };

    let big = "x = 1\n".repeat(50);
    let tree = write_tree(&[("small.py", "y = 2\n"), ("big.py", &big)]);

    let outcome = run_pipeline(
        &submission("s1", "step-1", tree.path()),
        &[],
        &options,
        &store,
    );
    assert_eq!(outcome.state, RunState::Done);
    assert!(
        outcome
            .warnings
            .iter()
            .any(|w| w.file.as_deref() == Some("big.py"))
    );

    let set = store.load_fingerprint_set("step-1", "s1").unwrap().unwrap();
    assert!(set.files.iter().all(|f| f.path != "big.py"));
}

#[test]
fn test_summaries_are_ranked_by_score() {
    let store = FingerprintStore::open_in_memory(5, 7).unwrap();
    let options = options();

    let clone_tree = write_tree(&[("main.py", MAIN_PY)]);
    let distinct_tree = write_tree(&[("other.py", UNRELATED_PY)]);
    let probe_tree = write_tree(&[("main.py", MAIN_PY)]);

    run_pipeline(&submission("s1", "step-1", clone_tree.path()), &[], &options, &store);
    run_pipeline(&submission("s2", "step-1", distinct_tree.path()), &[], &options, &store);
    let outcome = run_pipeline(
        &submission("s3", "step-1", probe_tree.path()),
        &[],
        &options,
        &store,
    );

    assert_eq!(outcome.summaries.len(), 2);
    assert_eq!(outcome.summaries[0].peer_submission_id, "s1");
    assert_eq!(outcome.summaries[0].score, 1.0);
    assert!(outcome.summaries[1].score < outcome.summaries[0].score);
}
