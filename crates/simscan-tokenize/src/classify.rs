//! Per-file classification: language tag, fallback, or excluded.

use crate::languages::Language;
use std::path::Path;

/// How much of a file's head the classifier inspects.
pub const SNIFF_BYTES: usize = 4096;

/// NUL-byte ratio above which a file is treated as binary.
const BINARY_NUL_RATIO: f64 = 0.01;

/// Classifier decision for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Tokenize with the language's tree-sitter grammar.
    Source(Language),
    /// Text without a grammar; tokenize with the fallback lexer.
    Fallback,
    /// Excluded from the pipeline entirely.
    Binary,
    /// Excluded: larger than the per-file byte cap. Reported upstream.
    TooLarge,
}

/// Classify a file from its path, the first [`SNIFF_BYTES`] of content,
/// and its total size.
pub fn classify_file(
    path: &Path,
    head: &[u8],
    size: u64,
    per_file_byte_cap: u64,
) -> Classification {
    if size > per_file_byte_cap {
        return Classification::TooLarge;
    }
    if looks_binary(head) {
        return Classification::Binary;
    }

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        // Ambiguous: Objective-C vs MATLAB. Objective-C is a C superset,
        // so its files go to the C grammar; MATLAB has no grammar and
        // takes the fallback lexer.
        "m" => {
            if looks_like_objective_c(head) {
                Classification::Source(Language::C)
            } else {
                Classification::Fallback
            }
        }
        "h" => {
            if looks_like_cpp(head) {
                Classification::Source(Language::Cpp)
            } else {
                Classification::Source(Language::C)
            }
        }
        "" => {
            // Extensionless: a shebang can still name an interpreter.
            match shebang_language(head) {
                Some(lang) => Classification::Source(lang),
                None => Classification::Fallback,
            }
        }
        _ => match Language::from_extension(ext) {
            Some(lang) => Classification::Source(lang),
            None => Classification::Fallback,
        },
    }
}

/// More than 1% NUL bytes in the sniffed head means binary.
fn looks_binary(head: &[u8]) -> bool {
    if head.is_empty() {
        return false;
    }
    let nuls = head.iter().filter(|&&b| b == 0).count();
    (nuls as f64) / (head.len() as f64) > BINARY_NUL_RATIO
}

/// Objective-C markers that never open a MATLAB script.
fn looks_like_objective_c(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    [
        "#import",
        "#include",
        "@interface",
        "@implementation",
        "@protocol",
        "@property",
        "@end",
        "@autoreleasepool",
    ]
    .iter()
    .any(|marker| text.contains(marker))
}

/// C++ markers that never appear in C headers.
fn looks_like_cpp(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    ["namespace ", "template<", "template <", "class ", "::", "#include <string>"]
        .iter()
        .any(|marker| text.contains(marker))
}

/// Map a `#!` interpreter line to a supported language.
fn shebang_language(head: &[u8]) -> Option<Language> {
    let text = std::str::from_utf8(head).ok()?;
    let first = text.lines().next()?;
    if !first.starts_with("#!") {
        return None;
    }
    if first.contains("python") {
        Some(Language::Python)
    } else if first.contains("bash") || first.contains("/sh") || first.contains("env sh") {
        Some(Language::Bash)
    } else if first.contains("ruby") {
        Some(Language::Ruby)
    } else if first.contains("node") {
        Some(Language::JavaScript)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_classification() {
        let c = classify_file(Path::new("src/main.py"), b"print('hi')\n", 12, 1 << 20);
        assert_eq!(c, Classification::Source(Language::Python));

        let c = classify_file(Path::new("notes.txt"), b"just words\n", 11, 1 << 20);
        assert_eq!(c, Classification::Fallback);
    }

    #[test]
    fn test_size_cap_wins() {
        let c = classify_file(Path::new("big.py"), b"print('hi')\n", 2 << 20, 1 << 20);
        assert_eq!(c, Classification::TooLarge);
    }

    #[test]
    fn test_binary_by_nul_ratio() {
        let mut head = vec![b'a'; 300];
        head.extend(std::iter::repeat_n(0u8, 10));
        let c = classify_file(Path::new("blob.dat"), &head, 310, 1 << 20);
        assert_eq!(c, Classification::Binary);

        // A lone NUL in a big head stays under 1%
        let mut head = vec![b'a'; 300];
        head.push(0);
        let c = classify_file(Path::new("odd.txt"), &head, 301, 1 << 20);
        assert_eq!(c, Classification::Fallback);
    }

    #[test]
    fn test_header_disambiguation() {
        let c = classify_file(
            Path::new("vec.h"),
            b"namespace math {\ntemplate<typename T> class Vec;\n}\n",
            48,
            1 << 20,
        );
        assert_eq!(c, Classification::Source(Language::Cpp));

        let c = classify_file(
            Path::new("list.h"),
            b"#include <stdlib.h>\nstruct node { int v; };\n",
            44,
            1 << 20,
        );
        assert_eq!(c, Classification::Source(Language::C));
    }

    #[test]
    fn test_dot_m_disambiguation() {
        let c = classify_file(
            Path::new("AppDelegate.m"),
            b"#import \"AppDelegate.h\"\n@implementation AppDelegate\n@end\n",
            57,
            1 << 20,
        );
        assert_eq!(c, Classification::Source(Language::C));

        let c = classify_file(
            Path::new("solve.m"),
            b"% gradient descent step\nfunction w = solve(X, y)\n  w = X \\ y;\nend\n",
            64,
            1 << 20,
        );
        assert_eq!(c, Classification::Fallback);
    }

    #[test]
    fn test_shebang_detection() {
        let c = classify_file(
            Path::new("deploy"),
            b"#!/usr/bin/env python3\nimport sys\n",
            34,
            1 << 20,
        );
        assert_eq!(c, Classification::Source(Language::Python));

        let c = classify_file(Path::new("run"), b"#!/bin/bash\nset -e\n", 19, 1 << 20);
        assert_eq!(c, Classification::Source(Language::Bash));
    }
}
