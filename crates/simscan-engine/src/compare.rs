//! Pairwise comparison of fingerprint sets.
//!
//! The score is containment-style: shared unique hashes over the larger
//! side's unique count, which resists padding by either side. Match
//! regions come from greedy extension of aligned shared fingerprints,
//! deduplicated when they overlap by more than half of the shorter
//! region.

use chrono::Utc;
use simscan_core::config::PipelineOptions;
use simscan_core::fingerprint::{FingerprintSet, MatchRegion, SimilarityResult};
use std::collections::{BTreeSet, HashMap};

/// Comparator limits, taken from the pipeline options.
#[derive(Debug, Clone, Copy)]
pub struct CompareConfig {
    /// Ceiling on examined occurrence pairs during region extraction.
    pub max_region_pairs: u64,
    /// Unique-fingerprint floor below which results are low-confidence.
    pub low_confidence_floor: usize,
}

impl From<&PipelineOptions> for CompareConfig {
    fn from(options: &PipelineOptions) -> Self {
        Self {
            max_region_pairs: options.max_region_pairs,
            low_confidence_floor: options.low_confidence_floor,
        }
    }
}

/// One side of a comparison, with per-file fingerprint sequences in
/// winnowing order and an occurrence index across all files.
struct Side<'a> {
    set: &'a FingerprintSet,
    /// hash → (file index, index into that file's fingerprint list)
    occurrences: HashMap<u64, Vec<(usize, usize)>>,
}

impl<'a> Side<'a> {
    fn new(set: &'a FingerprintSet) -> Self {
        let mut occurrences: HashMap<u64, Vec<(usize, usize)>> = HashMap::new();
        for (file_idx, file) in set.files.iter().enumerate() {
            for (fp_idx, fp) in file.fingerprints.iter().enumerate() {
                occurrences
                    .entry(fp.hash)
                    .or_default()
                    .push((file_idx, fp_idx));
            }
        }
        Self { set, occurrences }
    }

    fn unique(&self) -> usize {
        self.occurrences.len()
    }

    fn hash_at(&self, file_idx: usize, fp_idx: usize) -> Option<u64> {
        self.set.files[file_idx]
            .fingerprints
            .get(fp_idx)
            .map(|fp| fp.hash)
    }
}

/// A matched run before span reconstruction: inclusive fingerprint
/// index ranges on both sides.
struct RawRegion {
    hash: u64,
    a_file: usize,
    a_start: usize,
    a_end: usize,
    b_file: usize,
    b_start: usize,
    b_end: usize,
    len: usize,
}

/// Compare two fingerprint sets of the same assignment step.
///
/// Output is deterministic given identical inputs: the pair is put in
/// canonical (lexicographic) order, shared hashes are visited in sorted
/// order, and ties during deduplication prefer earlier positions.
pub fn compare(x: &FingerprintSet, y: &FingerprintSet, config: &CompareConfig) -> SimilarityResult {
    let (a_set, b_set) = if x.submission_id <= y.submission_id {
        (x, y)
    } else {
        (y, x)
    };
    let a = Side::new(a_set);
    let b = Side::new(b_set);

    let shared: BTreeSet<u64> = a
        .occurrences
        .keys()
        .filter(|h| b.occurrences.contains_key(h))
        .copied()
        .collect();

    let denominator = a.unique().max(b.unique());
    let score = if denominator == 0 {
        0.0
    } else {
        shared.len() as f64 / denominator as f64
    };

    let (regions, truncated) = if shared.is_empty() {
        (Vec::new(), false)
    } else {
        extract_regions(&a, &b, &shared, config.max_region_pairs)
    };

    let low_confidence = a.unique() < config.low_confidence_floor
        || b.unique() < config.low_confidence_floor;

    SimilarityResult {
        id: format!(
            "{}:{}:{}",
            a_set.step_id, a_set.submission_id, b_set.submission_id
        ),
        submission_a: a_set.submission_id.clone(),
        submission_b: b_set.submission_id.clone(),
        step_id: a_set.step_id.clone(),
        score,
        low_confidence,
        truncated,
        regions,
        created_at: Utc::now(),
    }
}

fn extract_regions(
    a: &Side<'_>,
    b: &Side<'_>,
    shared: &BTreeSet<u64>,
    max_pairs: u64,
) -> (Vec<MatchRegion>, bool) {
    let mut raw = Vec::new();
    let mut budget = max_pairs;
    let mut truncated = false;

    'outer: for &hash in shared {
        for &(a_file, a_idx) in &a.occurrences[&hash] {
            for &(b_file, b_idx) in &b.occurrences[&hash] {
                if budget == 0 {
                    truncated = true;
                    break 'outer;
                }
                budget -= 1;

                // Only start at run heads; continuations are covered by
                // the pairing that starts one fingerprint earlier.
                if a_idx > 0
                    && b_idx > 0
                    && a.hash_at(a_file, a_idx - 1) == b.hash_at(b_file, b_idx - 1)
                {
                    continue;
                }

                let (mut a_end, mut b_end, mut len) = (a_idx, b_idx, 1usize);
                loop {
                    let next_a = a.hash_at(a_file, a_end + 1);
                    let next_b = b.hash_at(b_file, b_end + 1);
                    match (next_a, next_b) {
                        (Some(ha), Some(hb)) if ha == hb => {
                            a_end += 1;
                            b_end += 1;
                            len += 1;
                        }
                        _ => break,
                    }
                }

                raw.push(RawRegion {
                    hash,
                    a_file,
                    a_start: a_idx,
                    a_end,
                    b_file,
                    b_start: b_idx,
                    b_end,
                    len,
                });
            }
        }
    }

    (dedup_regions(a, b, raw), truncated)
}

/// Keep the longest regions; drop any later region overlapping a kept
/// one by more than 50% of the shorter region's length on either side.
fn dedup_regions(a: &Side<'_>, b: &Side<'_>, mut raw: Vec<RawRegion>) -> Vec<MatchRegion> {
    raw.sort_by(|p, q| {
        q.len
            .cmp(&p.len)
            .then(p.a_file.cmp(&q.a_file))
            .then(p.a_start.cmp(&q.a_start))
            .then(p.b_file.cmp(&q.b_file))
            .then(p.b_start.cmp(&q.b_start))
    });

    let mut kept_a: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
    let mut kept_b: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
    let mut kept = Vec::new();

    for region in raw {
        let dominated = |intervals: &HashMap<usize, Vec<(usize, usize)>>,
                         file: usize,
                         start: usize,
                         end: usize| {
            intervals.get(&file).is_some_and(|list| {
                list.iter().any(|&(s, e)| {
                    let overlap = end.min(e).saturating_sub(start.max(s)) + 1;
                    let overlaps = end.min(e) >= start.max(s);
                    let shorter = region.len.min(e - s + 1);
                    overlaps && overlap * 2 > shorter
                })
            })
        };
        if dominated(&kept_a, region.a_file, region.a_start, region.a_end)
            || dominated(&kept_b, region.b_file, region.b_start, region.b_end)
        {
            continue;
        }
        kept_a
            .entry(region.a_file)
            .or_default()
            .push((region.a_start, region.a_end));
        kept_b
            .entry(region.b_file)
            .or_default()
            .push((region.b_start, region.b_end));
        kept.push(region);
    }

    let mut regions: Vec<MatchRegion> = kept
        .into_iter()
        .map(|r| {
            let a_fps = &a.set.files[r.a_file].fingerprints;
            let b_fps = &b.set.files[r.b_file].fingerprints;
            MatchRegion {
                hash: r.hash,
                a_file: a.set.files[r.a_file].path.clone(),
                a_span: a_fps[r.a_start].span.union(a_fps[r.a_end].span),
                b_file: b.set.files[r.b_file].path.clone(),
                b_span: b_fps[r.b_start].span.union(b_fps[r.b_end].span),
                token_length: r.len as u32,
            }
        })
        .collect();

    regions.sort_by(|p, q| {
        p.a_file
            .cmp(&q.a_file)
            .then(p.a_span.start.cmp(&q.a_span.start))
            .then(p.b_file.cmp(&q.b_file))
            .then(p.b_span.start.cmp(&q.b_span.start))
    });
    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use simscan_core::fingerprint::{FileFingerprints, Fingerprint};
    use simscan_core::token::Span;

    fn config() -> CompareConfig {
        CompareConfig {
            max_region_pairs: 1_000_000,
            low_confidence_floor: 10,
        }
    }

    /// A set with one file whose fingerprint hashes follow `hashes`.
    fn set_of(submission: &str, hashes: &[u64]) -> FingerprintSet {
        let mut set = FingerprintSet::new(submission, "step-1");
        set.files.push(FileFingerprints {
            path: "main.py".to_string(),
            fingerprints: hashes
                .iter()
                .enumerate()
                .map(|(i, &hash)| Fingerprint {
                    hash,
                    position: i as u32,
                    span: Span::new(i as u32 * 10, i as u32 * 10 + 10),
                })
                .collect(),
        });
        set
    }

    #[test]
    fn test_identical_sets_score_one() {
        let hashes: Vec<u64> = (100..150).collect();
        let a = set_of("s1", &hashes);
        let b = set_of("s2", &hashes);
        let result = compare(&a, &b, &config());
        assert_eq!(result.score, 1.0);
        assert!(!result.low_confidence);
        assert!(!result.truncated);
        // One region covering the whole file on both sides
        assert_eq!(result.regions.len(), 1);
        let region = &result.regions[0];
        assert_eq!(region.token_length, 50);
        assert_eq!(region.a_span, Span::new(0, 500));
        assert_eq!(region.b_span, Span::new(0, 500));
    }

    #[test]
    fn test_disjoint_sets_score_zero() {
        let a = set_of("s1", &(0..40).collect::<Vec<u64>>());
        let b = set_of("s2", &(1000..1040).collect::<Vec<u64>>());
        let result = compare(&a, &b, &config());
        assert_eq!(result.score, 0.0);
        assert!(result.regions.is_empty());
    }

    #[test]
    fn test_empty_side_scores_zero() {
        let a = set_of("s1", &[]);
        let b = set_of("s2", &(0..20).collect::<Vec<u64>>());
        let result = compare(&a, &b, &config());
        assert_eq!(result.score, 0.0);
        assert!(result.regions.is_empty());
    }

    #[test]
    fn test_containment_score_uses_larger_side() {
        // b contains a's 20 hashes plus 60 of its own: 20 / 80
        let a = set_of("s1", &(0..20).collect::<Vec<u64>>());
        let mut all: Vec<u64> = (0..20).collect();
        all.extend(2000..2060);
        let b = set_of("s2", &all);
        let result = compare(&a, &b, &config());
        assert_eq!(result.score, 20.0 / 80.0);
        assert!(!result.regions.is_empty());
    }

    #[test]
    fn test_result_pair_is_canonical_regardless_of_argument_order() {
        let a = set_of("s-zeta", &(0..30).collect::<Vec<u64>>());
        let b = set_of("s-alpha", &(0..30).collect::<Vec<u64>>());
        let result = compare(&a, &b, &config());
        assert_eq!(result.submission_a, "s-alpha");
        assert_eq!(result.submission_b, "s-zeta");
        assert_eq!(result.id, "step-1:s-alpha:s-zeta");
    }

    #[test]
    fn test_deterministic_output() {
        let a = set_of("s1", &[1, 2, 3, 9, 9, 4, 5, 2, 3, 7]);
        let b = set_of("s2", &[8, 2, 3, 9, 1, 1, 4, 5, 2, 3]);
        let first = compare(&a, &b, &config());
        let second = compare(&a, &b, &config());
        assert_eq!(first.score, second.score);
        assert_eq!(first.regions, second.regions);
    }

    #[test]
    fn test_low_confidence_floor() {
        let a = set_of("s1", &[1, 2, 3]);
        let b = set_of("s2", &[1, 2, 4]);
        let result = compare(&a, &b, &config());
        assert!(result.low_confidence);
    }

    #[test]
    fn test_pair_ceiling_truncates_regions_not_score() {
        // The same hash everywhere explodes the occurrence pair count
        let a = set_of("s1", &[7; 40]);
        let b = set_of("s2", &[7; 40]);
        let tight = CompareConfig {
            max_region_pairs: 10,
            low_confidence_floor: 10,
        };
        let result = compare(&a, &b, &tight);
        assert!(result.truncated);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_partial_run_produces_aligned_region() {
        // Shared run of 5 in the middle of otherwise-disjoint sequences
        let mut a_hashes: Vec<u64> = (100..120).collect();
        let mut b_hashes: Vec<u64> = (200..220).collect();
        let shared: Vec<u64> = (900..905).collect();
        a_hashes.splice(5..5, shared.iter().copied());
        b_hashes.splice(12..12, shared.iter().copied());

        let a = set_of("s1", &a_hashes);
        let b = set_of("s2", &b_hashes);
        let result = compare(&a, &b, &config());
        assert_eq!(result.regions.len(), 1);
        let region = &result.regions[0];
        assert_eq!(region.token_length, 5);
        assert_eq!(region.hash, 900);
        // a-side run starts at index 5, b-side at index 12
        assert_eq!(region.a_span.start, 50);
        assert_eq!(region.b_span.start, 120);
    }

    #[test]
    fn test_overlapping_regions_keep_the_longer() {
        // a: X X X X X Y, b has the same 5-run twice; the two b-side
        // copies both align against the single a-side run. Dedup keeps
        // one region per b-side copy but collapses duplicate a-side
        // coverage beyond the 50% overlap rule.
        let run: Vec<u64> = (500..505).collect();
        let mut a_hashes: Vec<u64> = (10..30).collect();
        a_hashes.splice(3..3, run.iter().copied());
        let mut b_hashes: Vec<u64> = (40..60).collect();
        b_hashes.splice(2..2, run.iter().copied());
        b_hashes.splice(15..15, run.iter().copied());

        let a = set_of("s1", &a_hashes);
        let b = set_of("s2", &b_hashes);
        let result = compare(&a, &b, &config());
        // The a-side run is fully covered by the first kept region; the
        // second pairing overlaps it 100% on the a side and is dropped.
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].token_length, 5);
    }
}
