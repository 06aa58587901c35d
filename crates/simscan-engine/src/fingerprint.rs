//! Winnowing fingerprints over canonical token streams.
//!
//! Every token is first reduced to a 64-bit value by hashing its
//! canonical byte encoding; k-grams of token values are then combined
//! with a Rabin-Karp rolling hash, and the winnowing rule of
//! Schleimer-Wilber-Aiken selects the minimum hash of each sliding
//! window of `w` k-gram hashes (ties go to the rightmost position).
//! Any token substring of length ≥ w+k-1 shared between two documents
//! is guaranteed to produce at least one shared fingerprint.

use simscan_core::fingerprint::Fingerprint;
use simscan_core::token::{Token, TokenStream};

/// Polynomial base for the k-gram rolling hash. Arithmetic wraps mod
/// 2^64. Part of the store schema; changing it invalidates stores.
const HASH_BASE: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over one token's canonical byte encoding.
fn token_value(token: &Token) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut encoded = Vec::with_capacity(token.lexeme.len() + 2);
    token.encode_canonical(&mut encoded);
    let mut hash = FNV_OFFSET;
    for byte in encoded {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Rolling k-gram hashes of the stream's token values.
/// Empty when the stream has fewer than `k` tokens.
fn gram_hashes(tokens: &[Token], k: usize) -> Vec<u64> {
    if tokens.len() < k {
        return Vec::new();
    }
    let values: Vec<u64> = tokens.iter().map(token_value).collect();

    // base^(k-1), for removing the leftmost value when rolling.
    let base_pow = (0..k - 1).fold(1u64, |acc, _| acc.wrapping_mul(HASH_BASE));

    let mut hashes = Vec::with_capacity(values.len() - k + 1);
    let mut hash: u64 = 0;
    for value in &values[..k] {
        hash = hash.wrapping_mul(HASH_BASE).wrapping_add(*value);
    }
    hashes.push(hash);

    for i in k..values.len() {
        let left = values[i - k].wrapping_mul(base_pow);
        hash = hash
            .wrapping_sub(left)
            .wrapping_mul(HASH_BASE)
            .wrapping_add(values[i]);
        hashes.push(hash);
    }
    hashes
}

/// Winnow one token stream into its fingerprint list.
///
/// Streams shorter than `k` tokens produce no fingerprints. Streams
/// with fewer than `w` k-grams are treated as a single window, so every
/// non-trivial file yields at least one fingerprint.
pub fn fingerprint_stream(stream: &TokenStream, k: usize, w: usize) -> Vec<Fingerprint> {
    let tokens = &stream.tokens;
    let grams = gram_hashes(tokens, k);
    if grams.is_empty() {
        return Vec::new();
    }

    let mut fingerprints = Vec::new();
    let mut last_selected: Option<usize> = None;

    let window = w.min(grams.len());
    for start in 0..=(grams.len() - window) {
        // Rightmost minimum: <= keeps later equal hashes winning.
        let mut min_idx = start;
        for idx in start..start + window {
            if grams[idx] <= grams[min_idx] {
                min_idx = idx;
            }
        }
        if last_selected == Some(min_idx) {
            continue;
        }
        last_selected = Some(min_idx);
        fingerprints.push(Fingerprint {
            hash: grams[min_idx],
            position: min_idx as u32,
            span: tokens[min_idx]
                .span
                .union(tokens[min_idx + k - 1].span),
        });
    }
    fingerprints
}
