use criterion::{Criterion, criterion_group, criterion_main};
use simscan_core::fingerprint::{FileFingerprints, FingerprintSet};
use simscan_core::token::{Span, Token, TokenKind, TokenStream};
use simscan_engine::compare::{CompareConfig, compare};
use simscan_engine::fingerprint::fingerprint_stream;
use std::hint::black_box;

fn synthetic_stream(tokens: usize, seed: usize) -> TokenStream {
    let mut stream = TokenStream::new("bench.py", "python");
    for i in 0..tokens {
        let at = i as u32 * 6;
        let span = Span::new(at, at + 5);
        let token = match (i * 31 + seed) % 5 {
            0 => Token::ident(span),
            1 => Token::new(TokenKind::Keyword, ["if", "for", "while", "def"][(i + seed) % 4], span),
            2 => Token::number(span),
            3 => Token::new(TokenKind::Op, ["+", "-", "==", "*"][(i + seed) % 4], span),
            _ => Token::new(TokenKind::Punct, [";", "(", ")", ":"][(i + seed) % 4], span),
        };
        stream.tokens.push(token);
    }
    stream
}

fn set_from(stream: &TokenStream, id: &str) -> FingerprintSet {
    let mut set = FingerprintSet::new(id, "bench-step");
    set.files.push(FileFingerprints {
        path: stream.path.clone(),
        fingerprints: fingerprint_stream(stream, 5, 7),
    });
    set
}

fn bench_fingerprint(c: &mut Criterion) {
    let stream = synthetic_stream(10_000, 1);
    c.bench_function("winnow_10k_tokens", |b| {
        b.iter(|| fingerprint_stream(black_box(&stream), 5, 7));
    });
}

fn bench_compare(c: &mut Criterion) {
    let a = set_from(&synthetic_stream(10_000, 1), "bench-a");
    let b_set = set_from(&synthetic_stream(10_000, 2), "bench-b");
    let config = CompareConfig {
        max_region_pairs: 1_000_000,
        low_confidence_floor: 10,
    };
    c.bench_function("compare_10k_vs_10k", |b| {
        b.iter(|| compare(black_box(&a), black_box(&b_set), &config));
    });
}

criterion_group!(benches, bench_fingerprint, bench_compare);
criterion_main!(benches);
