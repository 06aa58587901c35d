//! Binary codec for stored payloads.
//!
//! Values in the fingerprint store use a length-prefixed little-endian
//! layout with fixed field order, so independent implementations can read
//! each other's stores:
//!
//! - counts and byte lengths are `u32`, hashes `u64`, spans/positions `u32`;
//! - strings are UTF-8, prefixed by a `u32` byte length;
//! - every payload starts with a `u16` codec version.
//!
//! Token-stream payloads are additionally zstd-compressed on disk; the
//! decoder sniffs the zstd magic bytes, so uncompressed payloads from
//! older writers still load.

use crate::fingerprint::{
    FileFingerprints, Fingerprint, FingerprintSet, MatchRegion, SimilarityResult,
};
use crate::token::{Span, Token, TokenKind, TokenStream};
use chrono::{DateTime, Utc};
use std::io::Read as _;

/// Version of the value layout. Bumping it invalidates existing stores.
pub const CODEC_VERSION: u16 = 1;

/// Zstd magic bytes: 0x28 0xB5 0x2F 0xFD.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Decoding failures. Encoding is infallible.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload truncated at byte {0}")]
    UnexpectedEof(usize),
    #[error("unsupported codec version {0}")]
    UnsupportedVersion(u16),
    #[error("unknown token kind tag {0}")]
    UnknownKindTag(u8),
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
    #[error("{0} trailing byte(s) after payload")]
    TrailingBytes(usize),
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),
    #[error("zstd decompression failed: {0}")]
    Decompress(String),
}

// ─── primitive writers/readers ──────────────────────────────────────────

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_span(buf: &mut Vec<u8>, span: Span) {
    buf.extend_from_slice(&span.start.to_le_bytes());
    buf.extend_from_slice(&span.end.to_le_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or(CodecError::UnexpectedEof(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn str(&mut self) -> Result<String, CodecError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    fn span(&mut self) -> Result<Span, CodecError> {
        Ok(Span::new(self.u32()?, self.u32()?))
    }

    fn version(&mut self) -> Result<(), CodecError> {
        let v = self.u16()?;
        if v != CODEC_VERSION {
            return Err(CodecError::UnsupportedVersion(v));
        }
        Ok(())
    }

    fn finish(self) -> Result<(), CodecError> {
        let rest = self.buf.len() - self.pos;
        if rest != 0 {
            return Err(CodecError::TrailingBytes(rest));
        }
        Ok(())
    }
}

// ─── FingerprintSet ─────────────────────────────────────────────────────

pub fn encode_fingerprint_set(set: &FingerprintSet) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + set.total() * 24);
    buf.extend_from_slice(&CODEC_VERSION.to_le_bytes());
    put_str(&mut buf, &set.submission_id);
    put_str(&mut buf, &set.step_id);
    buf.extend_from_slice(&(set.files.len() as u32).to_le_bytes());
    for file in &set.files {
        put_str(&mut buf, &file.path);
        buf.extend_from_slice(&(file.fingerprints.len() as u32).to_le_bytes());
        for fp in &file.fingerprints {
            buf.extend_from_slice(&fp.hash.to_le_bytes());
            buf.extend_from_slice(&fp.position.to_le_bytes());
            put_span(&mut buf, fp.span);
        }
    }
    buf
}

pub fn decode_fingerprint_set(bytes: &[u8]) -> Result<FingerprintSet, CodecError> {
    let mut r = Reader::new(bytes);
    r.version()?;
    let submission_id = r.str()?;
    let step_id = r.str()?;
    let file_count = r.u32()? as usize;
    let mut files = Vec::with_capacity(file_count);
    for _ in 0..file_count {
        let path = r.str()?;
        let fp_count = r.u32()? as usize;
        let mut fingerprints = Vec::with_capacity(fp_count);
        for _ in 0..fp_count {
            fingerprints.push(Fingerprint {
                hash: r.u64()?,
                position: r.u32()?,
                span: r.span()?,
            });
        }
        files.push(FileFingerprints { path, fingerprints });
    }
    r.finish()?;
    Ok(FingerprintSet {
        submission_id,
        step_id,
        files,
    })
}

// ─── TokenStream ────────────────────────────────────────────────────────

pub fn encode_token_stream(stream: &TokenStream) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + stream.tokens.len() * 16);
    buf.extend_from_slice(&CODEC_VERSION.to_le_bytes());
    put_str(&mut buf, &stream.path);
    put_str(&mut buf, &stream.language);
    buf.extend_from_slice(&(stream.tokens.len() as u32).to_le_bytes());
    for token in &stream.tokens {
        buf.push(token.kind.tag());
        put_str(&mut buf, &token.lexeme);
        put_span(&mut buf, token.span);
    }
    // Token streams are the largest payloads; compress them on disk.
    zstd::encode_all(&buf[..], 3).unwrap_or(buf)
}

pub fn decode_token_stream(bytes: &[u8]) -> Result<TokenStream, CodecError> {
    let plain: Vec<u8>;
    let payload = if bytes.len() >= 4 && bytes[..4] == ZSTD_MAGIC {
        let mut decoder =
            zstd::Decoder::new(bytes).map_err(|e| CodecError::Decompress(e.to_string()))?;
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompress(e.to_string()))?;
        plain = out;
        &plain[..]
    } else {
        bytes
    };

    let mut r = Reader::new(payload);
    r.version()?;
    let path = r.str()?;
    let language = r.str()?;
    let token_count = r.u32()? as usize;
    let mut tokens = Vec::with_capacity(token_count);
    for _ in 0..token_count {
        let tag = r.u8()?;
        let kind = TokenKind::from_tag(tag).ok_or(CodecError::UnknownKindTag(tag))?;
        let lexeme = r.str()?;
        let span = r.span()?;
        tokens.push(Token { kind, lexeme, span });
    }
    r.finish()?;
    Ok(TokenStream {
        path,
        language,
        tokens,
    })
}

// ─── SimilarityResult ───────────────────────────────────────────────────

pub fn encode_similarity_result(result: &SimilarityResult) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + result.regions.len() * 48);
    buf.extend_from_slice(&CODEC_VERSION.to_le_bytes());
    put_str(&mut buf, &result.id);
    put_str(&mut buf, &result.submission_a);
    put_str(&mut buf, &result.submission_b);
    put_str(&mut buf, &result.step_id);
    buf.extend_from_slice(&result.score.to_bits().to_le_bytes());
    let flags = u8::from(result.low_confidence) | (u8::from(result.truncated) << 1);
    buf.push(flags);
    buf.extend_from_slice(&result.created_at.timestamp_millis().to_le_bytes());
    buf.extend_from_slice(&(result.regions.len() as u32).to_le_bytes());
    for region in &result.regions {
        buf.extend_from_slice(&region.hash.to_le_bytes());
        put_str(&mut buf, &region.a_file);
        put_span(&mut buf, region.a_span);
        put_str(&mut buf, &region.b_file);
        put_span(&mut buf, region.b_span);
        buf.extend_from_slice(&region.token_length.to_le_bytes());
    }
    buf
}

pub fn decode_similarity_result(bytes: &[u8]) -> Result<SimilarityResult, CodecError> {
    let mut r = Reader::new(bytes);
    r.version()?;
    let id = r.str()?;
    let submission_a = r.str()?;
    let submission_b = r.str()?;
    let step_id = r.str()?;
    let score = f64::from_bits(r.u64()?);
    let flags = r.u8()?;
    let millis = r.i64()?;
    let created_at: DateTime<Utc> = DateTime::from_timestamp_millis(millis)
        .ok_or(CodecError::InvalidTimestamp(millis))?;
    let region_count = r.u32()? as usize;
    let mut regions = Vec::with_capacity(region_count);
    for _ in 0..region_count {
        regions.push(MatchRegion {
            hash: r.u64()?,
            a_file: r.str()?,
            a_span: r.span()?,
            b_file: r.str()?,
            b_span: r.span()?,
            token_length: r.u32()?,
        });
    }
    r.finish()?;
    Ok(SimilarityResult {
        id,
        submission_a,
        submission_b,
        step_id,
        score,
        low_confidence: flags & 0b01 != 0,
        truncated: flags & 0b10 != 0,
        regions,
        created_at,
    })
}
