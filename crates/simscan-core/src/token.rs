//! Canonical tokens: the alphabet fed to k-gram hashing.
//!
//! Tokenizers collapse every identifier to `IDENT`, every numeric literal
//! to `NUM`, and every string/char literal to `STR` before emission, so
//! renaming and literal edits do not change the stream. Keywords,
//! operators, and punctuation keep their verbatim lexeme. Whitespace and
//! comments never reach a stream.

use serde::{Deserialize, Serialize};

/// Canonical lexeme for identifier-class tokens.
pub const IDENT_LEXEME: &str = "IDENT";
/// Canonical lexeme for numeric literals.
pub const NUM_LEXEME: &str = "NUM";
/// Canonical lexeme for string and char literals.
pub const STR_LEXEME: &str = "STR";

/// Separator byte terminating each token in the canonical encoding.
/// ASCII unit separator; cannot appear in a lexeme, which is printable.
const TOKEN_SEPARATOR: u8 = 0x1F;

/// Byte range of the original lexeme in its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both inputs.
    pub fn union(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(self) -> bool {
        self.end <= self.start
    }
}

/// Closed set of token kinds shared by every language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Ident,
    Keyword,
    Number,
    Str,
    Op,
    Punct,
}

impl TokenKind {
    /// Tag byte used by the canonical encoding. Part of the store schema
    /// version; renumbering invalidates existing stores.
    pub fn tag(self) -> u8 {
        match self {
            Self::Ident => 0,
            Self::Keyword => 1,
            Self::Number => 2,
            Self::Str => 3,
            Self::Op => 4,
            Self::Punct => 5,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Ident),
            1 => Some(Self::Keyword),
            2 => Some(Self::Number),
            3 => Some(Self::Str),
            4 => Some(Self::Op),
            5 => Some(Self::Punct),
            _ => None,
        }
    }
}

/// One canonical token: kind, canonical lexeme, and original byte span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
        }
    }

    /// An identifier-class token, lexeme collapsed to `IDENT`.
    pub fn ident(span: Span) -> Self {
        Self::new(TokenKind::Ident, IDENT_LEXEME, span)
    }

    /// A numeric literal, lexeme collapsed to `NUM`.
    pub fn number(span: Span) -> Self {
        Self::new(TokenKind::Number, NUM_LEXEME, span)
    }

    /// A string/char literal, lexeme collapsed to `STR`.
    pub fn string(span: Span) -> Self {
        Self::new(TokenKind::Str, STR_LEXEME, span)
    }

    /// Append the canonical byte encoding: `tag ‖ lexeme ‖ 0x1F`.
    ///
    /// This is the exact byte sequence fed to the rolling hash, so it is
    /// fixed across implementations and folded into the schema version.
    pub fn encode_canonical(&self, buf: &mut Vec<u8>) {
        buf.push(self.kind.tag());
        buf.extend_from_slice(self.lexeme.as_bytes());
        buf.push(TOKEN_SEPARATOR);
    }

    /// Decode one canonical token from the front of `bytes`.
    ///
    /// Returns the decoded (kind, lexeme) and the remaining bytes. Spans
    /// are not part of the canonical encoding; they travel in the stored
    /// stream codec instead.
    pub fn decode_canonical(bytes: &[u8]) -> Option<(TokenKind, String, &[u8])> {
        let (&tag, rest) = bytes.split_first()?;
        let kind = TokenKind::from_tag(tag)?;
        let sep = rest.iter().position(|&b| b == TOKEN_SEPARATOR)?;
        let lexeme = std::str::from_utf8(&rest[..sep]).ok()?.to_string();
        Some((kind, lexeme, &rest[sep + 1..]))
    }
}

/// Ordered canonical tokens for one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStream {
    /// Path relative to the tree root, `/`-separated.
    pub path: String,
    /// Language tag assigned by the classifier (e.g. `python`, `fallback`).
    pub language: String,
    pub tokens: Vec<Token>,
}

impl TokenStream {
    pub fn new(path: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: language.into(),
            tokens: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_roundtrip() {
        let tokens = [
            Token::ident(Span::new(0, 7)),
            Token::new(TokenKind::Keyword, "def", Span::new(8, 11)),
            Token::number(Span::new(12, 15)),
            Token::string(Span::new(16, 24)),
            Token::new(TokenKind::Op, "+=", Span::new(25, 27)),
            Token::new(TokenKind::Punct, "(", Span::new(27, 28)),
        ];

        let mut buf = Vec::new();
        for t in &tokens {
            t.encode_canonical(&mut buf);
        }

        let mut rest: &[u8] = &buf;
        for t in &tokens {
            let (kind, lexeme, tail) = Token::decode_canonical(rest).expect("decodes");
            assert_eq!(kind, t.kind);
            assert_eq!(lexeme, t.lexeme);
            rest = tail;
        }
        assert!(rest.is_empty());
    }

    #[test]
    fn test_encoding_distinguishes_kinds_with_same_lexeme() {
        // A keyword "in" and a hypothetical operator "in" must hash apart.
        let a = Token::new(TokenKind::Keyword, "in", Span::new(0, 2));
        let b = Token::new(TokenKind::Op, "in", Span::new(0, 2));
        let mut ba = Vec::new();
        let mut bb = Vec::new();
        a.encode_canonical(&mut ba);
        b.encode_canonical(&mut bb);
        assert_ne!(ba, bb);
    }

    #[test]
    fn test_span_union_and_len() {
        let s = Span::new(4, 10).union(Span::new(8, 20));
        assert_eq!(s, Span::new(4, 20));
        assert_eq!(s.len(), 16);
        assert!(!s.is_empty());
        assert!(Span::new(5, 5).is_empty());
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        assert!(Token::decode_canonical(&[9, b'x', 0x1F]).is_none());
    }
}
