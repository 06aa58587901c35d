//! Fallback tokenizer for files without a grammar.
//!
//! A whitespace/punctuation scanner that still applies the canonical
//! collapsing rules: words become `IDENT` (unless they are a known
//! keyword, which stays verbatim), digit runs become `NUM`, quoted
//! runs become `STR`. Operates on raw bytes so spans stay exact even
//! for files with stray non-UTF-8 content.

use crate::lexer::{LexError, Lexer};
use simscan_core::token::{Span, Token, TokenKind, TokenStream};

/// Language tag recorded on fallback streams.
pub const FALLBACK_TAG: &str = "fallback";

/// The grammar-less tokenizer. Never fails.
pub struct FallbackLexer;

impl Lexer for FallbackLexer {
    fn tokenize(&self, path: &str, source: &[u8]) -> Result<TokenStream, LexError> {
        let mut stream = TokenStream::new(path, FALLBACK_TAG);
        scan(source, &mut stream.tokens);
        Ok(stream)
    }

    fn language_tag(&self) -> &'static str {
        FALLBACK_TAG
    }
}

fn scan(source: &[u8], out: &mut Vec<Token>) {
    let mut i = 0usize;
    let n = source.len();

    while i < n {
        let b = source[i];
        match b {
            // Skip whitespace
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            // Single-line comment
            b'/' if source.get(i + 1) == Some(&b'/') => {
                i += 2;
                while i < n && source[i] != b'\n' {
                    i += 1;
                }
            }
            // Multi-line comment
            b'/' if source.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < n {
                    if source[i] == b'*' && source.get(i + 1) == Some(&b'/') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            // String literal
            b'"' | b'\'' => {
                let quote = b;
                let start = i;
                i += 1;
                while i < n {
                    let c = source[i];
                    i += 1;
                    if c == b'\\' {
                        i += 1;
                    } else if c == quote {
                        break;
                    }
                }
                out.push(Token::string(Span::new(start as u32, i as u32)));
            }
            // Number literal
            b'0'..=b'9' => {
                let start = i;
                while i < n
                    && matches!(source[i], b'0'..=b'9' | b'.' | b'x' | b'X' | b'e' | b'E' | b'_')
                {
                    i += 1;
                }
                out.push(Token::number(Span::new(start as u32, i as u32)));
            }
            // Word: identifier or keyword. Non-ASCII bytes count as
            // word bytes so multibyte identifiers stay one token.
            b'a'..=b'z' | b'A'..=b'Z' | b'_' | 0x80..=0xFF => {
                let start = i;
                while i < n
                    && (source[i].is_ascii_alphanumeric()
                        || source[i] == b'_'
                        || source[i] >= 0x80)
                {
                    i += 1;
                }
                let span = Span::new(start as u32, i as u32);
                match std::str::from_utf8(&source[start..i]) {
                    Ok(word) if is_keyword(word) => {
                        out.push(Token::new(TokenKind::Keyword, word, span));
                    }
                    _ => out.push(Token::ident(span)),
                }
            }
            // Operators (multi-char first)
            b'<' | b'>' | b'=' | b'!' | b'&' | b'|' | b'+' | b'-' | b'*' | b'/' | b'%' | b'^' => {
                let start = i;
                i += 1;
                if i < n && matches!(source[i], b'=' | b'&' | b'|' | b'<' | b'>' | b'+' | b'-') {
                    i += 1;
                }
                let span = Span::new(start as u32, i as u32);
                let text = std::str::from_utf8(&source[start..i]).unwrap_or("?");
                out.push(Token::new(TokenKind::Op, text, span));
            }
            // Punctuation
            b'{' | b'}' | b'(' | b')' | b'[' | b']' | b';' | b':' | b',' | b'.' | b'#' | b'@'
            | b'~' | b'?' | b'$' | b'\\' | b'`' => {
                out.push(Token::new(
                    TokenKind::Punct,
                    (b as char).to_string(),
                    Span::new(i as u32, i as u32 + 1),
                ));
                i += 1;
            }
            // Unknown - skip
            _ => i += 1,
        }
    }
}

/// Keywords preserved verbatim across the languages students commonly
/// submit; everything else word-shaped collapses to `IDENT`.
#[allow(clippy::match_same_arms)]
fn is_keyword(s: &str) -> bool {
    matches!(
        s,
        // Rust
        "fn" | "let" | "mut" | "const" | "static" | "pub" | "mod" | "use" | "crate" | "self"
        | "Self" | "super" | "struct" | "enum" | "impl" | "trait" | "type" | "where" | "async"
        | "await" | "move" | "ref" | "match" | "if" | "else" | "loop" | "while" | "for" | "in"
        | "return" | "break" | "continue" | "unsafe" | "extern" | "dyn" | "as"
        // TypeScript/JavaScript
        | "function" | "var" | "class" | "interface" | "extends" | "implements" | "import"
        | "export" | "from" | "default" | "new" | "this" | "typeof" | "instanceof" | "void"
        | "null" | "undefined" | "true" | "false" | "try" | "catch" | "finally" | "throw"
        | "switch" | "case" | "do" | "delete" | "yield" | "constructor" | "readonly"
        // Python
        | "def" | "lambda" | "pass" | "raise" | "except" | "with" | "assert" | "global"
        | "nonlocal" | "print" | "elif" | "and" | "or" | "not" | "is" | "None" | "True" | "False"
        // Go
        | "package" | "go" | "chan" | "select" | "defer" | "fallthrough" | "goto" | "range"
        | "map" | "make" | "append" | "copy"
        // Java
        | "public" | "private" | "protected" | "final" | "abstract" | "synchronized"
        | "volatile" | "transient" | "native" | "strictfp" | "throws"
        // C/C++
        | "int" | "char" | "float" | "double" | "long" | "short" | "unsigned" | "signed"
        | "auto" | "register" | "inline" | "restrict" | "sizeof" | "typedef"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use simscan_core::token::IDENT_LEXEME;

    fn lex(source: &str) -> TokenStream {
        FallbackLexer.tokenize("test.txt", source.as_bytes()).unwrap()
    }

    fn lexemes(stream: &TokenStream) -> Vec<&str> {
        stream.tokens.iter().map(|t| t.lexeme.as_str()).collect()
    }

    #[test]
    fn test_words_collapse_to_ident() {
        let stream = lex("alpha beta_2 gamma");
        assert_eq!(lexemes(&stream), vec![IDENT_LEXEME; 3]);
    }

    #[test]
    fn test_rename_invariance() {
        let a = lex("total = total + price");
        let b = lex("sum = sum + cost");
        assert_eq!(lexemes(&a), lexemes(&b));
    }

    #[test]
    fn test_keywords_kept_verbatim() {
        let stream = lex("for x in xs");
        assert_eq!(lexemes(&stream), vec!["for", "IDENT", "in", "IDENT"]);
    }

    #[test]
    fn test_comments_and_whitespace_dropped() {
        let a = lex("x = 1 // trailing\n/* block */ y = 2");
        let b = lex("x=1\ny=2");
        assert_eq!(lexemes(&a), lexemes(&b));
    }

    #[test]
    fn test_string_with_escapes_is_one_token() {
        let stream = lex(r#"say("he said \"hi\"")"#);
        let strings: Vec<_> = stream
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Str)
            .collect();
        assert_eq!(strings.len(), 1);
    }

    #[test]
    fn test_numbers_collapse() {
        let a = lex("v = 3.14e2");
        let b = lex("v = 0x1F");
        assert_eq!(lexemes(&a), lexemes(&b));
    }

    #[test]
    fn test_spans_cover_original_bytes() {
        let source = "abc + def";
        let stream = lex(source);
        assert_eq!(stream.tokens[0].span, Span::new(0, 3));
        assert_eq!(stream.tokens[1].span, Span::new(4, 5));
        assert_eq!(stream.tokens[2].span, Span::new(6, 9));
    }

    #[test]
    fn test_two_char_operators() {
        let stream = lex("a == b != c");
        let ops: Vec<_> = stream
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Op)
            .map(|t| t.lexeme.as_str())
            .collect();
        assert_eq!(ops, vec!["==", "!="]);
    }
}
