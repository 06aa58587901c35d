//! Tree-sitter based canonical lexing.
//!
//! One generic leaf-token walker serves every grammar. A node is first
//! checked against the language's kind table, then against generic kind
//! heuristics (most grammars call their identifier node some flavor of
//! `*identifier*`), and finally, for anonymous leaves, classified by
//! lexeme shape into keyword, operator, or punctuation. Comment and
//! literal subtrees are pruned so string interpolation internals never
//! leak into a stream.

use crate::languages::Language;
use simscan_core::token::{Span, Token, TokenKind, TokenStream};

/// A canonical lexer: bytes in, token stream out.
pub trait Lexer {
    /// Tokenize one file. `path` is the tree-relative path recorded on
    /// the stream.
    fn tokenize(&self, path: &str, source: &[u8]) -> Result<TokenStream, LexError>;

    /// Language tag recorded on streams this lexer produces.
    fn language_tag(&self) -> &'static str;
}

/// Lex failures. The pipeline downgrades these to the fallback lexer.
#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("grammar rejected by tree-sitter: {0}")]
    Grammar(String),
    #[error("tree-sitter produced no parse tree for {0}")]
    Parse(String),
}

/// Per-language node-kind table. Only kinds the generic heuristics
/// misclassify need a row; everything else is covered generically.
#[derive(Debug, Clone, Copy, Default)]
struct LanguageSpec {
    /// Extra node kinds collapsed to `IDENT`.
    ident_kinds: &'static [&'static str],
    /// Extra node kinds collapsed to `NUM`.
    number_kinds: &'static [&'static str],
    /// Extra node kinds collapsed to `STR` (subtree pruned).
    string_kinds: &'static [&'static str],
    /// Extra node kinds dropped entirely (subtree pruned).
    comment_kinds: &'static [&'static str],
    /// Named kinds emitted verbatim as operators.
    op_kinds: &'static [&'static str],
}

fn spec_for(language: Language) -> LanguageSpec {
    match language {
        Language::Python => LanguageSpec {
            string_kinds: &["string", "concatenated_string"],
            ..Default::default()
        },
        Language::Rust => LanguageSpec {
            ident_kinds: &["lifetime", "loop_label", "metavariable"],
            string_kinds: &["string_literal", "raw_string_literal", "char_literal"],
            ..Default::default()
        },
        Language::TypeScript | Language::JavaScript => LanguageSpec {
            string_kinds: &["template_string", "regex"],
            ..Default::default()
        },
        Language::Go => LanguageSpec {
            ident_kinds: &["label_name"],
            string_kinds: &["rune_literal", "raw_string_literal", "interpreted_string_literal"],
            ..Default::default()
        },
        Language::Java => LanguageSpec {
            string_kinds: &["text_block"],
            ..Default::default()
        },
        Language::C | Language::Cpp => LanguageSpec {
            ident_kinds: &["statement_identifier"],
            string_kinds: &["system_lib_string"],
            ..Default::default()
        },
        Language::CSharp => LanguageSpec {
            string_kinds: &[
                "verbatim_string_literal",
                "raw_string_literal",
                "interpolated_string_expression",
            ],
            ..Default::default()
        },
        Language::Ruby => LanguageSpec {
            ident_kinds: &[
                "constant",
                "instance_variable",
                "class_variable",
                "global_variable",
            ],
            string_kinds: &["simple_symbol", "heredoc_beginning", "heredoc_body", "regex"],
            ..Default::default()
        },
        Language::Php => LanguageSpec {
            ident_kinds: &["name"],
            string_kinds: &["encapsed_string", "heredoc", "shell_command_expression"],
            ..Default::default()
        },
        Language::Kotlin => LanguageSpec {
            string_kinds: &["character_literal"],
            ..Default::default()
        },
        Language::Swift => LanguageSpec {
            string_kinds: &["line_string_literal", "multi_line_string_literal", "regex_literal"],
            comment_kinds: &["multiline_comment"],
            ..Default::default()
        },
        Language::Scala => LanguageSpec {
            ident_kinds: &["stable_identifier"],
            op_kinds: &["operator_identifier"],
            string_kinds: &["interpolated_string_expression", "symbol_literal"],
            ..Default::default()
        },
        Language::Bash => LanguageSpec {
            ident_kinds: &["word", "variable_name", "special_variable_name", "file_descriptor"],
            string_kinds: &["raw_string", "ansi_c_string", "heredoc_body"],
            ..Default::default()
        },
    }
}

/// Classification of a node before emission.
enum NodeClass {
    Ident,
    Number,
    Str,
    Comment,
    Op,
    /// Not matched; recurse (or classify the leaf by shape).
    Descend,
}

fn classify_node(kind: &str, spec: &LanguageSpec) -> NodeClass {
    // Table rows win over the generic heuristics
    if spec.op_kinds.contains(&kind) {
        return NodeClass::Op;
    }
    if spec.ident_kinds.contains(&kind) {
        return NodeClass::Ident;
    }
    if spec.number_kinds.contains(&kind) {
        return NodeClass::Number;
    }
    if spec.string_kinds.contains(&kind) {
        return NodeClass::Str;
    }
    if spec.comment_kinds.contains(&kind) {
        return NodeClass::Comment;
    }

    if kind.contains("comment") {
        return NodeClass::Comment;
    }
    if kind.contains("identifier") {
        return NodeClass::Ident;
    }
    if kind.contains("string") || kind.contains("char") {
        return NodeClass::Str;
    }
    if kind.contains("integer")
        || kind.contains("float")
        || kind.contains("number")
        || kind.contains("numeric")
        || kind.contains("decimal")
        || kind.contains("real_literal")
        || kind.contains("imaginary")
    {
        return NodeClass::Number;
    }
    NodeClass::Descend
}

/// Tree-sitter lexer for one supported language.
pub struct TreeSitterLexer {
    language: Language,
}

impl TreeSitterLexer {
    pub fn new(language: Language) -> Self {
        Self { language }
    }
}

impl Lexer for TreeSitterLexer {
    fn tokenize(&self, path: &str, source: &[u8]) -> Result<TokenStream, LexError> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&self.language.ts_language())
            .map_err(|e| LexError::Grammar(e.to_string()))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| LexError::Parse(path.to_string()))?;

        let spec = spec_for(self.language);
        let mut stream = TokenStream::new(path, self.language.name());
        emit_node(&tree.root_node(), source, &spec, &mut stream.tokens);
        Ok(stream)
    }

    fn language_tag(&self) -> &'static str {
        self.language.name()
    }
}

fn node_span(node: &tree_sitter::Node) -> Span {
    Span::new(node.start_byte() as u32, node.end_byte() as u32)
}

fn emit_node(
    node: &tree_sitter::Node,
    source: &[u8],
    spec: &LanguageSpec,
    out: &mut Vec<Token>,
) {
    match classify_node(node.kind(), spec) {
        NodeClass::Comment => {}
        NodeClass::Ident => out.push(Token::ident(node_span(node))),
        NodeClass::Number => out.push(Token::number(node_span(node))),
        NodeClass::Str => out.push(Token::string(node_span(node))),
        NodeClass::Op => {
            if let Ok(text) = node.utf8_text(source) {
                out.push(Token::new(TokenKind::Op, text, node_span(node)));
            }
        }
        NodeClass::Descend => {
            if node.child_count() == 0 {
                emit_leaf(node, source, out);
            } else {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    emit_node(&child, source, spec, out);
                }
            }
        }
    }
}

/// Leaves that escaped the kind tables: anonymous keyword/operator/
/// punctuation nodes plus the odd named literal, classified by shape.
fn emit_leaf(node: &tree_sitter::Node, source: &[u8], out: &mut Vec<Token>) {
    let Ok(text) = node.utf8_text(source) else {
        return;
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    let span = node_span(node);

    let mut chars = trimmed.chars();
    let first = chars.next().unwrap();
    if first.is_alphabetic() || first == '_' {
        // Keywords keep their verbatim lexeme; they are part of the
        // canonical alphabet and renaming does not touch them.
        out.push(Token::new(TokenKind::Keyword, trimmed, span));
    } else if first.is_ascii_digit() {
        out.push(Token::number(span));
    } else if trimmed.len() == 1 && is_punct_char(first) {
        out.push(Token::new(TokenKind::Punct, trimmed, span));
    } else {
        out.push(Token::new(TokenKind::Op, trimmed, span));
    }
}

fn is_punct_char(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '{' | '}' | '[' | ']' | ';' | ',' | '.' | ':' | '#' | '@' | '~' | '?'
    )
}
