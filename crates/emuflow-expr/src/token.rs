//! Token types for the expression lexer.

use std::fmt;

use crate::Span;

/// A single token with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Every token kind of the expression language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // ── Literals ──────────────────────────────────────────────

    /// Numeric literal: `42`, `3.14`, `1e-3`
    Number(f64),
    /// `true`
    True,
    /// `false`
    False,
    /// Input name: `level`, `in_0`
    Identifier(String),

    // ── Arithmetic ────────────────────────────────────────────

    Plus,
    Minus,
    Star,
    Slash,

    // ── Comparison ────────────────────────────────────────────

    Greater,
    Less,
    GreaterEq,
    LessEq,
    /// `==` or a single `=`
    EqEq,

    // ── Logic ─────────────────────────────────────────────────

    /// `and` or `&&`
    And,
    /// `or` or `||`
    Or,
    /// `not` or `!`
    Not,

    // ── Punctuation ───────────────────────────────────────────

    LParen,
    RParen,

    Eof,
}

impl TokenKind {
    /// Map a word to its keyword token, if it is one.
    pub fn from_keyword(s: &str) -> Option<TokenKind> {
        Some(match s {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            _ => return None,
        })
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{n}"),
            TokenKind::True => f.write_str("true"),
            TokenKind::False => f.write_str("false"),
            TokenKind::Identifier(name) => f.write_str(name),
            TokenKind::Plus => f.write_str("+"),
            TokenKind::Minus => f.write_str("-"),
            TokenKind::Star => f.write_str("*"),
            TokenKind::Slash => f.write_str("/"),
            TokenKind::Greater => f.write_str(">"),
            TokenKind::Less => f.write_str("<"),
            TokenKind::GreaterEq => f.write_str(">="),
            TokenKind::LessEq => f.write_str("<="),
            TokenKind::EqEq => f.write_str("=="),
            TokenKind::And => f.write_str("and"),
            TokenKind::Or => f.write_str("or"),
            TokenKind::Not => f.write_str("not"),
            TokenKind::LParen => f.write_str("("),
            TokenKind::RParen => f.write_str(")"),
            TokenKind::Eof => f.write_str("end of expression"),
        }
    }
}
