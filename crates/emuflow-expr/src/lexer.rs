//! Expression lexer: converts expression text to a token stream.
//!
//! Accepts both word and symbol spellings of the logic operators
//! (`and`/`&&`, `or`/`||`, `not`/`!`) and a single `=` as equality.

use crate::token::{Token, TokenKind};
use crate::{ExprError, Span};

/// The expression lexer.
pub struct Lexer<'src> {
    source: &'src [u8],
    pos: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
        }
    }

    /// Lex the whole expression. The stream always ends with [`TokenKind::Eof`].
    pub fn lex(mut self) -> Result<Vec<Token>, ExprError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.scan()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                return Ok(tokens);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Character-level helpers
    // ─────────────────────────────────────────────────────────────

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.pos)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Consume the next byte if it equals `expected`.
    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Scanning
    // ─────────────────────────────────────────────────────────────

    fn scan(&mut self) -> Result<Token, ExprError> {
        self.skip_whitespace();
        let start = self.pos;
        let Some(ch) = self.advance() else {
            return Ok(Token::new(TokenKind::Eof, self.span_from(start)));
        };

        let kind = match ch {
            b'0'..=b'9' => return self.scan_number(start),
            b'.' if matches!(self.peek(), Some(b'0'..=b'9')) => return self.scan_number(start),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => return Ok(self.scan_identifier(start)),

            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,

            b'>' => {
                if self.eat(b'=') {
                    TokenKind::GreaterEq
                } else {
                    TokenKind::Greater
                }
            }
            b'<' => {
                if self.eat(b'=') {
                    TokenKind::LessEq
                } else {
                    TokenKind::Less
                }
            }
            b'=' => {
                self.eat(b'=');
                TokenKind::EqEq
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    return Err(ExprError::new(
                        "'!=' is not supported; use 'not (a == b)'",
                        Span::new(start, self.pos + 1),
                    ));
                }
                TokenKind::Not
            }
            b'&' if self.peek() == Some(b'&') => {
                self.advance();
                TokenKind::And
            }
            b'|' if self.peek() == Some(b'|') => {
                self.advance();
                TokenKind::Or
            }

            _ => {
                return Err(ExprError::new(
                    format!("unexpected character '{}'", ch as char),
                    self.span_from(start),
                ))
            }
        };
        Ok(Token::new(kind, self.span_from(start)))
    }

    fn scan_number(&mut self, start: usize) -> Result<Token, ExprError> {
        while matches!(self.peek(), Some(b'0'..=b'9' | b'.')) {
            self.advance();
        }
        // Exponent: 1e3, 2.5E-4
        if matches!(self.peek(), Some(b'e' | b'E'))
            && (matches!(self.peek_at(1), Some(b'0'..=b'9'))
                || (matches!(self.peek_at(1), Some(b'+' | b'-'))
                    && matches!(self.peek_at(2), Some(b'0'..=b'9'))))
        {
            self.advance();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.advance();
            }
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.advance();
            }
        }

        let span = self.span_from(start);
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or("");
        let value: f64 = text
            .parse()
            .map_err(|_| ExprError::new(format!("invalid number '{text}'"), span))?;
        Ok(Token::new(TokenKind::Number(value), span))
    }

    fn scan_identifier(&mut self, start: usize) -> Token {
        while matches!(self.peek(), Some(ch) if ch.is_ascii_alphanumeric() || ch == b'_') {
            self.advance();
        }
        let span = self.span_from(start);
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or("");
        let kind =
            TokenKind::from_keyword(text).unwrap_or_else(|| TokenKind::Identifier(text.to_string()));
        Token::new(kind, span)
    }
}
