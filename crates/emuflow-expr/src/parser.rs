//! Expression parsing with operator precedence.
//!
//! Precedence (lowest → highest):
//! 6. `or`
//! 5. `and`
//! 4. `==`, `<`, `>`, `<=`, `>=` (no chaining)
//! 3. `+`, `-`
//! 2. `*`, `/`
//! 1. unary `-`, `not`
//! 0. literals, inputs, `( … )`

use crate::ast::{BinOp, Expr, ExprKind, UnaryOp};
use crate::token::{Token, TokenKind};
use crate::{ExprError, Span, MAX_DEPTH};

/// The expression parser.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: u32,
}

impl Parser {
    /// Create a parser over a token stream produced by the lexer.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse a complete expression; trailing tokens are an error.
    pub fn parse(mut self) -> Result<Expr, ExprError> {
        if self.at_end() {
            return Err(ExprError::new("empty expression", self.current_span()));
        }
        let expr = self.parse_expression()?;
        if !self.at_end() {
            return Err(self.unexpected("end of expression"));
        }
        Ok(expr)
    }

    // ── Token Cursor ──────────────────────────────────────────────────────────

    fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or(Span::new(0, 0))
    }

    fn advance(&mut self) -> Span {
        let span = self.current_span();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        span
    }

    fn at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ExprError {
        ExprError::new(
            format!("expected {expected}, got '{}'", self.peek_kind()),
            self.current_span(),
        )
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Precedence Chain
    // ══════════════════════════════════════════════════════════════════════════

    fn parse_expression(&mut self) -> Result<Expr, ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::new(
                format!("maximum expression nesting depth is {MAX_DEPTH}"),
                self.current_span(),
            ));
        }
        let result = self.parse_or();
        self.depth -= 1;
        result
    }

    /// `OrExpr = AndExpr { "or" AndExpr }`
    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_and()?;
            left = binary(left, BinOp::Or, right);
        }
        Ok(left)
    }

    /// `AndExpr = CompExpr { "and" CompExpr }`
    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_comparison()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_comparison()?;
            left = binary(left, BinOp::And, right);
        }
        Ok(left)
    }

    /// `CompExpr = AddExpr [ CompOp AddExpr ]`
    ///
    /// Comparison operators do not chain: `a < b < c` is an error.
    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_add()?;
        let Some(op) = self.match_comparison_op() else {
            return Ok(left);
        };
        self.advance();
        let right = self.parse_add()?;
        if self.match_comparison_op().is_some() {
            return Err(ExprError::new(
                "comparison operators cannot be chained; use 'and' to combine",
                self.current_span(),
            ));
        }
        Ok(binary(left, op, right))
    }

    fn match_comparison_op(&self) -> Option<BinOp> {
        match self.peek_kind() {
            TokenKind::Greater => Some(BinOp::Greater),
            TokenKind::Less => Some(BinOp::Less),
            TokenKind::EqEq => Some(BinOp::Eq),
            TokenKind::GreaterEq => Some(BinOp::GreaterEq),
            TokenKind::LessEq => Some(BinOp::LessEq),
            _ => None,
        }
    }

    /// `AddExpr = MulExpr { ("+" | "-") MulExpr }`
    fn parse_add(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_mul()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    /// `MulExpr = UnaryExpr { ("*" | "/") UnaryExpr }`
    fn parse_mul(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    /// `UnaryExpr = ( "not" | "-" ) UnaryExpr | PrimaryExpr`
    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek_kind() {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.parse_primary(),
        };
        let start = self.advance();
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::new(
                format!("maximum expression nesting depth is {MAX_DEPTH}"),
                start,
            ));
        }
        let operand = self.parse_unary();
        self.depth -= 1;
        let operand = operand?;

        // A negated literal is just a negative literal.
        if let (UnaryOp::Neg, ExprKind::Number(n)) = (op, &operand.kind) {
            return Ok(Expr::new(ExprKind::Number(-n), start.merge(operand.span)));
        }
        let span = start.merge(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let start = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::Number(n), start))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Number(1.0), start))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::Number(0.0), start))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Input(name), start))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                if !self.eat(&TokenKind::RParen) {
                    return Err(self.unexpected("')'"));
                }
                Ok(inner)
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    let span = left.span.merge(right.span);
    Expr::new(
        ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        span,
    )
}

#[cfg(test)]
mod tests {
    use crate::ast::{BinOp, ExprKind, UnaryOp};
    use crate::parse;

    fn root_op(src: &str) -> BinOp {
        match parse(src).unwrap().kind {
            ExprKind::Binary { op, .. } => op,
            other => panic!("expected binary root, got {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(root_op("a + b * c"), BinOp::Add);
        assert_eq!(root_op("(a + b) * c"), BinOp::Mul);
    }

    #[test]
    fn logic_is_lowest() {
        assert_eq!(root_op("a > 1 and b < 2 or c"), BinOp::Or);
        assert_eq!(root_op("a > 1 and b < 2"), BinOp::And);
        assert_eq!(root_op("a + 1 >= b"), BinOp::GreaterEq);
    }

    #[test]
    fn subtraction_is_left_associative() {
        let expr = parse("a - b - c").unwrap();
        let ExprKind::Binary { left, .. } = expr.kind else {
            panic!("expected binary");
        };
        assert!(matches!(left.kind, ExprKind::Binary { op: BinOp::Sub, .. }));
    }

    #[test]
    fn negative_literal_folds() {
        assert_eq!(parse("-2.5").unwrap().kind, ExprKind::Number(-2.5));
        assert!(matches!(
            parse("-a").unwrap().kind,
            ExprKind::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn booleans_are_numbers() {
        assert_eq!(parse("true").unwrap().kind, ExprKind::Number(1.0));
    }

    #[test]
    fn rejects_chained_comparison() {
        assert!(parse("a < b < c").is_err());
    }

    #[test]
    fn rejects_unbalanced_and_trailing() {
        assert!(parse("(a + b").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("").is_err());
        assert!(parse("a +").is_err());
    }

    #[test]
    fn depth_limit() {
        let deep = format!("{}a{}", "(".repeat(40), ")".repeat(40));
        let err = parse(&deep).unwrap_err();
        assert!(err.message.contains("nesting depth"));
    }

    #[test]
    fn inputs_in_first_use_order() {
        let expr = parse("b * a + b - c").unwrap();
        assert_eq!(expr.inputs(), vec!["b", "a", "c"]);
    }
}
