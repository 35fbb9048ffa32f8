//! Expression front-end for Math, Logic and Compare blocks.
//!
//! ```text
//! "a * 2 + b" → Lexer → Parser → Expr → compile → [(op, operand)], [f32]
//! ```
//!
//! The generated bytecode is a stack program: loads push, operators pop
//! their operands and push the result. The final stack top is the block
//! output.

pub mod ast;
pub mod bytecode;
mod error;
pub mod lexer;
mod parser;
pub mod token;

pub use ast::{BinOp, Expr, ExprKind, UnaryOp};
pub use bytecode::{compile, compile_source, Binding, Bytecode, Instruction, Opcode};
pub use error::{ExprError, Span};
pub use lexer::Lexer;
pub use parser::Parser;

/// Maximum expression nesting depth.
pub const MAX_DEPTH: u32 = 32;

/// Parse expression text into an AST.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = Lexer::new(source).lex()?;
    Parser::new(tokens).parse()
}
