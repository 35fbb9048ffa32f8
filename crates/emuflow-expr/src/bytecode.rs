//! Stack bytecode for Math, Logic and Compare blocks.
//!
//! Each instruction is an `(opcode, operand)` byte pair. Loads carry an
//! operand (input slot or constant-table index); operators ignore it and
//! encode it as zero.

use serde::{Deserialize, Serialize};

use crate::ast::{BinOp, Expr, ExprKind, UnaryOp};
use crate::{ExprError, Span};

/// Upper bound of both the constant table and the instruction stream.
pub const MAX_ENTRIES: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    LoadIn = 0x01,
    LoadConst = 0x02,
    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    Div = 0x13,
    Gt = 0x20,
    Lt = 0x21,
    Eq = 0x22,
    Ge = 0x23,
    Le = 0x24,
    And = 0x30,
    Or = 0x31,
    Not = 0x32,
}

impl Opcode {
    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => Opcode::LoadIn,
            0x02 => Opcode::LoadConst,
            0x10 => Opcode::Add,
            0x11 => Opcode::Sub,
            0x12 => Opcode::Mul,
            0x13 => Opcode::Div,
            0x20 => Opcode::Gt,
            0x21 => Opcode::Lt,
            0x22 => Opcode::Eq,
            0x23 => Opcode::Ge,
            0x24 => Opcode::Le,
            0x30 => Opcode::And,
            0x31 => Opcode::Or,
            0x32 => Opcode::Not,
            _ => return None,
        })
    }

    fn for_binary(op: BinOp) -> Self {
        match op {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mul,
            BinOp::Div => Opcode::Div,
            BinOp::Greater => Opcode::Gt,
            BinOp::Less => Opcode::Lt,
            BinOp::Eq => Opcode::Eq,
            BinOp::GreaterEq => Opcode::Ge,
            BinOp::LessEq => Opcode::Le,
            BinOp::And => Opcode::And,
            BinOp::Or => Opcode::Or,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub operand: u8,
}

/// What an input name in the expression stands for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binding {
    /// A connected block input slot.
    Slot(u8),
    /// A literal folded into the constant table.
    Constant(f64),
}

/// Compiled expression: instruction stream plus its constant table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bytecode {
    pub instructions: Vec<Instruction>,
    pub constants: Vec<f32>,
}

impl Bytecode {
    /// Payload of the constants packet: `count:u8, f32 × count`.
    pub fn constants_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.constants.len() * 4);
        out.push(self.constants.len() as u8);
        for c in &self.constants {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out
    }

    /// Payload of the instructions packet: `count:u8` then the pairs.
    pub fn instructions_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.instructions.len() * 2);
        out.push(self.instructions.len() as u8);
        for ins in &self.instructions {
            out.push(ins.op.byte());
            out.push(ins.operand);
        }
        out
    }

    /// Input slots loaded by the program, in first-use order.
    pub fn loaded_slots(&self) -> Vec<u8> {
        let mut slots = Vec::new();
        for ins in &self.instructions {
            if ins.op == Opcode::LoadIn && !slots.contains(&ins.operand) {
                slots.push(ins.operand);
            }
        }
        slots
    }
}

/// Compile an expression, resolving input names through `bindings`.
pub fn compile(expr: &Expr, bindings: &[(&str, Binding)]) -> Result<Bytecode, ExprError> {
    let mut compiler = BytecodeCompiler {
        bindings,
        code: Bytecode::default(),
    };
    compiler.emit_expr(expr)?;
    if compiler.code.instructions.len() > MAX_ENTRIES {
        return Err(ExprError::new(
            format!(
                "expression compiles to {} instructions (max {MAX_ENTRIES})",
                compiler.code.instructions.len()
            ),
            expr.span,
        ));
    }
    Ok(compiler.code)
}

/// Parse then compile expression text.
pub fn compile_source(source: &str, bindings: &[(&str, Binding)]) -> Result<Bytecode, ExprError> {
    let expr = crate::parse(source)?;
    compile(&expr, bindings)
}

struct BytecodeCompiler<'a> {
    bindings: &'a [(&'a str, Binding)],
    code: Bytecode,
}

impl BytecodeCompiler<'_> {
    fn emit(&mut self, op: Opcode, operand: u8) {
        self.code.instructions.push(Instruction { op, operand });
    }

    fn emit_expr(&mut self, expr: &Expr) -> Result<(), ExprError> {
        match &expr.kind {
            ExprKind::Number(n) => self.emit_constant(*n, expr.span),
            ExprKind::Input(name) => {
                let binding = self
                    .bindings
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, b)| *b)
                    .ok_or_else(|| ExprError::new(format!("unknown input '{name}'"), expr.span))?;
                match binding {
                    Binding::Slot(slot) => {
                        self.emit(Opcode::LoadIn, slot);
                        Ok(())
                    }
                    Binding::Constant(v) => self.emit_constant(v, expr.span),
                }
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    self.emit_expr(operand)?;
                    self.emit(Opcode::Not, 0);
                    Ok(())
                }
                UnaryOp::Neg => {
                    // -x  ⇒  0 - x
                    self.emit_constant(0.0, expr.span)?;
                    self.emit_expr(operand)?;
                    self.emit(Opcode::Sub, 0);
                    Ok(())
                }
            },
            ExprKind::Binary { left, op, right } => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit(Opcode::for_binary(*op), 0);
                Ok(())
            }
        }
    }

    fn emit_constant(&mut self, value: f64, span: Span) -> Result<(), ExprError> {
        let value = value as f32;
        let index = match self
            .code
            .constants
            .iter()
            .position(|c| c.to_bits() == value.to_bits())
        {
            Some(i) => i,
            None => {
                if self.code.constants.len() >= MAX_ENTRIES {
                    return Err(ExprError::new(
                        format!("too many constants (max {MAX_ENTRIES})"),
                        span,
                    ));
                }
                self.code.constants.push(value);
                self.code.constants.len() - 1
            }
        };
        self.emit(Opcode::LoadConst, index as u8);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(code: &Bytecode) -> Vec<(Opcode, u8)> {
        code.instructions.iter().map(|i| (i.op, i.operand)).collect()
    }

    #[test]
    fn compiles_postfix_order() {
        let code = compile_source("a * 2 + b", &[("a", Binding::Slot(1)), ("b", Binding::Slot(2))]).unwrap();
        assert_eq!(
            pairs(&code),
            vec![
                (Opcode::LoadIn, 1),
                (Opcode::LoadConst, 0),
                (Opcode::Mul, 0),
                (Opcode::LoadIn, 2),
                (Opcode::Add, 0),
            ]
        );
        assert_eq!(code.constants, vec![2.0]);
    }

    #[test]
    fn constants_are_deduplicated() {
        let code = compile_source("2 * a + 2 - 3", &[("a", Binding::Slot(1))]).unwrap();
        assert_eq!(code.constants, vec![2.0, 3.0]);
    }

    #[test]
    fn constant_bindings_fold_into_table() {
        let code = compile_source("x > limit", &[("x", Binding::Slot(1)), ("limit", Binding::Constant(10.0))]).unwrap();
        assert_eq!(code.constants, vec![10.0]);
        assert_eq!(code.loaded_slots(), vec![1]);
        assert_eq!(code.instructions.last().map(|i| i.op), Some(Opcode::Gt));
    }

    #[test]
    fn negation_of_input_is_zero_minus() {
        let code = compile_source("-a", &[("a", Binding::Slot(1))]).unwrap();
        assert_eq!(
            pairs(&code),
            vec![(Opcode::LoadConst, 0), (Opcode::LoadIn, 1), (Opcode::Sub, 0)]
        );
        assert_eq!(code.constants, vec![0.0]);
    }

    #[test]
    fn logic_and_not() {
        let code = compile_source("not a and b", &[("a", Binding::Slot(1)), ("b", Binding::Slot(2))]).unwrap();
        assert_eq!(
            pairs(&code),
            vec![
                (Opcode::LoadIn, 1),
                (Opcode::Not, 0),
                (Opcode::LoadIn, 2),
                (Opcode::And, 0),
            ]
        );
    }

    #[test]
    fn unknown_input_is_an_error() {
        let err = compile_source("a + c", &[("a", Binding::Slot(1))]).unwrap_err();
        assert!(err.message.contains("unknown input 'c'"));
        assert_eq!(err.span, Span::new(4, 5));
    }

    #[test]
    fn payload_layout() {
        let code = compile_source("a + 1.5", &[("a", Binding::Slot(1))]).unwrap();
        assert_eq!(code.constants_payload(), vec![0x01, 0x00, 0x00, 0xC0, 0x3F]);
        assert_eq!(
            code.instructions_payload(),
            vec![0x03, 0x01, 0x01, 0x02, 0x00, 0x10, 0x00]
        );
    }

    #[test]
    fn constant_table_limit() {
        let source = (0..300).map(|i| i.to_string()).collect::<Vec<_>>().join(" + ");
        // 300 literals overflow the 255-entry table before the instruction limit.
        let err = compile_source(&source, &[]).unwrap_err();
        assert!(err.message.contains("too many constants"));
    }

    #[test]
    fn opcode_bytes_round_trip() {
        for b in 0..=u8::MAX {
            if let Some(op) = Opcode::from_byte(b) {
                assert_eq!(op.byte(), b);
            }
        }
        assert_eq!(Opcode::from_byte(0x99), None);
    }
}
