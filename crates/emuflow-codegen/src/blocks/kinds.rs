//! Construction specs for every block kind.
//!
//! Each spec names the block's semantic inputs. Building it lays out the
//! input/output slots, folds constants into the configuration and binds
//! references.

use emuflow_expr::{compile, parse, Binding};
use emuflow_types::{EmuError, MemType, Ref, Result};
use serde::{Deserialize, Serialize};

use super::{Block, BlockConfig, BlockSpec, BlockType, Input, InputDef, OutputDef, MAX_OPTIONS};

// ══════════════════════════════════════════════════════════════════════════════
// Modes
// ══════════════════════════════════════════════════════════════════════════════

/// FOR loop condition, evaluated as `condition(ITER, LIMIT)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ForCondition {
    Greater = 0,
    #[default]
    Less = 1,
    GreaterEq = 2,
    LessEq = 3,
}

/// FOR step operator, applied as `ITER := operator(ITER, STEP)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ForOperator {
    #[default]
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TimerMode {
    /// On-delay.
    #[default]
    Ton = 0,
    /// Off-delay.
    Tof = 1,
    /// Pulse.
    Tp = 2,
    TonInv = 3,
    TofInv = 4,
    TpInv = 5,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CounterMode {
    #[default]
    RisingEdge = 0,
    Level = 1,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LatchMode {
    /// Set dominates.
    #[default]
    Sr = 0,
    /// Reset dominates.
    Rs = 1,
}

fn bind_all(block: &mut Block, args: Vec<Input>) -> Result<()> {
    for (slot, input) in args.into_iter().enumerate() {
        block.bind(slot, input)?;
    }
    Ok(())
}

fn check_option_count(ty: BlockType, what: &str, n: usize) -> Result<()> {
    if n == 0 || n > MAX_OPTIONS {
        return Err(EmuError::OutOfRange(format!(
            "{ty} block needs 1..={MAX_OPTIONS} {what}, got {n}"
        )));
    }
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Expression blocks
// ══════════════════════════════════════════════════════════════════════════════

/// Variables bound to constants fold into the constant table; every other
/// variable gets an input slot after EN, in declaration order.
fn expression_block(
    ty: BlockType,
    var_ty: MemType,
    out_ty: MemType,
    expression: &str,
    vars: Vec<(String, Input)>,
    en: Input,
) -> Result<Block> {
    let expr = parse(expression)?;

    let mut inputs = vec![InputDef::new("EN", MemType::Bool, false)];
    let mut bindings: Vec<(&str, Binding)> = Vec::new();
    let mut refs = Vec::new();
    for (name, input) in &vars {
        if bindings.iter().any(|(n, _)| *n == name.as_str()) {
            return Err(EmuError::Expression(format!(
                "variable '{name}' is bound twice"
            )));
        }
        match input {
            Input::Const(v) => bindings.push((name.as_str(), Binding::Constant(*v))),
            other => {
                let slot = inputs.len();
                inputs.push(InputDef::new(name.as_str(), var_ty, false));
                bindings.push((name.as_str(), Binding::Slot(slot as u8)));
                refs.push((slot, other.clone()));
            }
        }
    }
    let code = compile(&expr, &bindings)?;

    let mut block = Block::new(
        ty,
        inputs,
        vec![OutputDef::new("Q", out_ty)],
        BlockConfig::Expression {
            source: expression.to_string(),
            code,
        },
    )?;
    block.bind(0, en)?;
    for (slot, input) in refs {
        block.bind(slot, input)?;
    }
    Ok(block)
}

macro_rules! expression_spec {
    ($(#[$doc:meta])* $name:ident, $ty:expr, $var_ty:expr, $out_ty:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            pub expression: String,
            pub vars: Vec<(String, Input)>,
            pub en: Input,
        }

        impl $name {
            pub fn new(expression: impl Into<String>) -> Self {
                Self {
                    expression: expression.into(),
                    ..Self::default()
                }
            }

            /// Bind an expression variable.
            pub fn var(mut self, name: impl Into<String>, input: impl Into<Input>) -> Self {
                self.vars.push((name.into(), input.into()));
                self
            }

            pub fn en(mut self, input: impl Into<Input>) -> Self {
                self.en = input.into();
                self
            }
        }

        impl BlockSpec for $name {
            fn build(self) -> Result<Block> {
                expression_block($ty, $var_ty, $out_ty, &self.expression, self.vars, self.en)
            }
        }
    };
}

expression_spec!(
    /// Arithmetic expression; `Q` is the f32 result.
    Math,
    BlockType::Math,
    MemType::F32,
    MemType::F32
);
expression_spec!(
    /// Boolean expression over bool inputs.
    Logic,
    BlockType::Logic,
    MemType::Bool,
    MemType::Bool
);
expression_spec!(
    /// Comparison of numeric inputs; `Q` is bool.
    Compare,
    BlockType::Compare,
    MemType::F32,
    MemType::Bool
);

// ══════════════════════════════════════════════════════════════════════════════
// Set-Global
// ══════════════════════════════════════════════════════════════════════════════

/// Copies `value` into the mutable variable `target` on every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SetGlobal {
    pub value: Input,
    pub target: Ref,
}

impl BlockSpec for SetGlobal {
    fn build(self) -> Result<Block> {
        let mut block = Block::new(
            BlockType::SetGlobal,
            vec![
                InputDef::new("VALUE", MemType::F32, false),
                InputDef::new("TARGET", MemType::F32, false),
            ],
            Vec::new(),
            BlockConfig::SetGlobal,
        )?;
        bind_all(&mut block, vec![self.value, Input::Ref(self.target)])?;
        Ok(block)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// FOR
// ══════════════════════════════════════════════════════════════════════════════

/// Loop over the blocks whose EN is this block's `ENO`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct For {
    pub condition: ForCondition,
    pub operator: ForOperator,
    pub en: Input,
    pub start: Input,
    pub limit: Input,
    pub step: Input,
}

impl BlockSpec for For {
    fn build(self) -> Result<Block> {
        let mut block = Block::new(
            BlockType::For,
            vec![
                InputDef::new("EN", MemType::Bool, false),
                InputDef::new("START", MemType::F32, true),
                InputDef::new("LIMIT", MemType::F32, true),
                InputDef::new("STEP", MemType::F32, true),
            ],
            vec![
                OutputDef::new("ENO", MemType::Bool),
                OutputDef::new("ITER", MemType::F32),
            ],
            BlockConfig::For {
                condition: self.condition,
                operator: self.operator,
                start: 0.0,
                limit: 0.0,
                step: 1.0,
                chain_len: 0,
            },
        )?;
        bind_all(&mut block, vec![self.en, self.start, self.limit, self.step])?;
        Ok(block)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Timer / Counter / Clock
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timer {
    pub mode: TimerMode,
    pub en: Input,
    /// Preset time in ms.
    pub pt: Input,
    pub rst: Input,
}

impl BlockSpec for Timer {
    fn build(self) -> Result<Block> {
        let mut block = Block::new(
            BlockType::Timer,
            vec![
                InputDef::new("EN", MemType::Bool, false),
                InputDef::new("PT", MemType::U32, true),
                InputDef::new("RST", MemType::Bool, false),
            ],
            vec![
                OutputDef::new("Q", MemType::Bool),
                OutputDef::new("ET", MemType::U32),
            ],
            BlockConfig::Timer {
                mode: self.mode,
                pt: 0,
            },
        )?;
        bind_all(&mut block, vec![self.en, self.pt, self.rst])?;
        Ok(block)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Counter {
    pub mode: CounterMode,
    pub cu: Input,
    pub cd: Input,
    pub reset: Input,
    pub step: Input,
    pub max: Input,
    pub min: Input,
}

impl BlockSpec for Counter {
    fn build(self) -> Result<Block> {
        let mut block = Block::new(
            BlockType::Counter,
            vec![
                InputDef::new("CU", MemType::Bool, false),
                InputDef::new("CD", MemType::Bool, false),
                InputDef::new("R", MemType::Bool, false),
                InputDef::new("STEP", MemType::F32, true),
                InputDef::new("MAX", MemType::F32, true),
                InputDef::new("MIN", MemType::F32, true),
            ],
            vec![
                OutputDef::new("ENO", MemType::Bool),
                OutputDef::new("VAL", MemType::F32),
            ],
            BlockConfig::Counter {
                mode: self.mode,
                step: 1.0,
                max: f32::MAX,
                min: 0.0,
            },
        )?;
        bind_all(
            &mut block,
            vec![self.cu, self.cd, self.reset, self.step, self.max, self.min],
        )?;
        if let BlockConfig::Counter { max, min, .. } = block.config {
            if block.in_conn[4].is_none() && block.in_conn[5].is_none() && min > max {
                return Err(EmuError::OutOfRange(format!(
                    "counter min {min} is above max {max}"
                )));
            }
        }
        Ok(block)
    }
}

/// Square wave with duty `WIDTH / PERIOD`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clock {
    pub en: Input,
    /// Period in ms.
    pub period: Input,
    /// High time in ms.
    pub width: Input,
}

impl BlockSpec for Clock {
    fn build(self) -> Result<Block> {
        let mut block = Block::new(
            BlockType::Clock,
            vec![
                InputDef::new("EN", MemType::Bool, false),
                InputDef::new("PERIOD", MemType::U32, true),
                InputDef::new("WIDTH", MemType::U32, true),
            ],
            vec![OutputDef::new("Q", MemType::Bool)],
            BlockConfig::Clock {
                period: 1000,
                width: 500,
            },
        )?;
        bind_all(&mut block, vec![self.en, self.period, self.width])?;
        if let BlockConfig::Clock { period, width } = block.config {
            let constant = block.in_conn[1].is_none() && block.in_conn[2].is_none();
            if constant && (period == 0 || width > period) {
                return Err(EmuError::OutOfRange(format!(
                    "clock width {width} ms does not fit period {period} ms"
                )));
            }
        }
        Ok(block)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Selectors & Latch
// ══════════════════════════════════════════════════════════════════════════════

/// Read-side multiplexer: the placeholder output is redirected to
/// `options[SEL]` at runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InSelector {
    pub en: Input,
    pub sel: Input,
    pub options: Vec<Ref>,
}

impl BlockSpec for InSelector {
    fn build(self) -> Result<Block> {
        check_option_count(BlockType::InSelector, "options", self.options.len())?;
        let mut block = Block::new(
            BlockType::InSelector,
            vec![
                InputDef::new("EN", MemType::Bool, false),
                InputDef::new("SEL", MemType::U8, false),
            ],
            vec![OutputDef::placeholder("Q")],
            BlockConfig::InSelector {
                options: self.options,
            },
        )?;
        bind_all(&mut block, vec![self.en, self.sel])?;
        Ok(block)
    }
}

/// Demultiplexer: output `SEL` is true, the others false.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QSelector {
    pub en: Input,
    pub sel: Input,
    pub outputs: usize,
}

impl BlockSpec for QSelector {
    fn build(self) -> Result<Block> {
        check_option_count(BlockType::QSelector, "outputs", self.outputs)?;
        let mut block = Block::new(
            BlockType::QSelector,
            vec![
                InputDef::new("EN", MemType::Bool, false),
                InputDef::new("SEL", MemType::U8, false),
            ],
            (0..self.outputs)
                .map(|k| OutputDef::new(format!("Q{k}"), MemType::Bool))
                .collect(),
            BlockConfig::QSelector {
                outputs: self.outputs as u8,
            },
        )?;
        bind_all(&mut block, vec![self.en, self.sel])?;
        Ok(block)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Latch {
    pub mode: LatchMode,
    pub en: Input,
    pub set: Input,
    pub reset: Input,
}

impl BlockSpec for Latch {
    fn build(self) -> Result<Block> {
        let mut block = Block::new(
            BlockType::Latch,
            vec![
                InputDef::new("EN", MemType::Bool, false),
                InputDef::new("SET", MemType::Bool, false),
                InputDef::new("RESET", MemType::Bool, false),
            ],
            vec![OutputDef::new("Q", MemType::Bool)],
            BlockConfig::Latch { mode: self.mode },
        )?;
        bind_all(&mut block, vec![self.en, self.set, self.reset])?;
        Ok(block)
    }
}

/// Write-side selector over a list of option references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    pub sel: Input,
    pub options: Vec<Ref>,
}

impl BlockSpec for Selector {
    fn build(self) -> Result<Block> {
        check_option_count(BlockType::Selector, "options", self.options.len())?;
        let mut block = Block::new(
            BlockType::Selector,
            vec![InputDef::new("SEL", MemType::U8, false)],
            vec![OutputDef::placeholder("Q")],
            BlockConfig::Selector {
                options: self.options,
            },
        )?;
        block.bind(0, self.sel)?;
        Ok(block)
    }
}
