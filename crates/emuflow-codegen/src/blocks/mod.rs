//! Block model and per-block packet emission.
//!
//! Every block emits, in order:
//!
//! ```text
//! 0xB0  idx:u16 type:u8 in_cnt:u8 q_cnt:u8 mask:u16
//! 0xB1  idx:u16 slot:u8 access-path        (one per connected input)
//! 0xB2  idx:u16 slot:u8 access-path        (one per output)
//! 0xBA  idx:u16 type:u8 packet_id:u8 payload…
//! ```

mod kinds;

use std::fmt;

use emuflow_expr::Bytecode;
use emuflow_types::reference::block_output_alias;
use emuflow_types::wire::{
    HDR_BLOCK_DATA, HDR_BLOCK_HEADER, HDR_BLOCK_INPUT, HDR_BLOCK_OUTPUT, PKT_CONFIG,
    PKT_CONSTANTS, PKT_INSTRUCTIONS, PKT_OPTION_BASE,
};
use emuflow_types::{Diagnostic, EmuError, ErrorCode, MemType, Ref, Result, Writer};
use serde::{Deserialize, Serialize};

use crate::session::Session;

pub use kinds::{
    Clock, Compare, Counter, CounterMode, For, ForCondition, ForOperator, InSelector, Latch,
    LatchMode, Logic, Math, QSelector, Selector, SetGlobal, Timer, TimerMode,
};

/// Maximum inputs per block (one mask bit each).
pub const MAX_INPUTS: usize = 16;
/// Maximum selector options / Q-selector outputs.
pub const MAX_OPTIONS: usize = 16;

// ══════════════════════════════════════════════════════════════════════════════
// Block types
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    Math,
    Logic,
    Compare,
    SetGlobal,
    For,
    Timer,
    Counter,
    Clock,
    InSelector,
    QSelector,
    Latch,
    Selector,
}

impl BlockType {
    pub fn tag(self) -> u8 {
        match self {
            BlockType::Math => 0x01,
            BlockType::Logic => 0x02,
            BlockType::Compare => 0x03,
            BlockType::SetGlobal => 0x04,
            BlockType::For => 0x05,
            BlockType::Timer => 0x06,
            BlockType::Counter => 0x07,
            BlockType::Clock => 0x08,
            BlockType::InSelector => 0x09,
            BlockType::QSelector => 0x0A,
            BlockType::Latch => 0x0B,
            BlockType::Selector => 0x0C,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BlockType::Math => "Math",
            BlockType::Logic => "Logic",
            BlockType::Compare => "Compare",
            BlockType::SetGlobal => "SetGlobal",
            BlockType::For => "For",
            BlockType::Timer => "Timer",
            BlockType::Counter => "Counter",
            BlockType::Clock => "Clock",
            BlockType::InSelector => "InSelector",
            BlockType::QSelector => "QSelector",
            BlockType::Latch => "Latch",
            BlockType::Selector => "Selector",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Inputs & outputs
// ══════════════════════════════════════════════════════════════════════════════

/// What a construction argument binds an input slot to.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Input {
    /// Folded into the block configuration.
    Const(f64),
    Ref(Ref),
    /// Left unconnected (mask bit clear).
    #[default]
    None,
}

impl From<f64> for Input {
    fn from(v: f64) -> Self {
        Input::Const(v)
    }
}

impl From<Ref> for Input {
    fn from(r: Ref) -> Self {
        Input::Ref(r)
    }
}

impl From<&str> for Input {
    fn from(alias: &str) -> Self {
        Input::Ref(Ref::new(alias))
    }
}

impl From<Option<Ref>> for Input {
    fn from(r: Option<Ref>) -> Self {
        r.map_or(Input::None, Input::Ref)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDef {
    pub name: String,
    pub ty: MemType,
    /// Accepts a constant instead of a reference.
    pub foldable: bool,
}

impl InputDef {
    pub fn new(name: impl Into<String>, ty: MemType, foldable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            foldable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDef {
    pub name: String,
    pub ty: MemType,
    /// Placeholder whose instance pointer the runtime redirects.
    pub standalone: bool,
}

impl OutputDef {
    pub fn new(name: impl Into<String>, ty: MemType) -> Self {
        Self {
            name: name.into(),
            ty,
            standalone: false,
        }
    }

    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: MemType::Bool,
            standalone: true,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Configuration
// ══════════════════════════════════════════════════════════════════════════════

/// Kind-specific configuration carried in block-data packets.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockConfig {
    Expression {
        source: String,
        code: Bytecode,
    },
    SetGlobal,
    For {
        condition: ForCondition,
        operator: ForOperator,
        start: f32,
        limit: f32,
        step: f32,
        chain_len: u16,
    },
    Timer {
        mode: TimerMode,
        pt: u32,
    },
    Counter {
        mode: CounterMode,
        step: f32,
        max: f32,
        min: f32,
    },
    Clock {
        period: u32,
        width: u32,
    },
    InSelector {
        options: Vec<Ref>,
    },
    QSelector {
        outputs: u8,
    },
    Latch {
        mode: LatchMode,
    },
    Selector {
        options: Vec<Ref>,
    },
}

impl BlockConfig {
    /// Store a constant for `slot`. Returns `Ok(false)` if the slot is not
    /// foldable; millisecond slots reject values a `u32` cannot hold.
    fn fold(&mut self, slot: usize, value: f64) -> Result<bool> {
        match (self, slot) {
            (BlockConfig::For { start, .. }, 1) => *start = value as f32,
            (BlockConfig::For { limit, .. }, 2) => *limit = value as f32,
            (BlockConfig::For { step, .. }, 3) => *step = value as f32,
            (BlockConfig::Timer { pt, .. }, 1) => *pt = millis("PT", value)?,
            (BlockConfig::Counter { step, .. }, 3) => *step = value as f32,
            (BlockConfig::Counter { max, .. }, 4) => *max = value as f32,
            (BlockConfig::Counter { min, .. }, 5) => *min = value as f32,
            (BlockConfig::Clock { period, .. }, 1) => *period = millis("PERIOD", value)?,
            (BlockConfig::Clock { width, .. }, 2) => *width = millis("WIDTH", value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// `(packet_id, payload)` pairs for the block-data packets.
    fn data(&self, session: &Session) -> Result<Vec<(u8, Vec<u8>)>> {
        let mut w = Writer::new();
        let packets = match self {
            BlockConfig::Expression { code, .. } => vec![
                (PKT_CONSTANTS, code.constants_payload()),
                (PKT_INSTRUCTIONS, code.instructions_payload()),
            ],
            BlockConfig::SetGlobal => Vec::new(),
            BlockConfig::For {
                condition,
                operator,
                start,
                limit,
                step,
                chain_len,
            } => {
                w.u16(*chain_len)
                    .u8(*condition as u8)
                    .u8(*operator as u8)
                    .f32(*start)
                    .f32(*limit)
                    .f32(*step);
                vec![(PKT_CONFIG, w.finish())]
            }
            BlockConfig::Timer { mode, pt } => {
                w.u8(*mode as u8).u32(*pt);
                vec![(PKT_CONFIG, w.finish())]
            }
            BlockConfig::Counter {
                mode,
                step,
                max,
                min,
            } => {
                w.u8(*mode as u8).f32(*step).f32(*max).f32(*min);
                vec![(PKT_CONFIG, w.finish())]
            }
            BlockConfig::Clock { period, width } => {
                w.u32(*period).u32(*width);
                vec![(PKT_CONFIG, w.finish())]
            }
            BlockConfig::InSelector { options } | BlockConfig::Selector { options } => options
                .iter()
                .enumerate()
                .map(|(n, r)| Ok((PKT_OPTION_BASE + n as u8, session.encode(r)?)))
                .collect::<Result<Vec<_>>>()?,
            BlockConfig::QSelector { outputs } => vec![(PKT_CONFIG, vec![*outputs])],
            BlockConfig::Latch { mode } => vec![(PKT_CONFIG, vec![*mode as u8])],
        };
        Ok(packets)
    }
}

/// A whole, non-negative number of milliseconds that fits a `u32`.
fn millis(input: &str, value: f64) -> Result<u32> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
        Ok(value as u32)
    } else {
        Err(EmuError::OutOfRange(format!(
            "{input} must be a whole number of milliseconds, got {value}"
        )))
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Block
// ══════════════════════════════════════════════════════════════════════════════

/// A computational node.
///
/// `id` is fixed at construction. `label` names the block inside its output
/// aliases (`"{label}_q_{k}"`): the construction id while the program is
/// being built, the execution index in the resolved copies `finalize` makes.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: u32,
    pub label: u32,
    pub ty: BlockType,
    pub inputs: Vec<InputDef>,
    pub in_conn: Vec<Option<Ref>>,
    pub outputs: Vec<OutputDef>,
    pub config: BlockConfig,
}

/// Anything that can be turned into a [`Block`].
pub trait BlockSpec {
    fn build(self) -> Result<Block>;
}

impl BlockSpec for Block {
    fn build(self) -> Result<Block> {
        Ok(self)
    }
}

impl Block {
    pub fn new(
        ty: BlockType,
        inputs: Vec<InputDef>,
        outputs: Vec<OutputDef>,
        config: BlockConfig,
    ) -> Result<Self> {
        if inputs.len() > MAX_INPUTS {
            return Err(EmuError::OutOfRange(format!(
                "{ty} block has {} inputs, at most {MAX_INPUTS}",
                inputs.len()
            )));
        }
        if outputs.len() > u8::MAX as usize {
            return Err(EmuError::OutOfRange(format!(
                "{ty} block has {} outputs",
                outputs.len()
            )));
        }
        Ok(Self {
            id: 0,
            label: 0,
            ty,
            in_conn: vec![None; inputs.len()],
            inputs,
            outputs,
            config,
        })
    }

    /// Bind a construction argument to `slot`.
    pub fn bind(&mut self, slot: usize, input: Input) -> Result<()> {
        match input {
            Input::None => Ok(()),
            Input::Ref(r) => self.connect(slot, r),
            Input::Const(v) => {
                let def = self.input_def(slot)?;
                let (foldable, name) = (def.foldable, def.name.clone());
                if !foldable || !self.config.fold(slot, v)? {
                    return Err(EmuError::NotFoldable {
                        block: self.ty.name(),
                        input: name,
                    });
                }
                Ok(())
            }
        }
    }

    /// Connect `slot` to a reference. A slot can be connected once.
    pub fn connect(&mut self, slot: usize, r: Ref) -> Result<()> {
        self.input_def(slot)?;
        if self.in_conn[slot].is_some() {
            return Err(EmuError::InputInUse {
                block: self.id,
                slot,
            });
        }
        self.in_conn[slot] = Some(r);
        Ok(())
    }

    fn input_def(&self, slot: usize) -> Result<&InputDef> {
        self.inputs.get(slot).ok_or_else(|| {
            EmuError::OutOfRange(format!(
                "{} block has no input slot {slot}",
                self.ty
            ))
        })
    }

    /// Bit `i` set iff input slot `i` is connected.
    pub fn mask(&self) -> u16 {
        self.in_conn
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .fold(0, |m, (i, _)| m | (1 << i))
    }

    pub fn output_alias(&self, k: usize) -> String {
        block_output_alias(self.label, k)
    }

    /// Every stored reference: connected inputs, then selector options.
    pub fn refs(&self) -> Vec<&Ref> {
        let mut refs: Vec<&Ref> = self.in_conn.iter().flatten().collect();
        if let BlockConfig::InSelector { options } | BlockConfig::Selector { options } = &self.config {
            refs.extend(options);
        }
        refs
    }

    /// Apply `f` to every stored reference, nested dynamic indices included.
    pub fn rewrite_refs(&mut self, f: &mut impl FnMut(&mut Ref)) {
        for r in self.in_conn.iter_mut().flatten() {
            r.walk_mut(f);
        }
        if let BlockConfig::InSelector { options } | BlockConfig::Selector { options } =
            &mut self.config
        {
            for r in options {
                r.walk_mut(f);
            }
        }
    }

    pub fn chain_len(&self) -> Option<u16> {
        match self.config {
            BlockConfig::For { chain_len, .. } => Some(chain_len),
            _ => None,
        }
    }

    pub fn set_chain_len(&mut self, len: u16) {
        if let BlockConfig::For { chain_len, .. } = &mut self.config {
            *chain_len = len;
        }
    }

    // ── Validation ──────────────────────────────────────────────────────────

    /// Check every reference against the session and return warnings.
    ///
    /// Errors abort emission; warnings are informational.
    pub fn validate(&self, session: &Session) -> Result<Vec<Diagnostic>> {
        for r in self.refs() {
            session.encode(r)?;
        }
        let mut warnings = Vec::new();
        match self.ty {
            BlockType::SetGlobal => self.validate_set_global(session, &mut warnings)?,
            BlockType::Latch => {
                if let (Some(set), Some(reset)) = (&self.in_conn[1], &self.in_conn[2]) {
                    if set == reset {
                        warnings.push(Diagnostic::warning(
                            ErrorCode::LATCH_SET_RESET_SHARED,
                            format!(
                                "latch {} has SET and RESET both bound to '{set}'",
                                self.label
                            ),
                        ));
                    }
                }
            }
            _ => {}
        }
        Ok(warnings)
    }

    fn validate_set_global(&self, session: &Session, warnings: &mut Vec<Diagnostic>) -> Result<()> {
        let Some(target) = &self.in_conn[1] else {
            return Err(EmuError::OutOfRange(format!(
                "set-global block {} has no target",
                self.label
            )));
        };
        let target_inst = session.get(&target.alias)?;
        if !target_inst.flags.mutable {
            return Err(EmuError::ImmutableTarget(target.alias.clone()));
        }
        let source = self
            .in_conn[0]
            .as_ref()
            .map(|r| session.get(&r.alias))
            .transpose()?
            .filter(|inst| !inst.flags.standalone);
        match source {
            Some(src) => {
                if src.ty.is_bool() != target_inst.ty.is_bool() {
                    return Err(EmuError::TypeMismatch {
                        target: target.alias.clone(),
                        source_ty: src.ty,
                        target_ty: target_inst.ty,
                    });
                }
            }
            None => warnings.push(Diagnostic::warning(
                ErrorCode::TYPE_UNDETERMINED,
                format!(
                    "set-global block {}: source type of '{target}' cannot be determined",
                    self.label
                ),
            )),
        }
        Ok(())
    }

    // ── Packets ─────────────────────────────────────────────────────────────

    /// All packets of this block at execution index `idx`, with comments.
    pub fn packets(&self, idx: u16, session: &Session) -> Result<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();

        let mut w = Writer::with_header(HDR_BLOCK_HEADER);
        w.u16(idx)
            .u8(self.ty.tag())
            .u8(self.inputs.len() as u8)
            .u8(self.outputs.len() as u8)
            .u16(self.mask());
        out.push((format!("{} block {idx}", self.ty), w.finish()));

        for (slot, r) in self.in_conn.iter().enumerate() {
            let Some(r) = r else { continue };
            let mut w = Writer::with_header(HDR_BLOCK_INPUT);
            w.u16(idx).u8(slot as u8).bytes(&session.encode(r)?);
            out.push((format!("in {} <- {r}", self.inputs[slot].name), w.finish()));
        }

        for (k, def) in self.outputs.iter().enumerate() {
            let alias = self.output_alias(k);
            let mut w = Writer::with_header(HDR_BLOCK_OUTPUT);
            w.u16(idx).u8(k as u8).bytes(&session.encode(&Ref::new(&alias))?);
            out.push((format!("out {} -> {alias}", def.name), w.finish()));
        }

        for (packet_id, payload) in self.config.data(session)? {
            let mut w = Writer::with_header(HDR_BLOCK_DATA);
            w.u16(idx).u8(self.ty.tag()).u8(packet_id).bytes(&payload);
            out.push((format!("data 0x{packet_id:02X}"), w.finish()));
        }
        Ok(out)
    }
}
