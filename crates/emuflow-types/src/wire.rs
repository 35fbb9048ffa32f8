//! Wire-level constants and the little-endian packet writer/reader.
//!
//! Every packet travels as one transport write and starts with a single
//! header byte (orders are the exception: they are bare u16 words).
//!
//! ```text
//! 0xF0  context config          0xB0  block header
//! 0xF1  instance descriptors    0xB1  block input
//! 0xFA  scalar data             0xB2  block output
//! 0xFB  array data              0xBA  block data
//! 0xC0  code config             0xD0  PUBLISH (inbound)
//!                               0xE0  ERROR_LOG (inbound)
//!                               0xE1  STATUS_LOG (inbound)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Outbound packet headers ─────────────────────────────────────────────────

pub const HDR_CTX_CONFIG: u8 = 0xF0;
pub const HDR_INSTANCES: u8 = 0xF1;
pub const HDR_SCALAR_DATA: u8 = 0xFA;
pub const HDR_ARRAY_DATA: u8 = 0xFB;
pub const HDR_CODE_CONFIG: u8 = 0xC0;
pub const HDR_BLOCK_HEADER: u8 = 0xB0;
pub const HDR_BLOCK_INPUT: u8 = 0xB1;
pub const HDR_BLOCK_OUTPUT: u8 = 0xB2;
pub const HDR_BLOCK_DATA: u8 = 0xBA;

// ── Inbound telemetry headers ───────────────────────────────────────────────

pub const HDR_PUBLISH: u8 = 0xD0;
pub const HDR_ERROR_LOG: u8 = 0xE0;
pub const HDR_STATUS_LOG: u8 = 0xE1;

// ── Block data packet ids ───────────────────────────────────────────────────

pub const PKT_CONSTANTS: u8 = 0x00;
pub const PKT_CONFIG: u8 = 0x01;
pub const PKT_INSTRUCTIONS: u8 = 0x10;
pub const PKT_OPTION_BASE: u8 = 0x20;

/// Default transport MTU in bytes.
pub const DEFAULT_MTU: usize = 512;

/// Human-readable name of an outbound or inbound header byte.
pub fn header_name(header: u8) -> Option<&'static str> {
    Some(match header {
        HDR_CTX_CONFIG => "context config",
        HDR_INSTANCES => "instance descriptors",
        HDR_SCALAR_DATA => "scalar data",
        HDR_ARRAY_DATA => "array data",
        HDR_CODE_CONFIG => "code config",
        HDR_BLOCK_HEADER => "block header",
        HDR_BLOCK_INPUT => "block input",
        HDR_BLOCK_OUTPUT => "block output",
        HDR_BLOCK_DATA => "block data",
        HDR_PUBLISH => "publish",
        HDR_ERROR_LOG => "error log",
        HDR_STATUS_LOG => "status log",
        _ => return None,
    })
}

// ══════════════════════════════════════════════════════════════════════════════
// Orders
// ══════════════════════════════════════════════════════════════════════════════

/// Control opcodes telling the device parser what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order {
    Start,
    ParseVariables,
    ParseVariablesData,
    ParseCodeConfig,
    LoopInit,
    LoopStart,
    LoopStop,
    ResetAll,
    ResetBlocks,
    ClearMessageBuffer,
    ResetParserStatus,
}

impl Order {
    pub const ALL: [Order; 11] = [
        Order::Start,
        Order::ParseVariables,
        Order::ParseVariablesData,
        Order::ParseCodeConfig,
        Order::LoopInit,
        Order::LoopStart,
        Order::LoopStop,
        Order::ResetAll,
        Order::ResetBlocks,
        Order::ClearMessageBuffer,
        Order::ResetParserStatus,
    ];

    /// The 16-bit opcode.
    pub fn code(self) -> u16 {
        match self {
            Order::Start => 0xFFFF,
            Order::ParseVariables => 0xEEEE,
            Order::ParseVariablesData => 0xDDDD,
            Order::ParseCodeConfig => 0xAAAA,
            Order::LoopInit => 0x3000,
            Order::LoopStart => 0x1000,
            Order::LoopStop => 0x2000,
            Order::ResetAll => 0x0001,
            Order::ResetBlocks => 0x0002,
            Order::ClearMessageBuffer => 0x0003,
            Order::ResetParserStatus => 0xAA00,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.code() == code)
    }

    /// The two-byte packet carrying this order.
    pub fn to_packet(self) -> Vec<u8> {
        self.code().to_le_bytes().to_vec()
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Order::Start => "ORD_START",
            Order::ParseVariables => "ORD_PARSE_VARIABLES",
            Order::ParseVariablesData => "ORD_PARSE_VARIABLES_DATA",
            Order::ParseCodeConfig => "ORD_PARSE_CODE_CFG",
            Order::LoopInit => "ORD_LOOP_INIT",
            Order::LoopStart => "ORD_LOOP_START",
            Order::LoopStop => "ORD_LOOP_STOP",
            Order::ResetAll => "ORD_RESET_ALL",
            Order::ResetBlocks => "ORD_RESET_BLOCKS",
            Order::ClearMessageBuffer => "ORD_CLEAR_MSG_BUF",
            Order::ResetParserStatus => "ORD_RESET_PARSER_STATUS",
        };
        f.write_str(name)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Writer
// ══════════════════════════════════════════════════════════════════════════════

/// Little-endian byte sink for building packets.
#[derive(Debug, Clone, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Start a packet with its header byte.
    pub fn with_header(header: u8) -> Self {
        Self { buf: vec![header] }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn value(&mut self, v: &crate::Value) -> &mut Self {
        v.write_le(&mut self.buf);
        self
    }

    /// Overwrite a previously written u16 (used to patch counts).
    pub fn patch_u16(&mut self, offset: usize, v: u16) {
        self.buf[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Reader
// ══════════════════════════════════════════════════════════════════════════════

/// Little-endian cursor over a received packet.
///
/// Every accessor returns `None` when the input is exhausted.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Option<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Some(u64::from_le_bytes(raw))
    }

    pub fn f32(&mut self) -> Option<f32> {
        self.u32().map(f32::from_bits)
    }

    pub fn value(&mut self, ty: crate::MemType) -> Option<crate::Value> {
        let raw = self.take(ty.size())?;
        crate::Value::read_le(ty, raw)
    }
}
