//! Decoded telemetry records.

use emuflow_types::{MemType, Value};
use serde::{Deserialize, Serialize};

/// Size of one ERROR_LOG or STATUS_LOG record.
pub const LOG_RECORD_SIZE: usize = 32;

/// Size of a PUBLISH entry header, before its payload.
pub const PUBLISH_ENTRY_HEADER: usize = 6;

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum Frame {
    Publish(Vec<PublishEntry>),
    ErrorLog(Vec<ErrorRecord>),
    StatusLog(Vec<StatusRecord>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Publish(v) => v.len(),
            Frame::ErrorLog(v) => v.len(),
            Frame::StatusLog(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Current value of one subscribed instance.
///
/// ```text
/// inst:u16  bits:u8 (ctx 0..2, type 3..6, updated 7)  pad:u8  el_cnt:u16  payload
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishEntry {
    pub instance: u16,
    pub ctx: u8,
    pub ty: MemType,
    pub updated: bool,
    /// `el_cnt` values; one for scalars.
    pub values: Vec<Value>,
}

impl PublishEntry {
    pub fn is_scalar(&self) -> bool {
        self.values.len() == 1
    }

    /// The packed bitfield byte.
    pub fn bits(&self) -> u8 {
        (self.ctx & 0x7) | ((self.ty.tag() & 0xF) << 3) | ((self.updated as u8) << 7)
    }
}

/// `abort:1, warning:1, notice:1, depth:5`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFlags {
    pub abort: bool,
    pub warning: bool,
    pub notice: bool,
    pub depth: u8,
}

impl ErrorFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            abort: bits & 0x01 != 0,
            warning: bits & 0x02 != 0,
            notice: bits & 0x04 != 0,
            depth: bits >> 3,
        }
    }

    pub fn bits(self) -> u8 {
        (self.abort as u8)
            | ((self.warning as u8) << 1)
            | ((self.notice as u8) << 2)
            | ((self.depth & 0x1F) << 3)
    }
}

/// A device-side error.
///
/// ```text
/// code:u32 owner:u16 owner_idx:u16 flags:u8 pad:7 time_ms:u64 cycle:u64
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: u32,
    pub owner: u16,
    pub owner_idx: u16,
    pub flags: ErrorFlags,
    pub time_ms: u64,
    pub cycle: u64,
}

/// A device-side status message.
///
/// ```text
/// log:u32 owner:u32 owner_idx:u16 pad:6 time_ms:u64 cycle:u64
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub log: u32,
    pub owner: u32,
    pub owner_idx: u16,
    pub time_ms: u64,
    pub cycle: u64,
}
