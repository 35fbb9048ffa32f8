//! Primitive memory types and typed scalar values.
//!
//! The emulator knows exactly nine scalar kinds. Each one has a fixed
//! byte size and a 4-bit tag used in every bitfield that names a type:
//!
//! | Tag | Type | Size | Pack code |
//! |-----|------|------|-----------|
//! | 0   | U8   | 1    | `B`       |
//! | 1   | U16  | 2    | `H`       |
//! | 2   | U32  | 4    | `I`       |
//! | 3   | I8   | 1    | `b`       |
//! | 4   | I16  | 2    | `h`       |
//! | 5   | I32  | 4    | `i`       |
//! | 6   | F32  | 4    | `f`       |
//! | 7   | F64  | 8    | `d`       |
//! | 8   | BOOL | 1    | `?`       |
//!
//! All values are encoded little-endian.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A primitive memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemType {
    U8 = 0,
    U16 = 1,
    U32 = 2,
    I8 = 3,
    I16 = 4,
    I32 = 5,
    F32 = 6,
    F64 = 7,
    Bool = 8,
}

impl MemType {
    /// Every type, in tag order. Context tables are iterated in this order.
    pub const ALL: [MemType; 9] = [
        MemType::U8,
        MemType::U16,
        MemType::U32,
        MemType::I8,
        MemType::I16,
        MemType::I32,
        MemType::F32,
        MemType::F64,
        MemType::Bool,
    ];

    /// The 4-bit wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Decode a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            MemType::U8 | MemType::I8 | MemType::Bool => 1,
            MemType::U16 | MemType::I16 => 2,
            MemType::U32 | MemType::I32 | MemType::F32 => 4,
            MemType::F64 => 8,
        }
    }

    /// Little-endian struct pack code for this type.
    pub fn pack_code(self) -> char {
        match self {
            MemType::U8 => 'B',
            MemType::U16 => 'H',
            MemType::U32 => 'I',
            MemType::I8 => 'b',
            MemType::I16 => 'h',
            MemType::I32 => 'i',
            MemType::F32 => 'f',
            MemType::F64 => 'd',
            MemType::Bool => '?',
        }
    }

    /// Whether values of this type can be used as array indices.
    pub fn is_integral(self) -> bool {
        !matches!(self, MemType::F32 | MemType::F64)
    }

    /// Whether this is the boolean type.
    pub fn is_bool(self) -> bool {
        self == MemType::Bool
    }
}

impl fmt::Display for MemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemType::U8 => "U8",
            MemType::U16 => "U16",
            MemType::U32 => "U32",
            MemType::I8 => "I8",
            MemType::I16 => "I16",
            MemType::I32 => "I32",
            MemType::F32 => "F32",
            MemType::F64 => "F64",
            MemType::Bool => "BOOL",
        };
        f.write_str(name)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Value
// ══════════════════════════════════════════════════════════════════════════════

/// A single typed scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "UPPERCASE")]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    I8(i8),
    I16(i16),
    I32(i32),
    F32(f32),
    F64(f64),
    Bool(bool),
}

impl Value {
    /// The memory type of this value.
    pub fn mem_type(&self) -> MemType {
        match self {
            Value::U8(_) => MemType::U8,
            Value::U16(_) => MemType::U16,
            Value::U32(_) => MemType::U32,
            Value::I8(_) => MemType::I8,
            Value::I16(_) => MemType::I16,
            Value::I32(_) => MemType::I32,
            Value::F32(_) => MemType::F32,
            Value::F64(_) => MemType::F64,
            Value::Bool(_) => MemType::Bool,
        }
    }

    /// Convert a number into a value of the given type.
    ///
    /// Integer targets saturate at their bounds and truncate toward zero;
    /// `Bool` is `true` for any non-zero input.
    pub fn cast(ty: MemType, n: f64) -> Self {
        match ty {
            MemType::U8 => Value::U8(n as u8),
            MemType::U16 => Value::U16(n as u16),
            MemType::U32 => Value::U32(n as u32),
            MemType::I8 => Value::I8(n as i8),
            MemType::I16 => Value::I16(n as i16),
            MemType::I32 => Value::I32(n as i32),
            MemType::F32 => Value::F32(n as f32),
            MemType::F64 => Value::F64(n),
            MemType::Bool => Value::Bool(n != 0.0),
        }
    }

    /// The default (all-zero) value of a type.
    pub fn zero(ty: MemType) -> Self {
        Self::cast(ty, 0.0)
    }

    /// Re-type this value, going through `f64`.
    pub fn convert(self, ty: MemType) -> Self {
        if self.mem_type() == ty {
            self
        } else {
            Self::cast(ty, self.as_f64())
        }
    }

    /// Numeric view of the value.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::U8(v) => v as f64,
            Value::U16(v) => v as f64,
            Value::U32(v) => v as f64,
            Value::I8(v) => v as f64,
            Value::I16(v) => v as f64,
            Value::I32(v) => v as f64,
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
            Value::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Whether the value encodes as all-zero bytes.
    pub fn is_zero(&self) -> bool {
        match *self {
            Value::F32(v) => v.to_bits() == 0,
            Value::F64(v) => v.to_bits() == 0,
            Value::Bool(v) => !v,
            _ => self.as_f64() == 0.0,
        }
    }

    /// Append the little-endian encoding to `buf`.
    pub fn write_le(&self, buf: &mut Vec<u8>) {
        match *self {
            Value::U8(v) => buf.push(v),
            Value::U16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::U32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::I8(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::I16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::I32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::F32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::F64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Bool(v) => buf.push(v as u8),
        }
    }

    /// Decode one value of type `ty` from the front of `bytes`.
    ///
    /// Returns `None` if `bytes` is shorter than `ty.size()`.
    pub fn read_le(ty: MemType, bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..ty.size())?;
        let value = match ty {
            MemType::U8 => Value::U8(raw[0]),
            MemType::U16 => Value::U16(u16::from_le_bytes([raw[0], raw[1]])),
            MemType::U32 => Value::U32(u32::from_le_bytes(raw.try_into().ok()?)),
            MemType::I8 => Value::I8(raw[0] as i8),
            MemType::I16 => Value::I16(i16::from_le_bytes([raw[0], raw[1]])),
            MemType::I32 => Value::I32(i32::from_le_bytes(raw.try_into().ok()?)),
            MemType::F32 => Value::F32(f32::from_le_bytes(raw.try_into().ok()?)),
            MemType::F64 => Value::F64(f64::from_le_bytes(raw.try_into().ok()?)),
            MemType::Bool => Value::Bool(raw[0] != 0),
        };
        Some(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            other => write!(f, "{}", other.as_f64()),
        }
    }
}
