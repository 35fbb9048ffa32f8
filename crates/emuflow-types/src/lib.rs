//! Shared types for the emuflow compiler.
//!
//! This crate defines the primitive memory types, symbolic references,
//! wire-level constants, the little-endian packet writer/reader and the
//! error types used across all compiler stages.

mod error;
pub mod mem_type;
pub mod reference;
pub mod wire;

pub use error::{
    Diagnostic, Diagnostics, EmuError, ErrorCategory, ErrorCode, Severity, MAX_DIAGNOSTICS,
};
pub use mem_type::{MemType, Value};
pub use reference::{Index, Ref};
pub use wire::{Order, Reader, Writer};

/// Result type used throughout the emuflow compiler.
pub type Result<T> = std::result::Result<T, EmuError>;

/// Highest addressable memory context id (3 bits on the wire).
pub const MAX_CONTEXT_ID: u8 = 7;

/// Maximum number of dimensions an instance may declare.
pub const MAX_DIMS: usize = 7;

/// Maximum number of dimensions an access path can index (3-bit mask).
pub const MAX_REF_DIMS: usize = 3;
