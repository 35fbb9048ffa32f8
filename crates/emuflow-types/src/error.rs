use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::MemType;

/// Maximum number of diagnostics stored before further ones are only counted.
pub const MAX_DIAGNOSTICS: usize = 64;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Error category, determined by error code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Memory,
    Reference,
    Block,
    Ordering,
    Packet,
}

/// Numeric error code (E100–E599).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    // ── Memory errors (E100–E199) ──
    pub const DUPLICATE_ALIAS: Self = Self(100);
    pub const UNKNOWN_ALIAS: Self = Self(101);
    pub const RESERVED_ALIAS: Self = Self(102);
    pub const INVALID_CONTEXT: Self = Self(103);
    pub const RESERVED_CONTEXT: Self = Self(104);
    pub const SCALAR_WITH_DIMS: Self = Self(105);
    pub const TOO_MANY_DIMS: Self = Self(106);
    pub const DATA_LENGTH_MISMATCH: Self = Self(107);
    pub const ZERO_SIZE_PRUNED: Self = Self(110);

    // ── Reference errors (E200–E299) ──
    pub const ARITY_MISMATCH: Self = Self(200);
    pub const CYCLE_IN_REFERENCE: Self = Self(201);
    pub const INDEX_OUT_OF_RANGE: Self = Self(202);

    // ── Block errors (E300–E399) ──
    pub const TYPE_MISMATCH: Self = Self(300);
    pub const INPUT_IN_USE: Self = Self(301);
    pub const OUT_OF_RANGE: Self = Self(302);
    pub const NOT_FOLDABLE: Self = Self(303);
    pub const IMMUTABLE_TARGET: Self = Self(304);
    pub const EXPRESSION: Self = Self(305);
    pub const UNKNOWN_BLOCK: Self = Self(306);
    pub const TYPE_UNDETERMINED: Self = Self(310);
    pub const LATCH_SET_RESET_SHARED: Self = Self(311);

    // ── Ordering errors (E400–E499) ──
    pub const CYCLE_OR_UNREACHABLE: Self = Self(400);
    pub const NOT_FINALIZED: Self = Self(401);

    // ── Packet errors (E500–E599) ──
    pub const MTU_EXCEEDED: Self = Self(500);
    pub const MALFORMED_PACKET: Self = Self(501);
    pub const ACK_TIMEOUT: Self = Self(510);

    /// Get the category for this error code.
    pub fn category(self) -> ErrorCategory {
        match self.0 {
            100..=199 => ErrorCategory::Memory,
            200..=299 => ErrorCategory::Reference,
            300..=399 => ErrorCategory::Block,
            400..=499 => ErrorCategory::Ordering,
            _ => ErrorCategory::Packet,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Reference => write!(f, "reference"),
            Self::Block => write!(f, "block"),
            Self::Ordering => write!(f, "ordering"),
            Self::Packet => write!(f, "packet"),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// EmuError
// ══════════════════════════════════════════════════════════════════════════════

/// Fatal host-side errors. Any of these aborts the current program build.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmuError {
    #[error("alias '{0}' is already registered")]
    DuplicateAlias(String),

    #[error("unknown alias '{0}'")]
    UnknownAlias(String),

    #[error("alias '{0}' has the reserved block-output form")]
    ReservedAlias(String),

    #[error("context id {0} is outside 0..=7")]
    InvalidContext(u8),

    #[error("context {0} is reserved for block outputs")]
    ReservedContext(u8),

    #[error("scalar '{0}' cannot declare dimensions")]
    ScalarWithDims(String),

    #[error("'{alias}' declares {dims} dimensions, at most 7 are allowed")]
    TooManyDims { alias: String, dims: usize },

    #[error("'{alias}' has {got} data items, dimensions require {expected}")]
    DataLengthMismatch {
        alias: String,
        expected: usize,
        got: usize,
    },

    #[error("reference to '{alias}' has {got} indices, instance has {expected} dimensions")]
    ArityMismatch {
        alias: String,
        expected: usize,
        got: usize,
    },

    #[error("reference cycle through '{0}'")]
    CycleInReference(String),

    #[error("type mismatch: {source_ty} cannot be written to '{target}' ({target_ty})")]
    TypeMismatch {
        target: String,
        source_ty: MemType,
        target_ty: MemType,
    },

    #[error("input {slot} of block {block} is already connected")]
    InputInUse { block: u32, slot: usize },

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("input '{input}' of {block} blocks cannot take a constant")]
    NotFoldable { block: &'static str, input: String },

    #[error("'{0}' is not mutable and cannot be a Set-Global target")]
    ImmutableTarget(String),

    #[error("expression error: {0}")]
    Expression(String),

    #[error("unknown block {0}")]
    UnknownBlock(u32),

    #[error("program must be finalized before emission")]
    NotFinalized,

    #[error("packet of {size} bytes exceeds MTU {mtu}")]
    MtuExceeded { size: usize, mtu: usize },

    #[error("malformed packet: {0}")]
    MalformedPacket(String),
}

impl EmuError {
    /// The stable error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            EmuError::DuplicateAlias(_) => ErrorCode::DUPLICATE_ALIAS,
            EmuError::UnknownAlias(_) => ErrorCode::UNKNOWN_ALIAS,
            EmuError::ReservedAlias(_) => ErrorCode::RESERVED_ALIAS,
            EmuError::InvalidContext(_) => ErrorCode::INVALID_CONTEXT,
            EmuError::ReservedContext(_) => ErrorCode::RESERVED_CONTEXT,
            EmuError::ScalarWithDims(_) => ErrorCode::SCALAR_WITH_DIMS,
            EmuError::TooManyDims { .. } => ErrorCode::TOO_MANY_DIMS,
            EmuError::DataLengthMismatch { .. } => ErrorCode::DATA_LENGTH_MISMATCH,
            EmuError::ArityMismatch { .. } => ErrorCode::ARITY_MISMATCH,
            EmuError::CycleInReference(_) => ErrorCode::CYCLE_IN_REFERENCE,
            EmuError::TypeMismatch { .. } => ErrorCode::TYPE_MISMATCH,
            EmuError::InputInUse { .. } => ErrorCode::INPUT_IN_USE,
            EmuError::OutOfRange(_) => ErrorCode::OUT_OF_RANGE,
            EmuError::NotFoldable { .. } => ErrorCode::NOT_FOLDABLE,
            EmuError::ImmutableTarget(_) => ErrorCode::IMMUTABLE_TARGET,
            EmuError::Expression(_) => ErrorCode::EXPRESSION,
            EmuError::UnknownBlock(_) => ErrorCode::UNKNOWN_BLOCK,
            EmuError::NotFinalized => ErrorCode::NOT_FINALIZED,
            EmuError::MtuExceeded { .. } => ErrorCode::MTU_EXCEEDED,
            EmuError::MalformedPacket(_) => ErrorCode::MALFORMED_PACKET,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Diagnostics
// ══════════════════════════════════════════════════════════════════════════════

/// A structured diagnostic, serializable for tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            category: code.category(),
            message: message.into(),
        }
    }

    pub fn error(err: &EmuError) -> Self {
        let code = err.code();
        Self {
            code,
            severity: Severity::Error,
            category: code.category(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.code, self.category, self.message)
    }
}

/// Warnings and errors collected over one program build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub total_errors: usize,
    pub total_warnings: usize,
}

impl Diagnostics {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }

    /// Whether a warning with `code` was recorded.
    pub fn has_warning(&self, code: ErrorCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    /// Add an error, respecting the [`MAX_DIAGNOSTICS`] limit.
    pub fn push_error(&mut self, error: Diagnostic) {
        if self.errors.len() < MAX_DIAGNOSTICS {
            self.errors.push(error);
        }
        self.total_errors += 1;
    }

    /// Add a warning, respecting the [`MAX_DIAGNOSTICS`] limit.
    pub fn push_warning(&mut self, warning: Diagnostic) {
        if self.warnings.len() < MAX_DIAGNOSTICS {
            self.warnings.push(warning);
        }
        self.total_warnings += 1;
    }

    /// Append everything from `other`.
    pub fn extend(&mut self, other: Diagnostics) {
        for e in other.errors {
            self.push_error(e);
        }
        for w in other.warnings {
            self.push_warning(w);
        }
    }
}
