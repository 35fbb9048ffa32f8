//! emuflow telemetry: decodes device-to-host frames.
//!
//! ```text
//! 0xD0 PUBLISH     (inst:u16 bits:u8 pad:u8 el_cnt:u16 payload)*
//! 0xE0 ERROR_LOG   32-byte records
//! 0xE1 STATUS_LOG  32-byte records
//! ```
//!
//! [`parse_frame`] is a pure decoder; [`Telemetry`] wraps it with ordered
//! callbacks and an optional [`AliasDirectory`] for naming instances.

mod directory;
mod dispatch;
mod error;
mod parser;
mod record;

pub use directory::{AliasDirectory, NamedEntry};
pub use dispatch::Telemetry;
pub use error::TelemetryError;
pub use parser::parse_frame;
pub use record::{
    ErrorFlags, ErrorRecord, Frame, PublishEntry, StatusRecord, LOG_RECORD_SIZE,
    PUBLISH_ENTRY_HEADER,
};
