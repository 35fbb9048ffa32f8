use thiserror::Error;

/// Errors raised while decoding an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelemetryError {
    #[error("empty frame")]
    Empty,

    #[error("unknown frame header 0x{0:02X}")]
    UnknownHeader(u8),

    #[error("{frame} frame truncated at byte {offset}: {needed} more bytes expected")]
    Truncated {
        frame: &'static str,
        offset: usize,
        needed: usize,
    },

    #[error("invalid memory type {tag} in entry at byte {offset}")]
    InvalidMemType { tag: u8, offset: usize },
}
