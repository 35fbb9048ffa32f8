use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload cancelled after {sent} packets")]
    Cancelled { sent: usize },

    #[error("inbound channel closed")]
    Disconnected,

    #[error("dump line {line}: {message}")]
    Dump { line: usize, message: String },
}
