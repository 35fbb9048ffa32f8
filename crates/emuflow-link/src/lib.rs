//! emuflow link: moves dumps to a device and telemetry back.
//!
//! ```text
//! dump text → read_dump → Link::upload ──write──▶ Transport
//!                               ▲                     │
//!                               └── ACK / telemetry ──┘ (mpsc)
//! ```
//!
//! The link is single-task and cooperative: it only waits on the ACK of the
//! packet in flight (bounded by `ack_timeout`) or on cancellation.

mod dump_file;
mod error;
mod link;
mod transport;

pub use dump_file::{decode_hex, read_dump};
pub use error::LinkError;
pub use link::{Link, LinkConfig, UploadReport, DEFAULT_ACK_TIMEOUT};
pub use transport::{ChannelTransport, Transport};
