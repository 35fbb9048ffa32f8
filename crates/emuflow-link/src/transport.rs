//! The outbound half of a device connection.
//!
//! A transport is message-oriented: one `write` carries exactly one packet.
//! Inbound notifications do not go through the trait; the transport feeds
//! them into the `mpsc` channel handed to the [`Link`](crate::Link).

use std::future::Future;
use std::io;

use tokio::sync::mpsc;

pub trait Transport: Send {
    /// Send one packet.
    fn write(&mut self, packet: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Release the connection. Writes after close fail.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// In-process transport: every written packet is forwarded to a channel.
///
/// Pairs with an emulator (or a test) running in the same process.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl ChannelTransport {
    /// A transport and the receiver observing what it writes.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

impl Transport for ChannelTransport {
    async fn write(&mut self, packet: &[u8]) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))?;
        tx.send(packet.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.tx = None;
        Ok(())
    }
}
