//! ACK-gated upload and telemetry listening over one transport.
//!
//! Packet `n + 1` is written only after the device acknowledged packet `n`
//! with a one-byte notification, or after `ack_timeout` elapsed. Longer
//! notifications seen meanwhile are telemetry and are dispatched in arrival
//! order.

use std::time::Duration;

use emuflow_telemetry::Telemetry;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::transport::Transport;

/// Default wait for a ready-ACK before sending the next packet anyway.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub ack_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

/// Outcome of [`Link::upload`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub sent: usize,
    pub acked: usize,
    pub timed_out: usize,
}

enum Wait {
    Acked,
    TimedOut,
    Cancelled,
}

pub struct Link<T: Transport> {
    transport: T,
    inbound: mpsc::Receiver<Vec<u8>>,
    telemetry: Telemetry,
    config: LinkConfig,
    cancel: CancellationToken,
}

impl<T: Transport> Link<T> {
    /// `inbound` carries every notification the device sends, one frame per
    /// message.
    pub fn new(transport: T, inbound: mpsc::Receiver<Vec<u8>>, telemetry: Telemetry, config: LinkConfig) -> Self {
        Self {
            transport,
            inbound,
            telemetry,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that interrupts any pending wait and closes the transport.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn telemetry_mut(&mut self) -> &mut Telemetry {
        &mut self.telemetry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `packets` in order, one ACK wait per packet.
    ///
    /// Notifications already queued before a write are settled first: a
    /// one-byte ACK there belongs to a packet that timed out and is dropped,
    /// so it is never credited to the packet about to be written. An ACK
    /// still in flight when the write starts cannot be told apart from the
    /// new packet's ACK.
    pub async fn upload<'a, I>(&mut self, packets: I) -> Result<UploadReport, LinkError>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut report = UploadReport::default();
        for packet in packets {
            self.drain_stale();
            let written = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                res = self.transport.write(packet) => Some(res),
            };
            match written {
                Some(res) => res?,
                None => return Err(self.abort(report.sent).await),
            }
            report.sent += 1;

            match self.wait_ack().await? {
                Wait::Acked => report.acked += 1,
                Wait::TimedOut => {
                    warn!(
                        packet = report.sent - 1,
                        timeout_ms = self.config.ack_timeout.as_millis() as u64,
                        "no ACK, sending next packet"
                    );
                    report.timed_out += 1;
                }
                Wait::Cancelled => return Err(self.abort(report.sent).await),
            }
        }
        info!(
            sent = report.sent,
            acked = report.acked,
            timed_out = report.timed_out,
            "upload complete"
        );
        Ok(report)
    }

    /// Consume queued notifications without waiting.
    fn drain_stale(&mut self) {
        while let Ok(frame) = self.inbound.try_recv() {
            if frame.len() == 1 {
                debug!("late ACK discarded");
            } else {
                let _ = self.telemetry.dispatch(&frame);
            }
        }
    }

    async fn wait_ack(&mut self) -> Result<Wait, LinkError> {
        let deadline = Instant::now() + self.config.ack_timeout;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Wait::Cancelled),
                frame = self.inbound.recv() => match frame {
                    Some(frame) if frame.len() == 1 => return Ok(Wait::Acked),
                    Some(frame) => {
                        let _ = self.telemetry.dispatch(&frame);
                    }
                    None => return Err(LinkError::Disconnected),
                },
                _ = sleep_until(deadline) => return Ok(Wait::TimedOut),
            }
        }
    }

    async fn abort(&mut self, sent: usize) -> LinkError {
        info!(sent, "upload cancelled");
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "closing transport failed");
        }
        LinkError::Cancelled { sent }
    }

    /// Dispatch notifications until cancelled or the inbound channel closes.
    ///
    /// Returns the number of telemetry frames dispatched.
    pub async fn listen(&mut self) -> usize {
        let mut frames = 0;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                frame = self.inbound.recv() => match frame {
                    Some(frame) if frame.len() == 1 => debug!("stray ACK ignored"),
                    Some(frame) => {
                        frames += 1;
                        let _ = self.telemetry.dispatch(&frame);
                    }
                    None => break,
                },
            }
        }
        debug!(frames, "listen finished");
        frames
    }

    pub async fn close(&mut self) -> Result<(), LinkError> {
        self.transport.close().await?;
        Ok(())
    }
}
