//! Dump emission: a finalized program → ordered packet lines.
//!
//! ```text
//! [ORD_RESET_ALL]
//! per non-empty context:  F0 config, F1 descriptors, FA scalars, FB arrays
//! ORD_PARSE_CODE_CFG, C0 block count
//! per block:              B0 header, B1 inputs, B2 outputs, BA data
//! ORD_LOOP_INIT, ORD_LOOP_START
//! ```

use std::fmt::{self, Write as _};

use emuflow_codegen::{Block, Session};
use emuflow_types::wire::HDR_CODE_CONFIG;
use emuflow_types::{EmuError, Order, Result, Writer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::CompilerConfig;

/// One packet with its human-readable annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpLine {
    pub comment: String,
    pub bytes: Vec<u8>,
}

impl DumpLine {
    fn new(comment: impl Into<String>, bytes: Vec<u8>) -> Self {
        // `#` delimits comments in the text form.
        let comment = comment.into().replace('#', "_");
        Self { comment, bytes }
    }

    fn order(order: Order) -> Self {
        Self::new(order.to_string(), order.to_packet())
    }
}

/// The emitted packet stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dump {
    lines: Vec<DumpLine>,
    annotate: bool,
}

impl Dump {
    pub fn lines(&self) -> &[DumpLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Raw packets in transmission order.
    pub fn packets(&self) -> impl Iterator<Item = &[u8]> {
        self.lines.iter().map(|l| l.bytes.as_slice())
    }

    /// One line per packet, uppercase hex, optionally `# comment # ` first.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            if self.annotate && !line.comment.is_empty() {
                let _ = write!(out, "# {} # ", line.comment);
            }
            for b in &line.bytes {
                let _ = write!(out, "{b:02X}");
            }
            out.push('\n');
        }
        out
    }

    /// Fingerprint of the packet stream; see [`fingerprint`].
    pub fn sha256(&self) -> String {
        fingerprint(self.packets())
    }
}

/// SHA-256 over every packet, each prefixed by its u32 LE length, as
/// lowercase hex. Comments do not contribute.
pub fn fingerprint<'a>(packets: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for packet in packets {
        hasher.update((packet.len() as u32).to_le_bytes());
        hasher.update(packet);
    }
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

impl fmt::Display for Dump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Emit the packet stream for `blocks` (already in execution order).
pub(crate) fn emit(session: &Session, blocks: &[Block], config: &CompilerConfig) -> Result<Dump> {
    let mut lines = Vec::new();
    if config.reset_before_load {
        lines.push(DumpLine::order(Order::ResetAll));
    }

    for ctx in session.contexts().filter(|c| !c.is_empty()) {
        let id = ctx.id();
        lines.push(DumpLine::new(format!("ctx {id} config"), ctx.config_packet()));
        for p in ctx.descriptor_packets(config.mtu)? {
            lines.push(DumpLine::new(format!("ctx {id} instances"), p));
        }
        for p in ctx.scalar_data_packets(config.mtu, config.omit_zero_scalars)? {
            lines.push(DumpLine::new(format!("ctx {id} scalar data"), p));
        }
        for p in ctx.array_data_packets(config.mtu)? {
            lines.push(DumpLine::new(format!("ctx {id} array data"), p));
        }
    }

    let count = u16::try_from(blocks.len())
        .map_err(|_| EmuError::OutOfRange(format!("{} blocks exceed u16", blocks.len())))?;
    lines.push(DumpLine::order(Order::ParseCodeConfig));
    let mut w = Writer::with_header(HDR_CODE_CONFIG);
    w.u16(count);
    lines.push(DumpLine::new(format!("code config, {count} blocks"), w.finish()));

    for (idx, block) in blocks.iter().enumerate() {
        if let Some(chain_len) = block.chain_len() {
            let remaining = blocks.len() - idx - 1;
            if chain_len as usize > remaining {
                return Err(EmuError::OutOfRange(format!(
                    "FOR block {idx} chains {chain_len} blocks, only {remaining} follow"
                )));
            }
        }
        for (comment, bytes) in block.packets(idx as u16, session)? {
            lines.push(DumpLine::new(comment, bytes));
        }
    }

    lines.push(DumpLine::order(Order::LoopInit));
    lines.push(DumpLine::order(Order::LoopStart));

    debug!(packets = lines.len(), blocks = blocks.len(), "dump emitted");
    Ok(Dump {
        lines,
        annotate: config.annotate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump(annotate: bool) -> Dump {
        Dump {
            lines: vec![
                DumpLine::new("ctx 0 config", vec![0xF0, 0x00]),
                DumpLine::order(Order::LoopStart),
            ],
            annotate,
        }
    }

    #[test]
    fn text_is_uppercase_hex() {
        assert_eq!(dump(false).to_text(), "F000\n0010\n");
        assert_eq!(
            dump(true).to_text(),
            "# ctx 0 config # F000\n# ORD_LOOP_START # 0010\n"
        );
    }

    #[test]
    fn comments_cannot_break_framing() {
        let line = DumpLine::new("alias #1", vec![0x01]);
        assert_eq!(line.comment, "alias _1");
    }

    #[test]
    fn fingerprint_ignores_comments() {
        let plain = dump(false).sha256();
        assert_eq!(plain.len(), 64);
        assert!(plain.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_eq!(plain, dump(true).sha256());

        let mut other = dump(false);
        other.lines[0].bytes.push(0x01);
        assert_ne!(plain, other.sha256());
    }
}
