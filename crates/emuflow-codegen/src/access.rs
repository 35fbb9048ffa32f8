//! Access-path encoding: symbolic [`Ref`] → self-describing wire record.
//!
//! ```text
//! header:u16  bits 0..3   mem_type
//!             bits 4..6   ctx id
//!             bit  7      all indices static
//!             bits 8..10  dims_cnt
//!             bits 11..13 static-index mask (bit i ⇒ index i is a u16)
//! instance:u16
//! per index:  u16 literal, or a nested access path
//! ```

use emuflow_types::{EmuError, Index, MemType, Ref, Result, Writer, MAX_REF_DIMS};
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Nesting limit when decoding untrusted bytes.
const MAX_DECODE_DEPTH: usize = 16;

/// Encode `r` against the session's current indices.
pub fn encode_access_path(session: &Session, r: &Ref) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    let mut stack = Vec::new();
    encode_into(session, r, &mut stack, &mut w)?;
    Ok(w.finish())
}

fn encode_into<'r>(
    session: &Session,
    r: &'r Ref,
    stack: &mut Vec<&'r str>,
    w: &mut Writer,
) -> Result<()> {
    if stack.contains(&r.alias.as_str()) {
        return Err(EmuError::CycleInReference(r.alias.clone()));
    }
    let (ctx, _) = session.locate(&r.alias)?;
    let inst = session.get(&r.alias)?;

    if inst.dims.len() > MAX_REF_DIMS {
        return Err(EmuError::OutOfRange(format!(
            "'{}' has {} dimensions, references address at most {MAX_REF_DIMS}",
            r.alias,
            inst.dims.len()
        )));
    }
    if r.indices.len() != inst.dims.len() {
        return Err(EmuError::ArityMismatch {
            alias: r.alias.clone(),
            expected: inst.dims.len(),
            got: r.indices.len(),
        });
    }

    let mut mask = 0u16;
    for (i, (index, &dim)) in r.indices.iter().zip(&inst.dims).enumerate() {
        if let Index::Static(n) = index {
            if *n >= dim {
                return Err(EmuError::OutOfRange(format!(
                    "index {n} of '{}' dimension {i} (size {dim})",
                    r.alias
                )));
            }
            mask |= 1 << i;
        }
    }
    let resolved = r.is_resolved();

    let mut header = (inst.ty.tag() as u16) & 0xF;
    header |= ((ctx as u16) & 0x7) << 4;
    header |= (resolved as u16) << 7;
    header |= ((inst.dims.len() as u16) & 0x7) << 8;
    header |= (mask & 0x7) << 11;
    w.u16(header).u16(inst.index);

    stack.push(&r.alias);
    for index in &r.indices {
        match index {
            Index::Static(n) => {
                w.u16(*n);
            }
            Index::Dynamic(inner) => encode_into(session, inner, stack, w)?,
        }
    }
    stack.pop();
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Decoder
// ══════════════════════════════════════════════════════════════════════════════

/// An access path read back from bytes, still numeric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedRef {
    pub ty: MemType,
    pub ctx: u8,
    pub resolved: bool,
    pub instance: u16,
    pub indices: Vec<DecodedIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodedIndex {
    Static(u16),
    Dynamic(Box<DecodedRef>),
}

/// Decode one access path from the front of `bytes`.
///
/// Returns the path and the number of bytes consumed.
pub fn decode_access_path(bytes: &[u8]) -> Result<(DecodedRef, usize)> {
    let mut pos = 0;
    let decoded = decode_at(bytes, &mut pos, 0)?;
    Ok((decoded, pos))
}

fn decode_at(bytes: &[u8], pos: &mut usize, depth: usize) -> Result<DecodedRef> {
    if depth >= MAX_DECODE_DEPTH {
        return Err(EmuError::MalformedPacket(format!(
            "access path nested deeper than {MAX_DECODE_DEPTH}"
        )));
    }
    let header = read_u16(bytes, pos)?;
    let instance = read_u16(bytes, pos)?;

    let tag = (header & 0xF) as u8;
    let ty = MemType::from_tag(tag)
        .ok_or_else(|| EmuError::MalformedPacket(format!("unknown memory type {tag}")))?;
    let ctx = ((header >> 4) & 0x7) as u8;
    let resolved = (header >> 7) & 1 == 1;
    let dims = ((header >> 8) & 0x7) as usize;
    let mask = (header >> 11) & 0x7;

    let mut indices = Vec::with_capacity(dims);
    for i in 0..dims {
        if mask & (1 << i) != 0 {
            indices.push(DecodedIndex::Static(read_u16(bytes, pos)?));
        } else {
            indices.push(DecodedIndex::Dynamic(Box::new(decode_at(bytes, pos, depth + 1)?)));
        }
    }
    Ok(DecodedRef {
        ty,
        ctx,
        resolved,
        instance,
        indices,
    })
}

fn read_u16(bytes: &[u8], pos: &mut usize) -> Result<u16> {
    let b = bytes
        .get(*pos..*pos + 2)
        .ok_or_else(|| EmuError::MalformedPacket(format!("access path truncated at byte {}", *pos)))?;
    *pos += 2;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}
