//! Frame decoding. The first byte selects the layout; the rest is a stream
//! of entries (PUBLISH) or fixed 32-byte records (ERROR_LOG, STATUS_LOG).

use emuflow_types::wire::{HDR_ERROR_LOG, HDR_PUBLISH, HDR_STATUS_LOG};
use emuflow_types::{MemType, Reader};

use crate::error::TelemetryError;
use crate::record::{
    ErrorFlags, ErrorRecord, Frame, PublishEntry, StatusRecord, LOG_RECORD_SIZE,
    PUBLISH_ENTRY_HEADER,
};

/// Decode one inbound frame, header byte included.
pub fn parse_frame(frame: &[u8]) -> Result<Frame, TelemetryError> {
    let (&header, body) = frame.split_first().ok_or(TelemetryError::Empty)?;
    match header {
        HDR_PUBLISH => parse_publish(body).map(Frame::Publish),
        HDR_ERROR_LOG => parse_records(body, "error log", read_error).map(Frame::ErrorLog),
        HDR_STATUS_LOG => parse_records(body, "status log", read_status).map(Frame::StatusLog),
        other => Err(TelemetryError::UnknownHeader(other)),
    }
}

fn parse_publish(body: &[u8]) -> Result<Vec<PublishEntry>, TelemetryError> {
    let mut r = Reader::new(body);
    let mut entries = Vec::new();
    while !r.is_empty() {
        // Offsets are reported relative to the whole frame.
        let offset = r.position() + 1;
        let truncated = |needed: usize| TelemetryError::Truncated {
            frame: "publish",
            offset,
            needed,
        };
        if r.remaining() < PUBLISH_ENTRY_HEADER {
            return Err(truncated(PUBLISH_ENTRY_HEADER - r.remaining()));
        }
        let (Some(instance), Some(bits), Some(_pad), Some(count)) = (r.u16(), r.u8(), r.u8(), r.u16())
        else {
            return Err(truncated(PUBLISH_ENTRY_HEADER));
        };

        let tag = (bits >> 3) & 0xF;
        let ty = MemType::from_tag(tag).ok_or(TelemetryError::InvalidMemType { tag, offset })?;
        let len = count as usize * ty.size();
        if r.remaining() < len {
            return Err(truncated(len - r.remaining()));
        }
        let values = (0..count)
            .map(|_| r.value(ty))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| truncated(len))?;

        entries.push(PublishEntry {
            instance,
            ctx: bits & 0x7,
            ty,
            updated: bits & 0x80 != 0,
            values,
        });
    }
    Ok(entries)
}

fn parse_records<T>(
    body: &[u8],
    frame: &'static str,
    read: fn(&mut Reader<'_>) -> Option<T>,
) -> Result<Vec<T>, TelemetryError> {
    let rest = body.len() % LOG_RECORD_SIZE;
    if rest != 0 {
        return Err(TelemetryError::Truncated {
            frame,
            offset: 1 + body.len() - rest,
            needed: LOG_RECORD_SIZE - rest,
        });
    }
    body.chunks_exact(LOG_RECORD_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            read(&mut Reader::new(chunk)).ok_or(TelemetryError::Truncated {
                frame,
                offset: 1 + i * LOG_RECORD_SIZE,
                needed: LOG_RECORD_SIZE,
            })
        })
        .collect()
}

fn read_error(r: &mut Reader<'_>) -> Option<ErrorRecord> {
    let code = r.u32()?;
    let owner = r.u16()?;
    let owner_idx = r.u16()?;
    let flags = ErrorFlags::from_bits(r.u8()?);
    r.skip(7)?;
    Some(ErrorRecord {
        code,
        owner,
        owner_idx,
        flags,
        time_ms: r.u64()?,
        cycle: r.u64()?,
    })
}

fn read_status(r: &mut Reader<'_>) -> Option<StatusRecord> {
    let log = r.u32()?;
    let owner = r.u32()?;
    let owner_idx = r.u16()?;
    r.skip(6)?;
    Some(StatusRecord {
        log,
        owner,
        owner_idx,
        time_ms: r.u64()?,
        cycle: r.u64()?,
    })
}
