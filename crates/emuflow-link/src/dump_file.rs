//! Reading dump text back into packets.
//!
//! One packet per line, hex encoded. `# … #` spans are comments, blank lines
//! are skipped and whitespace between hex digits is ignored.

use crate::error::LinkError;

/// Parse dump text into raw packets.
pub fn read_dump(text: &str) -> Result<Vec<Vec<u8>>, LinkError> {
    let mut packets = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line_no = n + 1;
        let hex = strip_comments(line).ok_or_else(|| LinkError::Dump {
            line: line_no,
            message: "unterminated comment".into(),
        })?;
        if hex.is_empty() {
            continue;
        }
        let packet = decode_hex(&hex).map_err(|message| LinkError::Dump {
            line: line_no,
            message,
        })?;
        packets.push(packet);
    }
    Ok(packets)
}

/// Text outside `# … #` spans, whitespace removed. `None` when a span is
/// left open.
fn strip_comments(line: &str) -> Option<String> {
    let parts: Vec<&str> = line.split('#').collect();
    if parts.len() % 2 == 0 {
        return None;
    }
    Some(
        parts
            .iter()
            .step_by(2)
            .flat_map(|p| p.chars())
            .filter(|c| !c.is_whitespace())
            .collect(),
    )
}

/// Decode a hex string (either case, no separators).
pub fn decode_hex(hex: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<char> = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits ({})", digits.len()));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = pair[0].to_digit(16);
            let lo = pair[1].to_digit(16);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((hi * 16 + lo) as u8),
                _ => Err(format!("invalid hex byte '{}{}'", pair[0], pair[1])),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines() {
        let text = "# ORD_RESET_ALL # 0100\n\n  \n# ctx 0 # F0 00 #trailing#\nC00500\n";
        let packets = read_dump(text).unwrap();
        assert_eq!(packets, vec![vec![0x01, 0x00], vec![0xF0, 0x00], vec![0xC0, 0x05, 0x00]]);
    }

    #[test]
    fn lowercase_is_accepted() {
        assert_eq!(read_dump("fa0b").unwrap(), vec![vec![0xFA, 0x0B]]);
    }

    #[test]
    fn errors_name_the_line() {
        let err = read_dump("0100\n# open comment 0100\n").unwrap_err();
        assert!(matches!(err, LinkError::Dump { line: 2, .. }));

        let err = read_dump("0100\n\nABC\n").unwrap_err();
        assert!(matches!(err, LinkError::Dump { line: 3, .. }));

        let err = read_dump("ZZ").unwrap_err();
        assert_eq!(err.to_string(), "dump line 1: invalid hex byte 'ZZ'");
    }
}
