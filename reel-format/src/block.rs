//! Block-level plumbing: 512-byte units, numeric field codecs and the
//! header checksum.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// One block of the container format.
pub const BLOCK_SIZE: usize = 512;

/// Padding granularity required at archive end (20 blocks).
pub const RECORD_SIZE: usize = 20 * BLOCK_SIZE;

pub(crate) const ZERO_BLOCK: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

/// Round `n` up to the next block boundary.
pub(crate) fn padded(n: u64) -> u64 {
    (n + (BLOCK_SIZE as u64 - 1)) & !(BLOCK_SIZE as u64 - 1)
}

pub(crate) fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|b| *b == 0)
}

/// Read exactly one block, or fail with `Truncated`. Returns `None` at a
/// clean end of stream (zero bytes available).
pub(crate) fn read_block<R: Read>(
    stream: &mut R,
    block: &mut [u8; BLOCK_SIZE],
) -> Result<Option<()>> {
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        let n = stream.read(&mut block[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Truncated(format!(
                "end of stream inside a block ({} of {} bytes)",
                filled, BLOCK_SIZE
            )));
        }
        filled += n;
    }
    Ok(Some(()))
}

/// Consume `n` bytes from a forward-only stream.
pub(crate) fn skip<R: Read>(stream: &mut R, mut n: u64) -> Result<()> {
    let mut buf = [0u8; 8 * 1024];
    while n > 0 {
        let want = n.min(buf.len() as u64) as usize;
        let got = stream.read(&mut buf[..want])?;
        if got == 0 {
            return Err(Error::Truncated(format!(
                "end of stream with {} data bytes outstanding",
                n
            )));
        }
        n -= got as u64;
    }
    Ok(())
}

/// NUL-pad `written` bytes out to the next block boundary.
pub(crate) fn write_padding<W: Write>(stream: &mut W, written: u64) -> Result<u64> {
    let pad = padded(written) - written;
    if pad > 0 {
        stream.write_all(&ZERO_BLOCK[..pad as usize])?;
    }
    Ok(pad)
}

/// Parse a fixed-width numeric field: octal ASCII, NUL/space padded, or
/// GNU base-256 (leading byte with the high bit set).
pub(crate) fn parse_numeric(field: &[u8], offset: u64) -> Result<u64> {
    if field.first().map_or(false, |b| b & 0x80 != 0) {
        return Ok(parse_base256(field));
    }
    parse_octal(field, offset)
}

pub(crate) fn parse_octal(field: &[u8], offset: u64) -> Result<u64> {
    let trimmed: Vec<u8> = field
        .iter()
        .copied()
        .filter(|b| *b != 0 && *b != b' ')
        .collect();
    if trimmed.is_empty() {
        return Ok(0);
    }
    let mut value: u64 = 0;
    for b in trimmed {
        if !(b'0'..=b'7').contains(&b) {
            return Err(Error::corrupt(offset, "malformed octal field"));
        }
        value = value
            .checked_mul(8)
            .and_then(|v| v.checked_add(u64::from(b - b'0')))
            .ok_or_else(|| Error::corrupt(offset, "octal field overflows 64 bits"))?;
    }
    Ok(value)
}

fn parse_base256(field: &[u8]) -> u64 {
    // High bit of the first byte flags the encoding; the rest is a
    // big-endian integer.
    let mut buf = [0u8; 8];
    let payload = {
        let mut v = field.to_vec();
        v[0] &= 0x7f;
        v
    };
    let take = payload.len().min(8);
    buf[8 - take..].copy_from_slice(&payload[payload.len() - take..]);
    BigEndian::read_u64(&buf)
}

/// Format a numeric field: `width - 1` octal digits + NUL, falling back
/// to base-256 when allowed.
pub(crate) fn format_numeric(
    value: u64,
    width: usize,
    base256_ok: bool,
    field: &'static str,
    dialect: &'static str,
) -> Result<Vec<u8>> {
    let digits = width - 1;
    if value < 8u64.saturating_pow(digits as u32) {
        let mut out = format!("{:0width$o}", value, width = digits).into_bytes();
        out.push(0);
        return Ok(out);
    }
    if base256_ok && value < 256u64.saturating_pow(digits as u32) {
        let mut out = vec![0u8; width];
        let mut be = [0u8; 8];
        BigEndian::write_u64(&mut be, value);
        out[width - 8..].copy_from_slice(&be);
        out[0] |= 0x80;
        return Ok(out);
    }
    Err(Error::FieldTooLarge { field, dialect })
}

/// Header checksum: every byte summed with the checksum field itself
/// read as eight spaces. The signed variant exists because historic
/// implementations summed signed chars.
pub(crate) fn checksums(block: &[u8; BLOCK_SIZE]) -> (u32, u32) {
    let mut unsigned: u32 = 8 * u32::from(b' ');
    let mut signed: i32 = 8 * i32::from(b' ');
    for (i, b) in block.iter().enumerate() {
        if (148..156).contains(&i) {
            continue;
        }
        unsigned += u32::from(*b);
        signed += i32::from(*b as i8);
    }
    (unsigned, signed as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octal_round_trip() {
        let field = format_numeric(0o644, 8, false, "mode", "ustar").unwrap();
        assert_eq!(field, b"0000644\0");
        assert_eq!(parse_numeric(&field, 0).unwrap(), 0o644);
    }

    #[test]
    fn octal_empty_is_zero() {
        assert_eq!(parse_octal(b"        ", 0).unwrap(), 0);
        assert_eq!(parse_octal(&[0u8; 8], 0).unwrap(), 0);
    }

    #[test]
    fn octal_garbage_is_corrupt() {
        assert!(parse_octal(b"12x4567\0", 0).is_err());
    }

    #[test]
    fn base256_round_trip() {
        // Too big for 8-wide octal, fine for GNU binary.
        let value = 0o7777777 + 1;
        let field = format_numeric(value, 8, true, "uid", "gnu").unwrap();
        assert_eq!(field[0] & 0x80, 0x80);
        assert_eq!(parse_numeric(&field, 0).unwrap(), value);
    }

    #[test]
    fn base256_refused_without_gnu() {
        let err = format_numeric(0o7777777 + 1, 8, false, "uid", "ustar").unwrap_err();
        assert!(matches!(err, crate::Error::FieldTooLarge { .. }));
    }

    #[test]
    fn base256_limit() {
        // 256^7 no longer fits an 8-wide binary field.
        assert!(format_numeric(1 << 56, 8, true, "uid", "gnu").is_err());
    }

    #[test]
    fn padding_math() {
        assert_eq!(padded(0), 0);
        assert_eq!(padded(1), 512);
        assert_eq!(padded(512), 512);
        assert_eq!(padded(513), 1024);
    }
}
