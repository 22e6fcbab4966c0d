//! PLC data-table addresses: logical-binary (1..7 numeric levels) or
//! logical-ASCII (symbolic, `$`-prefixed on the wire). Levels use the
//! scalar encoding shared with the typed commands: one byte up to 254,
//! otherwise an `0xFF` escape followed by the little-endian 16-bit value.

use crate::shared::{CmdResult, Error};
use byteorder::{ByteOrder, LittleEndian};

pub const LEVELS_MAX: usize = 7;
pub const LEVEL_VALUE_MAX: u16 = 999;
pub const ASCII_MAX: usize = 14;

/// Escape introducing the three-byte scalar form.
const LEVEL_ESCAPE: u8 = 0xFF;
/// Largest value carried by the one-byte scalar form.
const LEVEL_SHORT_MAX: u16 = 254;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PlcAddress {
    LogicalBinary(Vec<u16>),
    LogicalAscii(String),
}

impl PlcAddress {
    /// Logical-binary address with 1..=7 levels, each 0..=999.
    pub fn binary(levels: &[u16]) -> CmdResult<PlcAddress> {
        if levels.is_empty() || levels.len() > LEVELS_MAX {
            return Err(Error::InvalidParameter("address level count out of range"));
        }

        if levels.iter().any(|&level| level > LEVEL_VALUE_MAX) {
            return Err(Error::InvalidParameter("address level value out of range"));
        }

        Ok(PlcAddress::LogicalBinary(levels.to_vec()))
    }

    /// Logical-ASCII address with 1..=14 characters.
    pub fn ascii(text: &str) -> CmdResult<PlcAddress> {
        if text.is_empty() || text.len() > ASCII_MAX {
            return Err(Error::InvalidParameter("address text length out of range"));
        }

        if text.bytes().any(|byte| byte == 0 || byte > 0x7F) {
            return Err(Error::InvalidParameter("address text must be ASCII"));
        }

        Ok(PlcAddress::LogicalAscii(text.to_string()))
    }

    /// Wire form: a level mask plus scalar levels, or the NUL/`$` framed
    /// symbol text. Infallible once constructed.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            PlcAddress::LogicalBinary(levels) => {
                let mut mask = 0u8;
                for bit in 0..levels.len() {
                    mask |= 1 << bit;
                }
                out.push(mask);

                for &level in levels {
                    encode_level(level, out);
                }
            }
            PlcAddress::LogicalAscii(text) => {
                out.push(0x00);
                out.push(b'$');
                out.extend_from_slice(text.as_bytes());
                out.push(0x00);
            }
        }
    }

    /// Decode an address, returning it and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> CmdResult<(PlcAddress, usize)> {
        let first = *bytes
            .first()
            .ok_or(Error::InvalidParameter("empty address"))?;

        if first == 0x00 {
            return Self::decode_ascii(bytes);
        }

        let mut levels = Vec::new();
        let mut pos = 1;

        for bit in 0..LEVELS_MAX {
            if first & (1 << bit) == 0 {
                continue;
            }

            let (level, used) = decode_level(&bytes[pos..])?;
            levels.push(level);
            pos += used;
        }

        if first >= 0x80 || levels.is_empty() {
            return Err(Error::InvalidParameter("bad address level mask"));
        }

        Ok((PlcAddress::LogicalBinary(levels), pos))
    }

    fn decode_ascii(bytes: &[u8]) -> CmdResult<(PlcAddress, usize)> {
        if bytes.len() < 3 || bytes[1] != b'$' {
            return Err(Error::InvalidParameter("bad symbolic address"));
        }

        let end = bytes[2..]
            .iter()
            .position(|&byte| byte == 0)
            .ok_or(Error::InvalidParameter("unterminated symbolic address"))?;

        let text = std::str::from_utf8(&bytes[2..2 + end])
            .map_err(|_| Error::InvalidParameter("address text must be ASCII"))?;

        let address = PlcAddress::ascii(text)?;
        Ok((address, end + 3))
    }
}

/// Scalar level encoder: one byte up to 254, escape + u16 LE above.
#[inline]
pub fn encode_level(value: u16, out: &mut Vec<u8>) {
    if value <= LEVEL_SHORT_MAX {
        out.push(value as u8);
    } else {
        out.push(LEVEL_ESCAPE);
        let mut word = [0u8; 2];
        LittleEndian::write_u16(&mut word, value);
        out.extend_from_slice(&word);
    }
}

/// Scalar level decoder, returning the value and the bytes consumed.
#[inline]
pub fn decode_level(bytes: &[u8]) -> CmdResult<(u16, usize)> {
    match bytes.first() {
        None => Err(Error::InvalidParameter("truncated address level")),
        Some(&LEVEL_ESCAPE) => {
            if bytes.len() < 3 {
                return Err(Error::InvalidParameter("truncated address level"));
            }
            Ok((LittleEndian::read_u16(&bytes[1..3]), 3))
        }
        Some(&byte) => Ok((u16::from(byte), 1)),
    }
}
