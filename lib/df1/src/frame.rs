//! DF1 link symbols, DLE stuffing and frame assembly, plus the one-byte
//! framing spoken between the service and its TCP clients.

use crate::checksum::{self, Mode};
use byteorder::{LittleEndian, WriteBytesExt};

pub const DLE: u8 = 0x10;
pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ENQ: u8 = 0x05;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;

/// Service <-> client framing: `MSG_SOH, length, payload` for data,
/// bare `MSG_ACK`/`MSG_NAK` for outcomes and responses.
pub const MSG_SOH: u8 = 0x01;
pub const MSG_ACK: u8 = 0x06;
pub const MSG_NAK: u8 = 0x15;

/// Largest application payload routed by the service. Bounded by the
/// one-byte length field of the client framing.
pub const MAX_PAYLOAD: usize = 255;

pub const ENQ_FRAME: [u8; 2] = [DLE, ENQ];

/// The two-byte link response for an accepted or rejected message.
#[inline]
pub fn response(ack: bool) -> [u8; 2] {
    match ack {
        true => [DLE, ACK],
        false => [DLE, NAK],
    }
}

/// Encode a full application frame: `DLE STX`, the DLE-stuffed payload,
/// `DLE ETX` and the checksum trailer.
pub fn encode(payload: &[u8], mode: Mode) -> Vec<u8> {
    let mut wire = Vec::with_capacity(payload.len() * 2 + 6);

    wire.push(DLE);
    wire.push(STX);

    for &byte in payload {
        wire.push(byte);
        if byte == DLE {
            wire.push(DLE);
        }
    }

    wire.push(DLE);
    wire.push(ETX);

    match mode {
        Mode::Bcc => wire.push(checksum::bcc(payload)),
        Mode::Crc => {
            let crc = checksum::crc16_update(checksum::crc16(payload), ETX);
            wire.write_u16::<LittleEndian>(crc).expect("Error writing CRC");
        }
    }

    wire
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Strip framing and stuffing from an encoded frame, returning the
    /// payload and the checksum trailer.
    fn destuff(wire: &[u8], mode: Mode) -> (Vec<u8>, Vec<u8>) {
        assert_eq!(&wire[..2], &[DLE, STX]);

        let mut payload = Vec::new();
        let mut pos = 2;

        loop {
            let byte = wire[pos];
            pos += 1;

            if byte != DLE {
                payload.push(byte);
                continue;
            }

            match wire[pos] {
                DLE => payload.push(DLE),
                ETX => break,
                other => panic!("Unexpected link symbol {:#04x}", other),
            }
            pos += 1;
        }

        pos += 1;
        let trailer = wire[pos..].to_vec();
        assert_eq!(trailer.len(), mode.trailer_len());

        (payload, trailer)
    }

    #[test]
    fn test_stuff_destuff_roundtrip() {
        let payloads: [&[u8]; 4] = [
            &[0x01, 0x02, 0x03],
            &[0x10, 0x20],
            &[0x10, 0x10, 0x10],
            &[0xFF, 0x10, 0x02, 0x03, 0x10],
        ];

        for payload in payloads.iter() {
            let wire = encode(payload, Mode::Crc);
            let (restored, _) = destuff(&wire, Mode::Crc);
            assert_eq!(&restored[..], *payload);
        }
    }

    #[test]
    fn test_dle_doubled_on_wire() {
        let wire = encode(&[0x10, 0x20], Mode::Bcc);

        // DLE STX, 10 10, 20, DLE ETX, BCC
        assert_eq!(&wire[..7], &[DLE, STX, 0x10, 0x10, 0x20, DLE, ETX]);
    }

    #[test]
    fn test_echo_frame_bcc() {
        // Echo of [AA 55 01] from node 2 to node 1, tns 0x1234.
        let payload = [0x01, 0x02, 0x06, 0x00, 0x34, 0x12, 0x00, 0xAA, 0x55, 0x01];
        let wire = encode(&payload, Mode::Bcc);

        assert_eq!(&wire[..2], &[DLE, STX]);
        assert_eq!(&wire[2..12], &payload[..]);
        assert_eq!(&wire[12..], &[DLE, ETX, 0xB1]);
    }

    #[test]
    fn test_crc_trailer_covers_etx() {
        let payload = [0x01, 0x02, 0x06, 0x00];
        let wire = encode(&payload, Mode::Crc);

        let mut covered = payload.to_vec();
        covered.push(ETX);
        let crc = checksum::crc16(&covered);

        let len = wire.len();
        assert_eq!(wire[len - 2], (crc & 0xFF) as u8);
        assert_eq!(wire[len - 1], (crc >> 8) as u8);
    }

    #[test]
    fn test_responses() {
        assert_eq!(response(true), [DLE, ACK]);
        assert_eq!(response(false), [DLE, NAK]);
        assert_eq!(ENQ_FRAME, [DLE, ENQ]);
    }
}
