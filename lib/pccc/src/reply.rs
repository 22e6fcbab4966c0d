//! Reply classification and decoding. A frame is a reply when bit 6 of
//! its command byte is set; the transaction number at offset 4 matches
//! it to the outstanding command whose decoder variant interprets the
//! body.

use crate::command::Decoder;
use crate::data::{self, FileData, FileType};
use crate::shared::{CmdResult, Error};
use crate::status;
use byteorder::{ByteOrder, LittleEndian};

/// Bytes before the body: dst, src, cmd, sts, tns.
pub const HEADER_LEN: usize = 6;
/// Reply marker in the command byte.
pub const REPLY_BIT: u8 = 0x40;

/// Decoded reply content, one variant per decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Command acknowledged with no decodable body.
    Done,
    Echo(Vec<u8>),
    Data(FileData),
    FileInfo(SlcFileInfo),
    LinkParam(u8),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SlcFileInfo {
    pub bytes: u32,
    pub elements: u16,
    pub file_type: FileType,
}

/// True when the frame is a reply rather than an unsolicited command.
#[inline]
pub fn is_reply(payload: &[u8]) -> bool {
    payload.len() >= HEADER_LEN && payload[2] & REPLY_BIT != 0
}

/// The transaction number echoed by a reply.
#[inline]
pub fn tns(payload: &[u8]) -> u16 {
    LittleEndian::read_u16(&payload[4..6])
}

/// Interpret a reply for the command that owns it. A non-zero STS turns
/// into `Error::Reply` with the diagnosed text before any body decoding.
pub(crate) fn decode(decoder: &Decoder, reply: &[u8]) -> CmdResult<Reply> {
    if reply.len() < HEADER_LEN {
        return Err(Error::Reply("truncated reply".to_string()));
    }

    if let Some(diagnosis) = status::diagnose(reply) {
        return Err(Error::Reply(diagnosis));
    }

    let body = &reply[HEADER_LEN..];

    match decoder {
        Decoder::None => Ok(Reply::Done),
        Decoder::Echo(sent) => {
            if body != &sent[..] {
                return Err(Error::Reply("echoed payload does not match".to_string()));
            }
            Ok(Reply::Echo(body.to_vec()))
        }
        Decoder::TypedRead { ftype, elements } => {
            let data = data::decode_array(*ftype, usize::from(*elements), body)?;
            Ok(Reply::Data(data))
        }
        Decoder::FileInfo => decode_file_info(body),
        Decoder::LinkParam => match body.first() {
            Some(&value) => Ok(Reply::LinkParam(value)),
            None => Err(Error::Reply("link parameter missing".to_string())),
        },
    }
}

/// `(uint32 bytes, uint16 elements, reserved, file-type-code)`.
fn decode_file_info(body: &[u8]) -> CmdResult<Reply> {
    if body.len() < 8 {
        return Err(Error::Reply("truncated file info".to_string()));
    }

    let code = body[7];
    let file_type = match code {
        0x82..=0x8F => FileType::from_wire(code),
        _ => None,
    };

    let file_type = file_type
        .ok_or_else(|| Error::Reply(format!("unknown file type code 0x{:02X}", code)))?;

    Ok(Reply::FileInfo(SlcFileInfo {
        bytes: LittleEndian::read_u32(&body[0..4]),
        elements: LittleEndian::read_u16(&body[4..6]),
        file_type,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_frame(cmd: u8, sts: u8, tns_value: u16, body: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x02, 0x01, cmd | REPLY_BIT, sts, 0, 0];
        LittleEndian::write_u16(&mut frame[4..6], tns_value);
        frame.extend_from_slice(body);
        frame
    }

    #[test]
    fn test_classification() {
        assert!(is_reply(&reply_frame(0x06, 0, 1, &[])));
        assert!(!is_reply(&[0x02, 0x01, 0x06, 0x00, 0x01, 0x00]));
        assert!(!is_reply(&[0x02, 0x01, 0x46]));
    }

    #[test]
    fn test_tns_extraction() {
        assert_eq!(tns(&reply_frame(0x06, 0, 0x1234, &[])), 0x1234);
    }

    #[test]
    fn test_echo_decode() {
        let sent = vec![0xAA, 0x55, 0x01];
        let decoder = Decoder::Echo(sent.clone());

        let frame = reply_frame(0x06, 0, 1, &sent);
        assert_eq!(decode(&decoder, &frame).unwrap(), Reply::Echo(sent));

        // A short or corrupted echo is a reply error.
        let frame = reply_frame(0x06, 0, 1, &[0xAA, 0x55]);
        match decode(&decoder, &frame) {
            Err(Error::Reply(_)) => (),
            result => panic!("Unexpected result {:?}", result),
        }

        let frame = reply_frame(0x06, 0, 1, &[0xAA, 0x55, 0x02]);
        assert!(decode(&decoder, &frame).is_err());
    }

    #[test]
    fn test_sts_gates_decoding() {
        let decoder = Decoder::Echo(vec![0xAA]);
        let frame = reply_frame(0x06, 0x70, 1, &[0xAA]);

        assert_eq!(
            decode(&decoder, &frame),
            Err(Error::Reply("Processor is in Program mode".to_string()))
        );
    }

    #[test]
    fn test_typed_read_decode() {
        let decoder = Decoder::TypedRead {
            ftype: FileType::Int,
            elements: 4,
        };

        let frame = reply_frame(0x0F, 0, 1, &[0x02, 0x00, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x80]);

        assert_eq!(
            decode(&decoder, &frame).unwrap(),
            Reply::Data(FileData::Int(vec![2, 1, -1, -32768]))
        );
    }

    #[test]
    fn test_file_info_decode() {
        let body = [0x24, 0x01, 0x00, 0x00, 0x92, 0x00, 0x00, 0x89];
        let frame = reply_frame(0x0F, 0, 1, &body);

        assert_eq!(
            decode(&Decoder::FileInfo, &frame).unwrap(),
            Reply::FileInfo(SlcFileInfo {
                bytes: 0x124,
                elements: 0x92,
                file_type: FileType::Int,
            })
        );
    }

    #[test]
    fn test_file_info_unknown_type() {
        let body = [0, 0, 0, 0, 0, 0, 0, 0x42];
        let frame = reply_frame(0x0F, 0, 1, &body);

        match decode(&Decoder::FileInfo, &frame) {
            Err(Error::Reply(text)) => assert!(text.contains("0x42")),
            result => panic!("Unexpected result {:?}", result),
        }
    }

    #[test]
    fn test_link_param_decode() {
        let frame = reply_frame(0x06, 0, 1, &[0x07]);
        assert_eq!(decode(&Decoder::LinkParam, &frame).unwrap(), Reply::LinkParam(0x07));

        let frame = reply_frame(0x06, 0, 1, &[]);
        assert!(decode(&Decoder::LinkParam, &frame).is_err());
    }
}
