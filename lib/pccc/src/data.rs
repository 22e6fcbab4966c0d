//! Data-table element codec: converts between host-form values and the
//! little-endian wire form of each file type. TIMER/COUNTER/CONTROL are
//! three 16-bit words with packed flag bits; STRING is a length word
//! plus 82 text bytes with swapped character pairs.

use crate::shared::{CmdResult, Error};
use byteorder::{ByteOrder, LittleEndian};

/// Text capacity of a STRING element.
pub const STRING_MAX: usize = 82;
/// Wire size of a STRING element: length word plus text.
const STRING_WIRE: usize = 84;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FileType {
    Status,
    Bin,
    Timer,
    Counter,
    Control,
    Int,
    Float,
    Str,
    Ascii,
    Bcd,
}

impl FileType {
    #[inline]
    pub fn wire_code(self) -> u8 {
        match self {
            FileType::Status => 0x84,
            FileType::Bin => 0x85,
            FileType::Timer => 0x86,
            FileType::Counter => 0x87,
            FileType::Control => 0x88,
            FileType::Int => 0x89,
            FileType::Float => 0x8A,
            FileType::Str => 0x8D,
            FileType::Ascii => 0x8E,
            FileType::Bcd => 0x8F,
        }
    }

    pub fn from_wire(code: u8) -> Option<FileType> {
        match code {
            0x84 => Some(FileType::Status),
            0x85 => Some(FileType::Bin),
            0x86 => Some(FileType::Timer),
            0x87 => Some(FileType::Counter),
            0x88 => Some(FileType::Control),
            0x89 => Some(FileType::Int),
            0x8A => Some(FileType::Float),
            0x8D => Some(FileType::Str),
            0x8E => Some(FileType::Ascii),
            0x8F => Some(FileType::Bcd),
            _ => None,
        }
    }

    /// Element size on the wire.
    #[inline]
    pub fn wire_size(self) -> usize {
        match self {
            FileType::Float => 4,
            FileType::Timer | FileType::Counter | FileType::Control => 6,
            FileType::Str => STRING_WIRE,
            _ => 2,
        }
    }
}

const TIMER_EN: u16 = 0x8000;
const TIMER_TT: u16 = 0x4000;
const TIMER_DN: u16 = 0x2000;
const TIMER_BASE_SEC: u16 = 0x0200;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct TimerValue {
    pub en: bool,
    pub tt: bool,
    pub dn: bool,
    /// One-second time base (10 ms otherwise).
    pub base_sec: bool,
    pub preset: i16,
    pub accum: i16,
}

const COUNTER_CU: u16 = 0x8000;
const COUNTER_CD: u16 = 0x4000;
const COUNTER_DN: u16 = 0x2000;
const COUNTER_OV: u16 = 0x1000;
const COUNTER_UN: u16 = 0x0800;
const COUNTER_UA: u16 = 0x0400;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct CounterValue {
    pub cu: bool,
    pub cd: bool,
    pub dn: bool,
    pub ov: bool,
    pub un: bool,
    pub ua: bool,
    pub preset: i16,
    pub accum: i16,
}

const CONTROL_EN: u16 = 0x8000;
const CONTROL_EU: u16 = 0x4000;
const CONTROL_DN: u16 = 0x2000;
const CONTROL_EM: u16 = 0x1000;
const CONTROL_ER: u16 = 0x0800;
const CONTROL_UL: u16 = 0x0400;
const CONTROL_IN: u16 = 0x0200;
const CONTROL_FD: u16 = 0x0100;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ControlValue {
    pub en: bool,
    pub eu: bool,
    pub dn: bool,
    pub em: bool,
    pub er: bool,
    pub ul: bool,
    pub inhibit: bool,
    pub found: bool,
    pub length: i16,
    pub position: i16,
}

/// A STRING element: at most 82 bytes of text.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PlcString {
    text: String,
}

impl PlcString {
    pub fn new(text: &str) -> CmdResult<PlcString> {
        if text.len() > STRING_MAX {
            return Err(Error::InvalidParameter("string longer than 82 bytes"));
        }

        Ok(PlcString {
            text: text.to_string(),
        })
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A homogeneous run of data-table elements in host form.
#[derive(Debug, Clone, PartialEq)]
pub enum FileData {
    Int(Vec<i16>),
    Bin(Vec<u16>),
    Status(Vec<u16>),
    Float(Vec<f32>),
    Timer(Vec<TimerValue>),
    Counter(Vec<CounterValue>),
    Control(Vec<ControlValue>),
    Str(Vec<PlcString>),
}

impl FileData {
    pub fn file_type(&self) -> FileType {
        match self {
            FileData::Int(_) => FileType::Int,
            FileData::Bin(_) => FileType::Bin,
            FileData::Status(_) => FileType::Status,
            FileData::Float(_) => FileType::Float,
            FileData::Timer(_) => FileType::Timer,
            FileData::Counter(_) => FileType::Counter,
            FileData::Control(_) => FileType::Control,
            FileData::Str(_) => FileType::Str,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FileData::Int(items) => items.len(),
            FileData::Bin(items) => items.len(),
            FileData::Status(items) => items.len(),
            FileData::Float(items) => items.len(),
            FileData::Timer(items) => items.len(),
            FileData::Counter(items) => items.len(),
            FileData::Control(items) => items.len(),
            FileData::Str(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size on the wire.
    pub fn wire_len(&self) -> usize {
        self.len() * self.file_type().wire_size()
    }
}

/// Encode every element into the wire form.
pub fn encode_array(data: &FileData, out: &mut Vec<u8>) {
    match data {
        FileData::Int(items) => {
            for &item in items {
                push_u16(out, item as u16);
            }
        }
        FileData::Bin(items) | FileData::Status(items) => {
            for &item in items {
                push_u16(out, item);
            }
        }
        FileData::Float(items) => {
            for &item in items {
                let mut word = [0u8; 4];
                LittleEndian::write_f32(&mut word, item);
                out.extend_from_slice(&word);
            }
        }
        FileData::Timer(items) => {
            for item in items {
                encode_timer(item, out);
            }
        }
        FileData::Counter(items) => {
            for item in items {
                encode_counter(item, out);
            }
        }
        FileData::Control(items) => {
            for item in items {
                encode_control(item, out);
            }
        }
        FileData::Str(items) => {
            for item in items {
                encode_string(item, out);
            }
        }
    }
}

/// Decode `elements` items of `ftype` from the reply bytes. Unsupported
/// file types surface `InvalidParameter`; a length mismatch is a reply
/// defect.
pub fn decode_array(ftype: FileType, elements: usize, bytes: &[u8]) -> CmdResult<FileData> {
    match ftype {
        FileType::Ascii | FileType::Bcd => {
            return Err(Error::InvalidParameter("unsupported file type"));
        }
        _ => (),
    }

    if bytes.len() != elements * ftype.wire_size() {
        return Err(Error::Reply(format!(
            "expected {} data bytes, received {}",
            elements * ftype.wire_size(),
            bytes.len()
        )));
    }

    let chunks = bytes.chunks(ftype.wire_size());

    Ok(match ftype {
        FileType::Int => FileData::Int(chunks.map(|chunk| LittleEndian::read_u16(chunk) as i16).collect()),
        FileType::Bin => FileData::Bin(chunks.map(LittleEndian::read_u16).collect()),
        FileType::Status => FileData::Status(chunks.map(LittleEndian::read_u16).collect()),
        FileType::Float => FileData::Float(chunks.map(LittleEndian::read_f32).collect()),
        FileType::Timer => FileData::Timer(chunks.map(decode_timer).collect()),
        FileType::Counter => FileData::Counter(chunks.map(decode_counter).collect()),
        FileType::Control => FileData::Control(chunks.map(decode_control).collect()),
        FileType::Str => FileData::Str(chunks.map(decode_string).collect::<CmdResult<_>>()?),
        FileType::Ascii | FileType::Bcd => unreachable!(),
    })
}

fn encode_timer(item: &TimerValue, out: &mut Vec<u8>) {
    let mut flags = 0u16;
    flags |= flag(item.en, TIMER_EN);
    flags |= flag(item.tt, TIMER_TT);
    flags |= flag(item.dn, TIMER_DN);
    flags |= flag(item.base_sec, TIMER_BASE_SEC);

    push_u16(out, flags);
    push_u16(out, item.preset as u16);
    push_u16(out, item.accum as u16);
}

fn decode_timer(chunk: &[u8]) -> TimerValue {
    let flags = LittleEndian::read_u16(&chunk[0..2]);

    TimerValue {
        en: flags & TIMER_EN != 0,
        tt: flags & TIMER_TT != 0,
        dn: flags & TIMER_DN != 0,
        base_sec: flags & TIMER_BASE_SEC != 0,
        preset: LittleEndian::read_u16(&chunk[2..4]) as i16,
        accum: LittleEndian::read_u16(&chunk[4..6]) as i16,
    }
}

fn encode_counter(item: &CounterValue, out: &mut Vec<u8>) {
    let mut flags = 0u16;
    flags |= flag(item.cu, COUNTER_CU);
    flags |= flag(item.cd, COUNTER_CD);
    flags |= flag(item.dn, COUNTER_DN);
    flags |= flag(item.ov, COUNTER_OV);
    flags |= flag(item.un, COUNTER_UN);
    flags |= flag(item.ua, COUNTER_UA);

    push_u16(out, flags);
    push_u16(out, item.preset as u16);
    push_u16(out, item.accum as u16);
}

fn decode_counter(chunk: &[u8]) -> CounterValue {
    let flags = LittleEndian::read_u16(&chunk[0..2]);

    CounterValue {
        cu: flags & COUNTER_CU != 0,
        cd: flags & COUNTER_CD != 0,
        dn: flags & COUNTER_DN != 0,
        ov: flags & COUNTER_OV != 0,
        un: flags & COUNTER_UN != 0,
        ua: flags & COUNTER_UA != 0,
        preset: LittleEndian::read_u16(&chunk[2..4]) as i16,
        accum: LittleEndian::read_u16(&chunk[4..6]) as i16,
    }
}

fn encode_control(item: &ControlValue, out: &mut Vec<u8>) {
    let mut flags = 0u16;
    flags |= flag(item.en, CONTROL_EN);
    flags |= flag(item.eu, CONTROL_EU);
    flags |= flag(item.dn, CONTROL_DN);
    flags |= flag(item.em, CONTROL_EM);
    flags |= flag(item.er, CONTROL_ER);
    flags |= flag(item.ul, CONTROL_UL);
    flags |= flag(item.inhibit, CONTROL_IN);
    flags |= flag(item.found, CONTROL_FD);

    push_u16(out, flags);
    push_u16(out, item.length as u16);
    push_u16(out, item.position as u16);
}

fn decode_control(chunk: &[u8]) -> ControlValue {
    let flags = LittleEndian::read_u16(&chunk[0..2]);

    ControlValue {
        en: flags & CONTROL_EN != 0,
        eu: flags & CONTROL_EU != 0,
        dn: flags & CONTROL_DN != 0,
        em: flags & CONTROL_EM != 0,
        er: flags & CONTROL_ER != 0,
        ul: flags & CONTROL_UL != 0,
        inhibit: flags & CONTROL_IN != 0,
        found: flags & CONTROL_FD != 0,
        length: LittleEndian::read_u16(&chunk[2..4]) as i16,
        position: LittleEndian::read_u16(&chunk[4..6]) as i16,
    }
}

/// STRING wire form: length word, then 82 text bytes with each pair of
/// characters swapped (wire position 2k holds text 2k+1 and vice versa,
/// with a zero partner for an odd length).
fn encode_string(item: &PlcString, out: &mut Vec<u8>) {
    let bytes = item.text.as_bytes();

    push_u16(out, bytes.len() as u16);

    let mut text = [0u8; STRING_MAX];
    text[..bytes.len()].copy_from_slice(bytes);

    for pair in 0..STRING_MAX / 2 {
        out.push(text[pair * 2 + 1]);
        out.push(text[pair * 2]);
    }
}

fn decode_string(chunk: &[u8]) -> CmdResult<PlcString> {
    let len = LittleEndian::read_u16(&chunk[0..2]) as usize;

    if len > STRING_MAX {
        return Err(Error::Reply(format!("string length {} out of range", len)));
    }

    let mut text = [0u8; STRING_MAX];
    for pair in 0..STRING_MAX / 2 {
        text[pair * 2] = chunk[2 + pair * 2 + 1];
        text[pair * 2 + 1] = chunk[2 + pair * 2];
    }

    // Truncation at the length word doubles as the terminating NUL.
    let text = String::from_utf8_lossy(&text[..len]).into_owned();
    Ok(PlcString { text })
}

/// The variable-length type/data parameter: a flag byte holding a
/// three-bit type field and a three-bit size field, each either the
/// value itself (0..=7) or, when the extension bit (7 for type, 3 for
/// size) is set, the byte length of a little-endian value following the
/// flag. Type extension bytes precede size extension bytes.
pub fn encode_type_size(ttype: u32, size: u32, out: &mut Vec<u8>) -> CmdResult<()> {
    let (type_nibble, type_ext) = type_size_field(ttype)?;
    let (size_nibble, size_ext) = type_size_field(size)?;

    out.push(type_nibble << 4 | size_nibble);
    out.extend_from_slice(&type_ext);
    out.extend_from_slice(&size_ext);
    Ok(())
}

/// Decode a type/data parameter, returning (type, size, bytes consumed).
pub fn decode_type_size(bytes: &[u8]) -> CmdResult<(u32, u32, usize)> {
    let flag = *bytes
        .first()
        .ok_or(Error::InvalidParameter("truncated type parameter"))?;

    let mut pos = 1;
    let ttype = type_size_value(flag >> 4, bytes, &mut pos)?;
    let size = type_size_value(flag & 0x0F, bytes, &mut pos)?;

    Ok((ttype, size, pos))
}

fn type_size_field(value: u32) -> CmdResult<(u8, Vec<u8>)> {
    if value <= 7 {
        return Ok((value as u8, Vec::new()));
    }

    let mut ext = Vec::new();
    let mut rest = value;

    while rest > 0 {
        ext.push((rest & 0xFF) as u8);
        rest >>= 8;
    }

    if ext.len() > 7 {
        return Err(Error::InvalidParameter("type parameter value too large"));
    }

    Ok((0x08 | ext.len() as u8, ext))
}

fn type_size_value(nibble: u8, bytes: &[u8], pos: &mut usize) -> CmdResult<u32> {
    if nibble & 0x08 == 0 {
        return Ok(u32::from(nibble & 0x07));
    }

    let len = usize::from(nibble & 0x07);

    if len == 0 || len > 4 {
        return Err(Error::InvalidParameter("bad type parameter length"));
    }

    if bytes.len() < *pos + len {
        return Err(Error::InvalidParameter("truncated type parameter"));
    }

    let mut value = 0u32;
    for offset in (0..len).rev() {
        value = value << 8 | u32::from(bytes[*pos + offset]);
    }

    *pos += len;
    Ok(value)
}

#[inline]
fn flag(set: bool, bit: u16) -> u16 {
    match set {
        true => bit,
        false => 0,
    }
}

#[inline]
fn push_u16(out: &mut Vec<u8>, value: u16) {
    let mut word = [0u8; 2];
    LittleEndian::write_u16(&mut word, value);
    out.extend_from_slice(&word);
}
