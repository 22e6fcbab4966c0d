//! Command builders: one constructor per supported operation, each
//! validating its arguments before anything touches the slot pool. A
//! `Command` carries its opcode pair, the composed body and the decoder
//! variant that will interpret the matching reply.

use crate::address::{self, PlcAddress};
use crate::data::{self, FileData, FileType};
use crate::shared::{CmdResult, Error};
use byteorder::{ByteOrder, LittleEndian};

/// Largest Echo payload.
pub const ECHO_MAX: usize = 243;
/// Largest typed read/write transfer in bytes.
pub const TRANSFER_MAX: usize = 236;
/// Largest value of a file, element or sub-element field.
const FIELD_MAX: u16 = 999;

/// Commands whose header carries no function byte.
const HEADERLESS_CMDS: [u8; 6] = [0x00, 0x01, 0x02, 0x04, 0x05, 0x08];

/// How to interpret the body of the matching reply.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Decoder {
    /// No body expected beyond the header.
    None,
    /// The reply must echo these bytes exactly.
    Echo(Vec<u8>),
    /// Decode `elements` items of `ftype`.
    TypedRead { ftype: FileType, elements: u16 },
    /// Parse a ReadSLCFileInfo reply.
    FileInfo,
    /// One parameter byte.
    LinkParam,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub(crate) dnode: u8,
    pub(crate) cmd: u8,
    pub(crate) fnc: Option<u8>,
    pub(crate) body: Vec<u8>,
    pub(crate) decoder: Decoder,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CpuMode {
    Program,
    Run,
    Test,
}

impl Command {
    fn new(dnode: u8, cmd: u8, fnc: u8, body: Vec<u8>, decoder: Decoder) -> Command {
        let fnc = match HEADERLESS_CMDS.contains(&cmd) {
            true => None,
            false => Some(fnc),
        };

        Command {
            dnode,
            cmd,
            fnc,
            body,
            decoder,
        }
    }

    /// Serialise the full message: header, optional function byte, body.
    pub(crate) fn encode(&self, src: u8, tns: u16, out: &mut Vec<u8>) {
        out.push(self.dnode);
        out.push(src);
        out.push(self.cmd);
        out.push(0x00);

        let mut word = [0u8; 2];
        LittleEndian::write_u16(&mut word, tns);
        out.extend_from_slice(&word);

        if let Some(fnc) = self.fnc {
            out.push(fnc);
        }

        out.extend_from_slice(&self.body);
    }

    /// Diagnostic loopback of 1..=243 bytes.
    pub fn echo(dnode: u8, payload: &[u8]) -> CmdResult<Command> {
        if payload.is_empty() || payload.len() > ECHO_MAX {
            return Err(Error::InvalidParameter("echo payload must be 1..=243 bytes"));
        }

        Ok(Command::new(
            dnode,
            0x06,
            0x00,
            payload.to_vec(),
            Decoder::Echo(payload.to_vec()),
        ))
    }

    /// Set the remote link timeout, NAK and ENQ budgets in one call.
    pub fn set_vars(dnode: u8, timeout: u8, naks: u8, enqs: u8) -> CmdResult<Command> {
        Ok(Command::new(
            dnode,
            0x06,
            0x02,
            vec![timeout, naks, enqs],
            Decoder::None,
        ))
    }

    pub fn set_timeout(dnode: u8, timeout: u8) -> CmdResult<Command> {
        Ok(Command::new(dnode, 0x06, 0x04, vec![timeout], Decoder::None))
    }

    pub fn set_naks(dnode: u8, naks: u8) -> CmdResult<Command> {
        Ok(Command::new(dnode, 0x06, 0x05, vec![naks], Decoder::None))
    }

    pub fn set_enqs(dnode: u8, enqs: u8) -> CmdResult<Command> {
        Ok(Command::new(dnode, 0x06, 0x06, vec![enqs], Decoder::None))
    }

    /// Read one link-layer parameter byte.
    pub fn read_link_param(dnode: u8, param: u8) -> CmdResult<Command> {
        Ok(Command::new(dnode, 0x06, 0x09, vec![param], Decoder::LinkParam))
    }

    pub fn set_link_param(dnode: u8, param: u8, value: u8) -> CmdResult<Command> {
        Ok(Command::new(dnode, 0x06, 0x0A, vec![param, value], Decoder::None))
    }

    /// Protected bit write: set then clear the masked bits at `addr`.
    pub fn bit_write(dnode: u8, addr: &PlcAddress, set_mask: u16, clear_mask: u16) -> CmdResult<Command> {
        let mut body = Vec::new();
        addr.encode(&mut body);
        push_u16(&mut body, set_mask);
        push_u16(&mut body, clear_mask);

        Ok(Command::new(dnode, 0x0F, 0x02, body, Decoder::None))
    }

    /// Read-modify-write: AND then OR the word at `addr`.
    pub fn read_modify_write(dnode: u8, addr: &PlcAddress, and_mask: u16, or_mask: u16) -> CmdResult<Command> {
        let mut body = Vec::new();
        addr.encode(&mut body);
        push_u16(&mut body, and_mask);
        push_u16(&mut body, or_mask);

        Ok(Command::new(dnode, 0x0F, 0x26, body, Decoder::None))
    }

    pub fn disable_forces(dnode: u8) -> CmdResult<Command> {
        Ok(Command::new(dnode, 0x0F, 0x41, Vec::new(), Decoder::None))
    }

    /// Change the keyswitch mode of an SLC 500 family processor.
    pub fn change_mode_slc(dnode: u8, mode: CpuMode) -> CmdResult<Command> {
        let mode = match mode {
            CpuMode::Program => 0x01,
            CpuMode::Run => 0x06,
            CpuMode::Test => 0x07,
        };

        Ok(Command::new(dnode, 0x0F, 0x80, vec![mode], Decoder::None))
    }

    /// Change the mode of a MicroLogix processor.
    pub fn change_mode_micrologix(dnode: u8, mode: CpuMode) -> CmdResult<Command> {
        let mode = match mode {
            CpuMode::Program => 0x01,
            CpuMode::Run => 0x02,
            CpuMode::Test => {
                return Err(Error::InvalidParameter("test mode not supported by this family"));
            }
        };

        Ok(Command::new(dnode, 0x0F, 0x3A, vec![mode], Decoder::None))
    }

    /// Generic CPU mode change (same opcode as the MicroLogix family).
    pub fn set_cpu_mode(dnode: u8, mode: CpuMode) -> CmdResult<Command> {
        Self::change_mode_micrologix(dnode, mode)
    }

    /// Query size, element count and type of a data-table file.
    pub fn read_file_info(dnode: u8, file: u16, ftype: FileType) -> CmdResult<Command> {
        check_field(file)?;

        let mut body = Vec::new();
        address::encode_level(file, &mut body);
        body.push(ftype.wire_code());

        Ok(Command::new(dnode, 0x0F, 0x94, body, Decoder::FileInfo))
    }

    /// Protected typed logical read, two address fields (file, element).
    pub fn ptl_read2(dnode: u8, file: u16, ftype: FileType, element: u16, elements: u16) -> CmdResult<Command> {
        let size = transfer_size(ftype, elements)?;
        check_field(file)?;
        check_field(element)?;

        let mut body = vec![size];
        address::encode_level(file, &mut body);
        body.push(ftype.wire_code());
        address::encode_level(element, &mut body);

        Ok(Command::new(
            dnode,
            0x0F,
            0xA1,
            body,
            Decoder::TypedRead { ftype, elements },
        ))
    }

    /// Protected typed logical read, three address fields (file, element,
    /// sub-element).
    pub fn ptl_read3(
        dnode: u8,
        file: u16,
        ftype: FileType,
        element: u16,
        sub: u16,
        elements: u16,
    ) -> CmdResult<Command> {
        let size = transfer_size(ftype, elements)?;
        check_field(file)?;
        check_field(element)?;
        check_field(sub)?;

        let mut body = vec![size];
        address::encode_level(file, &mut body);
        body.push(ftype.wire_code());
        address::encode_level(element, &mut body);
        address::encode_level(sub, &mut body);

        Ok(Command::new(
            dnode,
            0x0F,
            0xA2,
            body,
            Decoder::TypedRead { ftype, elements },
        ))
    }

    /// Protected typed logical write, two address fields.
    pub fn ptl_write2(dnode: u8, file: u16, element: u16, data: &FileData) -> CmdResult<Command> {
        let ftype = data.file_type();
        let size = transfer_size(ftype, data.len() as u16)?;
        check_field(file)?;
        check_field(element)?;

        let mut body = vec![size];
        address::encode_level(file, &mut body);
        body.push(ftype.wire_code());
        address::encode_level(element, &mut body);
        data::encode_array(data, &mut body);

        Ok(Command::new(dnode, 0x0F, 0xA9, body, Decoder::None))
    }

    /// Protected typed logical write, three address fields.
    pub fn ptl_write3(dnode: u8, file: u16, element: u16, sub: u16, data: &FileData) -> CmdResult<Command> {
        let ftype = data.file_type();
        let size = transfer_size(ftype, data.len() as u16)?;
        check_field(file)?;
        check_field(element)?;
        check_field(sub)?;

        let mut body = vec![size];
        address::encode_level(file, &mut body);
        body.push(ftype.wire_code());
        address::encode_level(element, &mut body);
        address::encode_level(sub, &mut body);
        data::encode_array(data, &mut body);

        Ok(Command::new(dnode, 0x0F, 0xAA, body, Decoder::None))
    }

    /// Protected typed logical write with a bit mask applied by the
    /// processor before the data lands.
    pub fn ptl_write_mask(
        dnode: u8,
        file: u16,
        element: u16,
        sub: u16,
        mask: u16,
        data: &FileData,
    ) -> CmdResult<Command> {
        let ftype = data.file_type();
        let size = transfer_size(ftype, data.len() as u16)?;
        check_field(file)?;
        check_field(element)?;
        check_field(sub)?;

        let mut body = vec![size];
        address::encode_level(file, &mut body);
        body.push(ftype.wire_code());
        address::encode_level(element, &mut body);
        address::encode_level(sub, &mut body);
        push_u16(&mut body, mask);
        data::encode_array(data, &mut body);

        Ok(Command::new(dnode, 0x0F, 0xAB, body, Decoder::None))
    }
}

/// Validate a typed transfer and return its size byte.
fn transfer_size(ftype: FileType, elements: u16) -> CmdResult<u8> {
    match ftype {
        FileType::Ascii | FileType::Bcd => {
            return Err(Error::InvalidParameter("unsupported file type"));
        }
        _ => (),
    }

    if elements == 0 {
        return Err(Error::InvalidParameter("element count must be at least 1"));
    }

    let bytes = elements as usize * ftype.wire_size();

    if bytes > TRANSFER_MAX {
        return Err(Error::InvalidParameter("transfer larger than 236 bytes"));
    }

    Ok(bytes as u8)
}

fn check_field(value: u16) -> CmdResult<()> {
    if value > FIELD_MAX {
        return Err(Error::InvalidParameter("address field out of range"));
    }

    Ok(())
}

#[inline]
fn push_u16(out: &mut Vec<u8>, value: u16) {
    let mut word = [0u8; 2];
    LittleEndian::write_u16(&mut word, value);
    out.extend_from_slice(&word);
}
