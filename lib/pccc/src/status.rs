//! Human-readable diagnosis of the STS byte of a reply, including the
//! extended status byte when the remote flags one. The diagnoser never
//! fails: unmapped codes render with their raw values.

/// Commands with their own extended-status vocabulary on DH-485 links.
const DH485_CMDS: [u8; 3] = [0x0B, 0x1A, 0x1B];

/// Diagnose the status of a reply. `None` means success (STS zero).
/// The slice must carry at least the 6-byte header.
pub fn diagnose(reply: &[u8]) -> Option<String> {
    let sts = reply[3];

    if sts == 0 {
        return None;
    }

    if sts & 0xF0 == 0xF0 {
        return Some(extended(reply));
    }

    if let Some(text) = local(sts) {
        return Some(text.to_string());
    }

    if let Some(text) = remote(sts) {
        return Some(text.to_string());
    }

    Some(format!("Undefined STS 0x{:02X}", sts))
}

/// Local link errors, reported by the station itself.
fn local(sts: u8) -> Option<&'static str> {
    match sts {
        0x01 => Some("Destination node is out of buffer space"),
        0x02 => Some("Cannot guarantee delivery, link layer timed out or received a NAK"),
        0x03 => Some("Duplicate token holder detected"),
        0x04 => Some("Local port is disconnected"),
        0x05 => Some("Application layer timed out waiting for a response"),
        0x06 => Some("Duplicate node detected"),
        0x07 => Some("Station is offline"),
        0x08 => Some("Hardware fault"),
        _ => None,
    }
}

/// Remote "major" errors, reported by the addressed processor.
fn remote(sts: u8) -> Option<&'static str> {
    match sts {
        0x10 => Some("Illegal command or format"),
        0x20 => Some("Host has a problem and will not communicate"),
        0x30 => Some("Remote node host is missing, disconnected, or shut down"),
        0x40 => Some("Host could not complete function due to hardware fault"),
        0x50 => Some("Addressing problem or memory protect rungs"),
        0x60 => Some("Function not allowed due to command protection selection"),
        0x70 => Some("Processor is in Program mode"),
        0x80 => Some("Compatibility mode file missing or communication zone problem"),
        0x90 => Some("Remote node cannot buffer command"),
        _ => None,
    }
}

/// STS 0xF0: the real code is in byte 6 and its vocabulary depends on
/// the originating command opcode.
fn extended(reply: &[u8]) -> String {
    let cmd = reply[2] & 0x3F;
    let ext = match reply.get(6) {
        Some(&ext) => ext,
        None => return format!("EXT STS missing for CMD 0x{:02X}", cmd),
    };

    let text = match cmd {
        0x0F => {
            if ext == 0x1A {
                // The owning node rides along in the reply.
                return format!(
                    "File is open; another node owns it (node 0x{:02X})",
                    reply[5]
                );
            }
            data_table_ext(ext)
        }
        cmd if DH485_CMDS.contains(&cmd) => dh485_ext(ext),
        _ => None,
    };

    match text {
        Some(text) => text.to_string(),
        None => format!("Undefined EXT STS 0x{:02X} for CMD 0x{:02X}", ext, cmd),
    }
}

/// Extended codes for the data-table command family (CMD 0x0F).
fn data_table_ext(ext: u8) -> Option<&'static str> {
    match ext {
        0x01 => Some("A field has an illegal value"),
        0x02 => Some("Fewer levels specified in address than minimum for any address"),
        0x03 => Some("More levels specified in address than system supports"),
        0x04 => Some("Symbol not found"),
        0x05 => Some("Symbol is of improper format"),
        0x06 => Some("Address does not point to something usable"),
        0x07 => Some("File is wrong size"),
        0x08 => Some("Cannot complete request, situation has changed since start of command"),
        0x09 => Some("Data or file is too large"),
        0x0A => Some("Transaction size plus word address is too large"),
        0x0B => Some("Access denied, improper privilege"),
        0x0C => Some("Condition cannot be generated, resource is not available"),
        0x0D => Some("Condition already exists, resource is readily available"),
        0x0E => Some("Command cannot be executed"),
        0x0F => Some("Histogram overflow"),
        0x10 => Some("No access"),
        0x11 => Some("Illegal data type"),
        0x12 => Some("Invalid parameter or invalid data"),
        0x13 => Some("Address reference exists to deleted data table area"),
        0x14 => Some("Command execution failure for unknown reason"),
        0x15 => Some("Data conversion error"),
        0x16 => Some("Scanner not able to communicate with 1771 rack adapter"),
        0x17 => Some("Type mismatch"),
        0x18 => Some("1771 module response was not valid"),
        0x19 => Some("Duplicated label"),
        0x1B => Some("Another node is the program owner"),
        0x1E => Some("Data table element protection violation"),
        0x1F => Some("Temporary internal problem"),
        0x22 => Some("Remote rack fault"),
        0x23 => Some("Timeout"),
        0x24 => Some("Unknown error"),
        _ => None,
    }
}

/// Extended codes for the DH-485 specific commands (0x0B, 0x1A, 0x1B).
fn dh485_ext(ext: u8) -> Option<&'static str> {
    match ext {
        0x01 => Some("Illegal address format"),
        0x02 => Some("Address out of range"),
        0x03 => Some("Data or file is too large"),
        0x05 => Some("Cannot execute command while file is open"),
        0x06 => Some("File is protected"),
        0x0B => Some("Access denied, improper privilege"),
        _ => None,
    }
}
