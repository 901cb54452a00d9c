// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared protocol constants for programmer <-> host communication.
//!
//! The link carries two kinds of traffic. Command mode is line-oriented
//! ASCII: the host sends a command line and the programmer answers with
//! free text ending in [`PROMPT`]. Binary mode is entered by the
//! `prom read` and `prom write` commands and moves data in chunks of at
//! most [`DATA_CRC_INTERVAL`] bytes:
//!
//! ```text
//! read  (programmer -> host): <status> <data..256> <crc32 le>   host acks <status>
//! write (host -> programmer):          <data..256> <crc32 le>   programmer acks <status>
//! ```
//!
//! A failing programmer may send a line starting with two spaces where a
//! status byte or CRC is expected.

use core::fmt;

// --- Transfer framing ---

/// Payload bytes covered by each CRC and acknowledgement.
pub const DATA_CRC_INTERVAL: usize = 256;

/// Size of the CRC trailer following each chunk.
pub const CRC_SIZE: usize = 4;

/// Chunks the programmer may have unacknowledged while sending (read path).
pub const READ_PIPELINE_DEPTH: usize = 4;

/// Chunks the host may have unacknowledged while sending (write path).
pub const WRITE_PIPELINE_DEPTH: usize = 2;

/// The programmer buffers incoming data into blocks aligned on this size
/// before handing them to the EEPROM (one MX29F1615 page).
pub const WRITE_BLOCK_SIZE: usize = 128;

/// Status/ack byte for "chunk received and processed".
pub const STATUS_OK: u8 = 0;

/// First bytes of an out-of-band failure line.
pub const FAILURE_PREFIX: &[u8; 2] = b"  ";

/// Four spaces read as a little-endian CRC.
pub const FAILURE_CRC: u32 = u32::from_le_bytes([b' '; 4]);

// --- Command mode ---

/// Command prompt printed by the programmer when ready for input.
pub const PROMPT: &str = "CMD> ";

/// Line kill (^U): discards a partially typed command.
pub const KILL_LINE: u8 = 0x15;

/// Interrupt (^C): cancels the current line or running operation.
pub const BREAK: u8 = 0x03;

// --- Device ---

/// Byte size of the MX29F1615 (1M 16-bit words).
pub const EEPROM_SIZE: u32 = 0x20_0000;

/// Expected `prom id` reply: device 0x6B, manufacturer 0xC2 (Macronix).
pub const MX29F1615_ID: u32 = 0x006b_00c2;

pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x1615;
pub const USB_PRODUCT: &str = "MX29F1615 Programmer";

/// Command return codes, printed as `FAILURE <n>` when nonzero.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rc {
    Success = 0,
    Failure = 1,
    UserHelp = 2,
    UserAbort = 3,
    Busy = 4,
    NoData = 5,
    BadParam = 6,
    Timeout = 7,
}

impl Rc {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Host-issued commands, rendered exactly as the programmer parses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Read { addr: u32, len: u32 },
    Write { addr: u32, len: u32 },
    Status,
    StatusClear,
    EraseChip,
    EraseSector { addr: u32 },
    EraseRange { addr: u32, len: u32 },
    Id,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Command::Read { addr, len } => write!(f, "prom read {:x} {:x}", addr, len),
            Command::Write { addr, len } => write!(f, "prom write {:x} {:x}", addr, len),
            Command::Status => f.write_str("prom status"),
            Command::StatusClear => f.write_str("prom status clear"),
            Command::EraseChip => f.write_str("prom erase chip"),
            Command::EraseSector { addr } => write!(f, "prom erase {:x}", addr),
            Command::EraseRange { addr, len } => write!(f, "prom erase {:x} {:x}", addr, len),
            Command::Id => f.write_str("prom id"),
        }
    }
}
