// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Byte-addressed EEPROM access as seen by the shell and transfer engine.

use core::fmt;

use super::Console;

/// What `prom erase` should remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseMode {
    /// Whole device.
    Chip,
    /// Every sector touching `addr..addr + len` (bytes). A zero length
    /// still erases the sector holding `addr`.
    Sectors { addr: u32, len: u32 },
}

/// Failure reported by an EEPROM operation. Addresses are byte addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromError {
    /// Request extends past the end of the device.
    OutOfRange { addr: u32 },
    /// Device never reported completion.
    Timeout { addr: u32 },
    /// Device reported a program failure.
    ProgramFailed { addr: u32, status: u16 },
    /// Device reported an erase failure.
    EraseFailed { addr: u32, status: u16 },
    /// Status word had bits that are never set by a healthy device,
    /// usually because the command was rejected (VPP too low).
    InvalidStatus { status: u16 },
    /// Read-back after programming did not match, retries exhausted.
    VerifyFailed { addr: u32 },
    /// Stopped by the abort button or ^C.
    Aborted,
}

impl PromError {
    /// Wire status code: 1 timeout/range, 2 program or erase failure,
    /// 3 rejected by the device, verify failure or abort.
    pub fn code(&self) -> u8 {
        match self {
            PromError::OutOfRange { .. } | PromError::Timeout { .. } => 1,
            PromError::ProgramFailed { .. } | PromError::EraseFailed { .. } => 2,
            PromError::InvalidStatus { .. } | PromError::VerifyFailed { .. } | PromError::Aborted => {
                3
            }
        }
    }
}

impl fmt::Display for PromError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PromError::OutOfRange { addr } => write!(f, "Address {:x} out of range", addr),
            PromError::Timeout { addr } => write!(f, "Timeout at {:x}", addr),
            PromError::ProgramFailed { addr, status } => {
                write!(f, "Program failed at {:x} (status {:02x})", addr, status)
            }
            PromError::EraseFailed { addr, status } => {
                write!(f, "Erase failed at {:x} (status {:02x})", addr, status)
            }
            PromError::InvalidStatus { status } => write!(f, "Invalid status word {:04x}", status),
            PromError::VerifyFailed { addr } => write!(f, "Read verify failed at {:x}", addr),
            PromError::Aborted => f.write_str("Aborted"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PromError {}

/// EEPROM primitives consumed by the shell and the transfer engine.
///
/// Calls may take from microseconds (reads) to minutes (chip erase).
pub trait Prom {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), PromError>;

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), PromError>;

    /// Erase, reporting progress to `console` and honoring ^C.
    fn erase(&mut self, mode: EraseMode, console: &mut dyn Console) -> Result<(), PromError>;

    /// Raw status register.
    fn status(&mut self) -> u16;

    fn status_clear(&mut self);

    /// Device id: manufacturer code in the low half, device code in the high half.
    fn id(&mut self) -> u32;

    /// Remove power from the part.
    fn disable(&mut self);

    /// Idle housekeeping.
    fn poll(&mut self) {}
}

/// Human readable form of a status register value.
pub fn status_text(status: u16) -> &'static str {
    if status == 0x0080 {
        "Normal"
    } else if status & 0xff03 != 0 {
        "Invalid status"
    } else if status & 0x0020 != 0 {
        "Erase Failure"
    } else if status & 0x0010 != 0 {
        "Program Failure"
    } else {
        "Unknown"
    }
}
