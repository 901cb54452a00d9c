// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Device end of the chunked CRC transfer.
//!
//! - `prom read`: the programmer is the sender. Each chunk goes out as
//!   status byte, data and CRC; the host's ack bytes are checked lazily,
//!   with up to [`READ_PIPELINE_DEPTH`] chunks in flight.
//! - `prom write`: the programmer is the receiver. Data is collected
//!   into page-aligned blocks for the EEPROM, a CRC is read after every
//!   [`DATA_CRC_INTERVAL`] bytes, and the ack goes back once the block
//!   holding the end of that chunk has been programmed.
//!
//! On a failure the programmer writes a two-space-prefixed text line. On
//! the read path a failing EEPROM read puts its nonzero code in the
//! status slot ahead of that line. On the write path the line is
//! followed by the nonzero status byte and two seconds of discarded
//! input, so the rest of the host's stream is not taken for commands.

use core::fmt::{self, Write};

use super::{Clock, Console, Programmer, Prom, PromError};
use crate::crc::crc32;
use crate::pipeline::AckPipeline;
use crate::protocol::{
    Rc, CRC_SIZE, DATA_CRC_INTERVAL, READ_PIPELINE_DEPTH, STATUS_OK, WRITE_BLOCK_SIZE,
};

/// Per-byte wait for CRC and ack bytes.
pub const ACK_TIMEOUT_MS: u32 = 200;

/// Per-byte wait for payload during `prom write`.
pub const DATA_TIMEOUT_MS: u32 = 1000;

/// How long input is thrown away after a failed `prom write`.
pub const FAILURE_DISCARD_MS: u32 = 2000;

/// Why a binary transfer stopped. Addresses are EEPROM byte addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFault {
    /// Nothing arrived within the inter-byte timeout.
    Timeout { what: &'static str, addr: u32 },
    /// The transport did not accept output.
    SendStalled { what: &'static str, addr: u32 },
    /// CRC from the host differs from the one computed here.
    CrcMismatch {
        start: u32,
        end: u32,
        expected: u32,
        received: u32,
    },
    /// The host acknowledged a chunk with a nonzero status.
    Remote { code: u8, addr: u32 },
    /// ^C from the host.
    Aborted { addr: u32 },
    Prom(PromError),
}

impl TransferFault {
    /// Command return code (and status byte) for this failure.
    pub fn rc(&self) -> u8 {
        match self {
            TransferFault::Timeout { .. } | TransferFault::SendStalled { .. } => Rc::Timeout.code(),
            TransferFault::CrcMismatch { .. } | TransferFault::Remote { .. } => Rc::Failure.code(),
            TransferFault::Aborted { .. } => Rc::UserAbort.code(),
            TransferFault::Prom(e) => e.code(),
        }
    }
}

impl From<PromError> for TransferFault {
    fn from(e: PromError) -> Self {
        TransferFault::Prom(e)
    }
}

impl fmt::Display for TransferFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TransferFault::Timeout { what, addr } => {
                write!(f, "Receive timeout waiting for {} at 0x{:x}", what, addr)
            }
            TransferFault::SendStalled { what, addr } => {
                write!(f, "{} send timeout at 0x{:x}", what, addr)
            }
            TransferFault::CrcMismatch {
                start,
                end,
                expected,
                received,
            } => write!(
                f,
                "Received CRC {:08x} doesn't match {:08x} at 0x{:x}-0x{:x}",
                received, expected, start, end
            ),
            TransferFault::Remote { code, addr } => {
                write!(f, "Remote sent error {} at 0x{:x}", code, addr)
            }
            TransferFault::Aborted { addr } => write!(f, "Aborted at 0x{:x}", addr),
            TransferFault::Prom(e) => e.fmt(f),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TransferFault {}

impl<C: Console, K: Clock, P: Prom> Programmer<C, K, P> {
    /// Stream `len` bytes starting at `addr` to the host.
    pub fn read_binary(&mut self, addr: u32, len: u32) -> Result<(), TransferFault> {
        let result = self.send_chunks(addr, len);
        match &result {
            // Already reported after the status byte.
            Err(TransferFault::Prom(_)) | Ok(()) => {}
            Err(fault) => {
                let _ = writeln!(self.console, "  {}", fault);
            }
        }
        result
    }

    /// Receive `len` bytes from the host and program them at `addr`.
    pub fn write_binary(&mut self, addr: u32, len: u32) -> Result<(), TransferFault> {
        let result = self.receive_chunks(addr, len);
        if let Err(fault) = &result {
            // Tell the host, then swallow whatever it still had in flight.
            let _ = writeln!(self.console, "  {}", fault);
            let _ = self.console.puts_binary(&[fault.rc()]);
            self.discard_input(FAILURE_DISCARD_MS);
        }
        result
    }

    fn send_chunks(&mut self, mut addr: u32, mut len: u32) -> Result<(), TransferFault> {
        let mut buf = [0u8; DATA_CRC_INTERVAL];
        let mut acks = AckPipeline::<READ_PIPELINE_DEPTH>::new();
        let mut crc = 0u32;
        let start = addr;

        while len > 0 {
            let tlen = (len as usize).min(DATA_CRC_INTERVAL);
            let chunk = &mut buf[..tlen];

            if self.console.break_pending() {
                return Err(TransferFault::Aborted { addr });
            }
            if let Err(e) = self.prom.read(addr, chunk) {
                // The status slot carries the code; the reason follows as text.
                self.send(&[e.code()], "Status", addr)?;
                let _ = writeln!(self.console, "  {}", e);
                return Err(e.into());
            }
            self.send(&[STATUS_OK], "Status", addr)?;
            self.send(chunk, "Data", addr)?;
            crc = crc32(crc, chunk);

            addr += tlen as u32;
            len -= tlen as u32;

            if acks.is_full() {
                if let Some(pos) = acks.pop() {
                    self.check_ack(pos)?;
                }
            }
            self.send(&crc.to_le_bytes(), "Data CRC", addr)?;
            let _ = acks.push(addr - start);
        }

        while let Some(pos) = acks.pop() {
            self.check_ack(pos)?;
        }
        Ok(())
    }

    fn receive_chunks(&mut self, mut addr: u32, mut len: u32) -> Result<(), TransferFault> {
        let mut block = [0u8; WRITE_BLOCK_SIZE];
        let mut crc = 0u32;
        let mut chunk_start = addr;
        let mut chunk_fill = 0usize;
        let mut ack_due = false;

        while len > 0 {
            let rem = addr as usize % WRITE_BLOCK_SIZE;
            let tlen = (len as usize).min(WRITE_BLOCK_SIZE - rem);

            for (pos, slot) in block[..tlen].iter_mut().enumerate() {
                let at = addr + pos as u32;
                let byte = self
                    .getchar_wait(DATA_TIMEOUT_MS)
                    .ok_or(TransferFault::Timeout { what: "data", addr: at })?;
                *slot = byte;
                crc = crc32(crc, &[byte]);
                chunk_fill += 1;
                if chunk_fill == DATA_CRC_INTERVAL {
                    self.check_crc(crc, chunk_start, at + 1)?;
                    chunk_start = at + 1;
                    chunk_fill = 0;
                    ack_due = true;
                }
            }

            self.prom.write(addr, &block[..tlen])?;
            addr += tlen as u32;
            len -= tlen as u32;

            if ack_due {
                self.send(&[STATUS_OK], "Status", addr)?;
                ack_due = false;
            }
        }

        if chunk_fill != 0 {
            self.check_crc(crc, chunk_start, addr)?;
            self.send(&[STATUS_OK], "Status", addr)?;
        }
        Ok(())
    }

    fn send(&mut self, data: &[u8], what: &'static str, addr: u32) -> Result<(), TransferFault> {
        self.console
            .puts_binary(data)
            .map_err(|_| TransferFault::SendStalled { what, addr })
    }

    fn check_ack(&mut self, pos: u32) -> Result<(), TransferFault> {
        match self.getchar_wait(ACK_TIMEOUT_MS) {
            None => Err(TransferFault::Timeout { what: "rc", addr: pos }),
            Some(STATUS_OK) => Ok(()),
            Some(code) => Err(TransferFault::Remote { code, addr: pos }),
        }
    }

    fn check_crc(&mut self, expected: u32, start: u32, end: u32) -> Result<(), TransferFault> {
        let mut raw = [0u8; CRC_SIZE];
        for byte in raw.iter_mut() {
            *byte = self
                .getchar_wait(ACK_TIMEOUT_MS)
                .ok_or(TransferFault::Timeout { what: "CRC", addr: end })?;
        }
        let received = u32::from_le_bytes(raw);
        if received != expected {
            return Err(TransferFault::CrcMismatch {
                start,
                end,
                expected,
                received,
            });
        }
        Ok(())
    }
}
