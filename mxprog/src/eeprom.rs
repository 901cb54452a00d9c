// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! EEPROM operations on top of the command and transfer layers.

use std::fmt;

use log::{debug, info};

use mxprog_common::protocol::{Command, EEPROM_SIZE};

use crate::error::{Error, Incomplete, Result};
use crate::link::ByteLink;
use crate::session::{recv_output, send_cmd};
use crate::transfer::{receive_crc, send_crc, TransferStats};
use crate::verify::{compare, VerifyReport};

const ID_IDLE_MS: u64 = 50;
const STATUS_IDLE_MS: u64 = 100;
/// Time allowed for the programmer to drain the last written chunk.
const FLUSH_TIMEOUT_MS: u64 = 500;

/// Erase output is polled in steps of this length.
const ERASE_STEP_MS: u64 = 100;
/// Consecutive silent steps after which an erase is given up on.
const ERASE_IDLE_STEPS: u32 = 20;
const ERASE_MAX_STEPS: u32 = 1000;

/// What `-e` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseTarget {
    Chip,
    /// The sector holding this address.
    Sector { addr: u32 },
    /// Every sector touching `addr..addr + len`.
    Range { addr: u32, len: u32 },
}

impl EraseTarget {
    /// Derive the target from the `-a`/`-l` options.
    pub fn from_options(addr: Option<u32>, len: Option<u32>) -> Self {
        match (addr, len) {
            (None, None) => EraseTarget::Chip,
            (Some(addr), None) => EraseTarget::Sector { addr },
            (addr, Some(len)) => EraseTarget::Range {
                addr: addr.unwrap_or(0),
                len,
            },
        }
    }

    fn command(self) -> Command {
        match self {
            EraseTarget::Chip => Command::EraseChip,
            EraseTarget::Sector { addr } => Command::EraseSector { addr },
            EraseTarget::Range { addr, len } => Command::EraseRange { addr, len },
        }
    }
}

impl fmt::Display for EraseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EraseTarget::Chip => f.write_str("Erase entire EEPROM"),
            EraseTarget::Sector { addr } => write!(f, "Erase sector at 0x{:x}", addr),
            EraseTarget::Range { addr, len } => write!(
                f,
                "Erase sector(s) from 0x{:x} to 0x{:x}",
                addr,
                addr.saturating_add(len).saturating_sub(1)
            ),
        }
    }
}

/// Outcome of [`write`].
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub stats: TransferStats,
    /// `prom status` reply after the write.
    pub status: String,
}

/// `prom id` reply, for example `006b00c2`.
pub fn identify(link: &mut dyn ByteLink) -> Result<String> {
    send_cmd(link, Command::Id)?;
    Ok(recv_output(link, ID_IDLE_MS).trim().to_string())
}

/// `prom status` reply.
pub fn status(link: &mut dyn ByteLink) -> Result<String> {
    send_cmd(link, Command::Status)?;
    Ok(recv_output(link, STATUS_IDLE_MS).trim().to_string())
}

/// Fill `buf` from the EEPROM starting at `addr`.
pub fn read(
    link: &mut dyn ByteLink,
    addr: u32,
    buf: &mut [u8],
    on_percent: &mut dyn FnMut(usize),
) -> std::result::Result<TransferStats, Incomplete> {
    let cmd = Command::Read {
        addr,
        len: transfer_len(buf.len()),
    };
    send_cmd(link, cmd).map_err(|error| Incomplete { received: 0, error })?;
    let stats = receive_crc(link, buf, on_percent)?;
    info!("read 0x{:x} bytes in {} chunks", stats.bytes, stats.chunks);
    Ok(stats)
}

/// Program `data` at `addr`, then fetch the device status.
pub fn write(
    link: &mut dyn ByteLink,
    addr: u32,
    data: &[u8],
    on_percent: &mut dyn FnMut(usize),
) -> Result<WriteOutcome> {
    let cmd = Command::Write {
        addr,
        len: transfer_len(data.len()),
    };
    send_cmd(link, cmd)?;
    let stats = send_crc(link, data, on_percent)?;
    if !link.wait_flushed(FLUSH_TIMEOUT_MS) {
        debug!("TX not drained after write");
    }
    let status = status(link)?;
    Ok(WriteOutcome { stats, status })
}

/// Read back `expected.len()` bytes at `addr` and compare.
pub fn verify(
    link: &mut dyn ByteLink,
    addr: u32,
    expected: &[u8],
    report_max: Option<usize>,
    on_percent: &mut dyn FnMut(usize),
) -> std::result::Result<(Vec<u8>, VerifyReport), Incomplete> {
    let mut actual = vec![0u8; expected.len()];
    read(link, addr, &mut actual, on_percent)?;
    let report = compare(expected, &actual, report_max);
    Ok((actual, report))
}

/// Erase `target`, passing the programmer's progress output to `out`
/// until its prompt comes back.
pub fn erase(
    link: &mut dyn ByteLink,
    target: EraseTarget,
    out: &mut dyn FnMut(&str),
) -> Result<()> {
    send_cmd(link, target.command())?;

    let mut seen: Vec<u8> = Vec::new();
    let mut emitted = 0;
    let mut idle_steps = 0;
    let mut buf = [0u8; 64];

    for _ in 0..ERASE_MAX_STEPS {
        let len = link.receive(&mut buf, ERASE_STEP_MS);
        if len == 0 {
            idle_steps += 1;
            if idle_steps >= ERASE_IDLE_STEPS {
                return Err(Error::Timeout {
                    what: "erase",
                    offset: 0,
                });
            }
            continue;
        }
        idle_steps = 0;
        seen.extend_from_slice(&buf[..len]);

        if let Some(end) = find(&seen, b"CMD>") {
            out(&String::from_utf8_lossy(&seen[emitted..end]));
            return erase_result(&seen[..end]);
        }
        // Hold back a possible partial prompt.
        let safe = seen.len().saturating_sub(3).max(emitted);
        out(&String::from_utf8_lossy(&seen[emitted..safe]));
        emitted = safe;
    }
    Err(Error::Timeout {
        what: "erase",
        offset: 0,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// The shell closes a failed command with `FAILURE <n>`.
fn erase_result(output: &[u8]) -> Result<()> {
    let text = String::from_utf8_lossy(output);
    let code = text
        .lines()
        .filter_map(|line| line.trim().strip_prefix("FAILURE "))
        .find_map(|code| code.trim().parse::<u8>().ok());
    match code {
        Some(code) => Err(Error::RemoteError { code, offset: 0 }),
        None => Ok(()),
    }
}

fn transfer_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(EEPROM_SIZE)
}
