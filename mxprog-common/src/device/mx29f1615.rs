// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Macronix MX29F1615 16-Mbit (1M x 16) 5V flash with 10V VPP.
//!
//! The driver speaks the chip's command set over a [`PromBus`], which
//! only knows how to power the part and move single words. Commands are
//! the usual three-cycle unlock (`aa@5555`, `55@2aaa`, `cmd@addr`) with
//! VPP raised; program and erase leave the chip in status mode until a
//! read-reset (`f0`).

use core::fmt::Write;

use super::prom::{EraseMode, Prom, PromError};
use super::Console;

/// Device size in 16-bit words.
pub const DEVICE_WORDS: u32 = 1 << 20;

/// Erase sector size in words (128 KiB).
pub const SECTOR_WORDS: u32 = 64 << 10;

/// Words loaded per page program operation.
pub const PAGE_WORDS: usize = 64;

pub const STATUS_FAIL_PROGRAM: u16 = 0x10;
pub const STATUS_FAIL_ERASE: u16 = 0x20;
pub const STATUS_COMPLETE: u16 = 0x80;
/// Bits a healthy part never reports.
pub const STATUS_INVALID_MASK: u16 = 0xff03;

pub const CMD_PROGRAM: u16 = 0x00a0;
pub const CMD_ERASE_SETUP: u16 = 0x0080;
pub const CMD_ERASE_CHIP: u16 = 0x0010;
pub const CMD_ERASE_SECTOR: u16 = 0x0030;
pub const CMD_STATUS_READ: u16 = 0x0070;
pub const CMD_STATUS_CLEAR: u16 = 0x0050;
pub const CMD_ID: u16 = 0x0090;
pub const CMD_READ_RESET: u16 = 0x00f0;

pub const UNLOCK_ADDR1: u32 = 0x05555;
pub const UNLOCK_ADDR2: u32 = 0x02aaa;

const PROGRAM_TIMEOUT_US: u64 = 2_000_000;
const SECTOR_ERASE_TIMEOUT_US: u64 = 10_000_000;
const CHIP_ERASE_TIMEOUT_US: u64 = 200_000_000;
const IDLE_POWER_OFF_US: u64 = 1_000_000;

/// Attempts per page before giving up on read-back verify.
const PROGRAM_TRIES: usize = 3;

/// Electrical access to the part. Timing within a single bus cycle is
/// the implementation's job.
pub trait PromBus {
    /// Apply or remove VCC, with CE#/OE# idle high.
    fn set_power(&mut self, on: bool);
    /// Raise VPP to 10V or drop it back to VCC.
    fn set_vpp(&mut self, high: bool);
    fn read_word(&mut self, addr: u32) -> u16;
    fn write_word(&mut self, addr: u32, data: u16);
    fn delay_us(&mut self, us: u32);
    fn now_us(&mut self) -> u64;
    /// Edge-triggered: true once per press.
    fn abort_pressed(&mut self) -> bool;
    /// Run `f` with interrupts held off. The part closes a page load on
    /// its own once writes pause for about 30 us, so command sequences
    /// must not be preempted.
    fn with_irqs_masked<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R;
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Operation {
    Program,
    Erase,
}

pub struct Mx29f1615<B> {
    bus: B,
    enabled: bool,
    last_access: Option<u64>,
}

impl<B: PromBus> Mx29f1615<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            enabled: false,
            last_access: None,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Power the part and put it in read mode.
    pub fn enable(&mut self) {
        if !self.enabled {
            self.bus.set_vpp(false);
            self.bus.set_power(true);
            self.bus.delay_us(52); // tVCS + tVPS
            self.enabled = true;
            self.read_mode();
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.last_access = Some(self.bus.now_us());
    }

    /// Issue an unlock-prefixed single-word command.
    pub fn cmd(&mut self, addr: u32, cmd: u16) {
        self.bus.set_vpp(true);
        self.bus.delay_us(2);
        self.bus.with_irqs_masked(|bus| {
            bus.write_word(UNLOCK_ADDR1, 0x00aa);
            bus.write_word(UNLOCK_ADDR2, 0x0055);
            bus.write_word(addr, cmd);
            bus.delay_us(2);
            bus.set_vpp(false);
        });
        self.bus.delay_us(2);
    }

    pub fn read_mode(&mut self) {
        self.cmd(UNLOCK_ADDR1, CMD_READ_RESET);
    }

    /// Read words starting at word address `addr`.
    pub fn read_words(&mut self, addr: u32, data: &mut [u16]) -> Result<(), PromError> {
        if addr as usize + data.len() > DEVICE_WORDS as usize {
            return Err(PromError::OutOfRange { addr: addr << 1 });
        }
        for (offset, word) in data.iter_mut().enumerate() {
            *word = self.bus.read_word(addr + offset as u32);
        }
        Ok(())
    }

    /// Program words starting at word address `addr`, one page at a time,
    /// reading each page back. A page that does not verify is programmed
    /// again, at most twice more.
    pub fn write_words(&mut self, mut addr: u32, mut data: &[u16]) -> Result<(), PromError> {
        if addr as usize + data.len() > DEVICE_WORDS as usize {
            return Err(PromError::OutOfRange { addr: addr << 1 });
        }
        let mut readback = [0u16; PAGE_WORDS];

        while !data.is_empty() {
            if self.bus.abort_pressed() {
                return Err(PromError::Aborted);
            }
            let room = PAGE_WORDS - (addr as usize % PAGE_WORDS);
            let page = &data[..data.len().min(room)];

            let mut tries = 0;
            loop {
                self.program_page(addr, page)?;
                self.read_mode();
                self.read_words(addr, &mut readback[..page.len()])?;
                if readback[..page.len()] == *page {
                    break;
                }
                tries += 1;
                if tries == PROGRAM_TRIES {
                    return Err(PromError::VerifyFailed { addr: addr << 1 });
                }
            }

            addr += page.len() as u32;
            data = &data[page.len()..];
        }
        self.read_mode();
        Ok(())
    }

    /// Load up to one page and wait for the program cycle. Words must
    /// all lie in the same 64-word page.
    fn program_page(&mut self, addr: u32, page: &[u16]) -> Result<(), PromError> {
        self.bus.set_vpp(true);
        self.bus.delay_us(2);
        self.bus.with_irqs_masked(|bus| {
            bus.write_word(UNLOCK_ADDR1, 0x00aa);
            bus.write_word(UNLOCK_ADDR2, 0x0055);
            bus.write_word(UNLOCK_ADDR1, CMD_PROGRAM);
            for (offset, &word) in page.iter().enumerate() {
                bus.write_word(addr + offset as u32, word);
            }
            bus.delay_us(2); // tVPH
            bus.set_vpp(false);
        });
        self.bus.delay_us(100); // tBAL
        self.wait_for_done(PROGRAM_TIMEOUT_US, Operation::Program, addr << 1, None)
    }

    /// Poll the status word until the device reports completion.
    fn wait_for_done(
        &mut self,
        timeout_us: u64,
        op: Operation,
        byte_addr: u32,
        mut console: Option<&mut dyn Console>,
    ) -> Result<(), PromError> {
        let start = self.bus.now_us();
        let mut reported_secs = 0;
        let mut status;

        loop {
            let elapsed = self.bus.now_us() - start;
            status = self.bus.read_word(0);
            if status & STATUS_INVALID_MASK != 0 {
                return Err(PromError::InvalidStatus { status });
            }
            if self.bus.abort_pressed() {
                return Err(PromError::Aborted);
            }
            if let Some(con) = console.as_deref_mut() {
                if con.break_pending() {
                    return Err(PromError::Aborted);
                }
                let secs = elapsed / 1_000_000;
                if status & STATUS_COMPLETE != 0 {
                    let msecs = (elapsed % 1_000_000) / 1000;
                    let _ = write!(con, "\r{:02x} {}.{:03} sec", status, secs, msecs);
                } else if secs > reported_secs {
                    reported_secs = secs;
                    let _ = write!(con, "\r{:02x} {}", status, secs);
                }
            }
            if status & STATUS_COMPLETE != 0 || elapsed >= timeout_us {
                break;
            }
            self.bus.delay_us(1000);
        }

        if status & (STATUS_FAIL_PROGRAM | STATUS_FAIL_ERASE) != 0 {
            self.clear_status();
            return Err(match op {
                Operation::Program => PromError::ProgramFailed {
                    addr: byte_addr,
                    status,
                },
                Operation::Erase => PromError::EraseFailed {
                    addr: byte_addr,
                    status,
                },
            });
        }
        if status & STATUS_COMPLETE == 0 {
            return Err(PromError::Timeout { addr: byte_addr });
        }
        if let Some(con) = console {
            let _ = writeln!(con, "    Done");
        }
        Ok(())
    }

    /// Erase the chip, or every sector touching `len` words from word
    /// address `addr` (at least the sector holding `addr`).
    pub fn erase_words(
        &mut self,
        chip: bool,
        addr: u32,
        len: u32,
        console: &mut dyn Console,
    ) -> Result<(), PromError> {
        let end = addr.saturating_add(len.max(1));
        let mut sector = addr & !(SECTOR_WORDS - 1);

        self.clear_status();
        let result = loop {
            if sector >= DEVICE_WORDS {
                break Err(PromError::OutOfRange { addr: sector << 1 });
            }

            self.bus.set_vpp(true);
            self.bus.delay_us(2);
            self.bus.with_irqs_masked(|bus| {
                bus.write_word(UNLOCK_ADDR1, 0x00aa);
                bus.write_word(UNLOCK_ADDR2, 0x0055);
                bus.write_word(UNLOCK_ADDR1, CMD_ERASE_SETUP);
                bus.write_word(UNLOCK_ADDR1, 0x00aa);
                bus.write_word(UNLOCK_ADDR2, 0x0055);
                if chip {
                    bus.write_word(UNLOCK_ADDR1, CMD_ERASE_CHIP);
                } else {
                    bus.write_word(sector, CMD_ERASE_SECTOR);
                }
                bus.delay_us(2);
                bus.set_vpp(false);
            });
            self.bus.delay_us(100);
            let timeout = if chip {
                CHIP_ERASE_TIMEOUT_US
            } else {
                SECTOR_ERASE_TIMEOUT_US
            };

            let done = self.wait_for_done(timeout, Operation::Erase, sector << 1, Some(&mut *console));
            if let Err(e) = done {
                break Err(e);
            }
            sector += SECTOR_WORDS;
            if chip || sector >= end {
                break Ok(());
            }
        };

        self.read_mode();
        result
    }

    pub fn status_read(&mut self) -> u16 {
        self.cmd(UNLOCK_ADDR1, CMD_STATUS_READ);
        let status = self.bus.read_word(0);
        self.read_mode();
        status
    }

    pub fn clear_status(&mut self) {
        self.cmd(UNLOCK_ADDR1, CMD_STATUS_CLEAR);
        self.read_mode();
    }

    pub fn read_id(&mut self) -> u32 {
        self.cmd(UNLOCK_ADDR1, CMD_ID);
        let low = self.bus.read_word(0);
        let high = self.bus.read_word(1);
        self.read_mode();
        u32::from(low) | (u32::from(high) << 16)
    }

    pub fn power_off(&mut self) {
        self.bus.set_vpp(false);
        self.bus.delay_us(50);
        self.bus.set_power(false);
        self.enabled = false;
        self.last_access = None;
    }
}

impl<B: PromBus> Prom for Mx29f1615<B> {
    fn read(&mut self, mut addr: u32, mut buf: &mut [u8]) -> Result<(), PromError> {
        self.enable();
        if addr & 1 != 0 && !buf.is_empty() {
            let mut word = [0u16];
            self.read_words(addr >> 1, &mut word)?;
            buf[0] = (word[0] >> 8) as u8;
            buf = &mut core::mem::take(&mut buf)[1..];
            addr += 1;
        }
        let mut words = [0u16; PAGE_WORDS];
        while buf.len() >= 2 {
            let count = (buf.len() / 2).min(PAGE_WORDS);
            self.read_words(addr >> 1, &mut words[..count])?;
            for (pair, word) in buf.chunks_exact_mut(2).zip(&words[..count]) {
                pair.copy_from_slice(&word.to_le_bytes());
            }
            buf = &mut core::mem::take(&mut buf)[count * 2..];
            addr += count as u32 * 2;
        }
        if let [last] = buf {
            let mut word = [0u16];
            self.read_words(addr >> 1, &mut word)?;
            *last = word[0] as u8;
        }
        self.touch();
        Ok(())
    }

    fn write(&mut self, mut addr: u32, mut data: &[u8]) -> Result<(), PromError> {
        self.enable();
        if addr & 1 != 0 && !data.is_empty() {
            let mut word = [0u16];
            self.read_words(addr >> 1, &mut word)?;
            word[0] = (word[0] & 0x00ff) | (u16::from(data[0]) << 8);
            self.write_words(addr >> 1, &word)?;
            data = &data[1..];
            addr += 1;
        }
        let mut words = [0u16; PAGE_WORDS];
        while data.len() >= 2 {
            let room = PAGE_WORDS - ((addr >> 1) as usize % PAGE_WORDS);
            let count = (data.len() / 2).min(room);
            for (word, pair) in words.iter_mut().zip(data.chunks_exact(2)).take(count) {
                *word = u16::from_le_bytes([pair[0], pair[1]]);
            }
            self.write_words(addr >> 1, &words[..count])?;
            data = &data[count * 2..];
            addr += count as u32 * 2;
        }
        if let [last] = data {
            let mut word = [0u16];
            self.read_words(addr >> 1, &mut word)?;
            word[0] = (word[0] & 0xff00) | u16::from(*last);
            self.write_words(addr >> 1, &word)?;
        }
        self.touch();
        Ok(())
    }

    fn erase(&mut self, mode: EraseMode, console: &mut dyn Console) -> Result<(), PromError> {
        self.enable();
        let result = match mode {
            EraseMode::Chip => self.erase_words(true, 0, 0, console),
            EraseMode::Sectors { addr, len } => {
                let first = addr >> 1;
                let last = addr.saturating_add(len.max(1) - 1) >> 1;
                self.erase_words(false, first, last - first + 1, console)
            }
        };
        self.touch();
        result
    }

    fn status(&mut self) -> u16 {
        self.enable();
        self.status_read()
    }

    fn status_clear(&mut self) {
        self.enable();
        self.clear_status();
    }

    fn id(&mut self) -> u32 {
        self.enable();
        self.read_id()
    }

    fn disable(&mut self) {
        self.power_off();
    }

    /// Cut power after a second without access.
    fn poll(&mut self) {
        if let Some(last) = self.last_access {
            if self.bus.now_us().saturating_sub(last) > IDLE_POWER_OFF_US {
                self.power_off();
            }
        }
    }
}
