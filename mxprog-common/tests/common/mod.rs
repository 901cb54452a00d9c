// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Scripted collaborators for exercising the device core on the host.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::rc::Rc;

use mxprog_common::crc32;
use mxprog_common::device::{Clock, Console, EraseMode, Programmer, Prom, PromError, Stalled};
use mxprog_common::protocol::{BREAK, DATA_CRC_INTERVAL, EEPROM_SIZE, MX29F1615_ID};

/// Virtual clock that moves forward a little on every look, so spin
/// loops terminate without real waiting.
#[derive(Clone)]
pub struct MockClock {
    now: Rc<Cell<u64>>,
    tick_us: u64,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            tick_us: 50,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.now.get() / 1000
    }
}

impl Clock for MockClock {
    fn now_us(&self) -> u64 {
        let t = self.now.get() + self.tick_us;
        self.now.set(t);
        t
    }
}

/// Console with a pre-loaded input queue that records everything sent.
#[derive(Default)]
pub struct MockConsole {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
    /// `output.len()` at the moment each input byte was consumed.
    pub reads_at: Vec<usize>,
    pub stall: bool,
}

impl MockConsole {
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl fmt::Write for MockConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                self.output.push(b'\r');
            }
            self.output.push(b);
        }
        Ok(())
    }
}

impl Console for MockConsole {
    fn getchar(&mut self) -> Option<u8> {
        let ch = self.input.pop_front()?;
        self.reads_at.push(self.output.len());
        Some(ch)
    }

    fn puts_binary(&mut self, data: &[u8]) -> Result<(), Stalled> {
        if self.stall {
            return Err(Stalled);
        }
        self.output.extend_from_slice(data);
        Ok(())
    }

    fn break_pending(&mut self) -> bool {
        match self.input.iter().position(|&b| b == BREAK) {
            Some(pos) => {
                self.input.drain(..=pos);
                true
            }
            None => false,
        }
    }
}

/// Flat memory standing in for the EEPROM.
pub struct MemProm {
    pub mem: Vec<u8>,
    pub fail_read_at: Option<u32>,
    pub fail_write_at: Option<u32>,
    pub status: u16,
    pub powered: bool,
    pub erases: Vec<EraseMode>,
    pub writes: Vec<(u32, usize)>,
}

impl MemProm {
    pub fn new() -> Self {
        Self {
            mem: vec![0xff; EEPROM_SIZE as usize],
            fail_read_at: None,
            fail_write_at: None,
            status: 0x0080,
            powered: false,
            erases: Vec::new(),
            writes: Vec::new(),
        }
    }

    fn hits(at: Option<u32>, addr: u32, len: usize) -> bool {
        at.is_some_and(|at| at >= addr && at < addr + len as u32)
    }
}

impl Prom for MemProm {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), PromError> {
        self.powered = true;
        if Self::hits(self.fail_read_at, addr, buf.len()) {
            return Err(PromError::Timeout { addr });
        }
        let start = addr as usize;
        buf.copy_from_slice(&self.mem[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), PromError> {
        self.powered = true;
        if Self::hits(self.fail_write_at, addr, data.len()) {
            return Err(PromError::ProgramFailed { addr, status: 0x90 });
        }
        let start = addr as usize;
        self.mem[start..start + data.len()].copy_from_slice(data);
        self.writes.push((addr, data.len()));
        Ok(())
    }

    fn erase(&mut self, mode: EraseMode, console: &mut dyn Console) -> Result<(), PromError> {
        self.powered = true;
        self.erases.push(mode);
        if mode == EraseMode::Chip {
            self.mem.fill(0xff);
        }
        let _ = console.write_str("\r80 0.001 sec    Done\n");
        Ok(())
    }

    fn status(&mut self) -> u16 {
        self.status
    }

    fn status_clear(&mut self) {
        self.status = 0x0080;
    }

    fn id(&mut self) -> u32 {
        MX29F1615_ID
    }

    fn disable(&mut self) {
        self.powered = false;
    }
}

pub type TestProgrammer = Programmer<MockConsole, MockClock, MemProm>;

pub fn programmer(input: &[u8]) -> TestProgrammer {
    Programmer::new(MockConsole::with_input(input), MockClock::new(), MemProm::new())
}

/// Deterministic test pattern.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 8) as u8)
        .collect()
}

/// What the host sends for `prom write`: data with a running CRC after
/// every chunk.
pub fn host_stream(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut crc = 0;
    for chunk in data.chunks(DATA_CRC_INTERVAL) {
        out.extend_from_slice(chunk);
        crc = crc32(crc, chunk);
        out.extend_from_slice(&crc.to_le_bytes());
    }
    out
}
