// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! In-memory wire and a simulated programmer running the real device
//! core on a thread.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mxprog::{Connection, Connector};
use mxprog_common::device::{Clock, Console, EraseMode, Programmer, Prom, PromError, Shell, Stalled};
use mxprog_common::protocol::{BREAK, EEPROM_SIZE, MX29F1615_ID};

const READ_WAIT: Duration = Duration::from_millis(100);
const SECTOR_SIZE: usize = 0x2_0000;

// --- Wire ---

/// One direction of the wire.
#[derive(Default)]
pub struct Pipe {
    queue: Mutex<VecDeque<u8>>,
    ready: Condvar,
}

impl Pipe {
    pub fn push(&self, data: &[u8]) {
        let mut queue = self.queue.lock().unwrap();
        queue.extend(data.iter().copied());
        self.ready.notify_all();
    }

    pub fn pop(&self) -> Option<u8> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Wait up to `timeout` for data, then take what fits in `buf`.
    pub fn pop_wait(&self, buf: &mut [u8], timeout: Duration) -> usize {
        let queue = self.queue.lock().unwrap();
        let (mut queue, _) = self
            .ready
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap();
        let len = buf.len().min(queue.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..len)) {
            *slot = byte;
        }
        len
    }

    pub fn take_all(&self) -> Vec<u8> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    /// Drop everything up to and including `marker`, if present.
    pub fn take_through(&self, marker: u8) -> bool {
        let mut queue = self.queue.lock().unwrap();
        match queue.iter().position(|&b| b == marker) {
            Some(pos) => {
                queue.drain(..=pos);
                true
            }
            None => false,
        }
    }
}

/// Both directions plus the state of the simulated USB connection.
/// Every outage invalidates the handles opened before it.
#[derive(Default)]
pub struct Wire {
    pub to_device: Pipe,
    pub to_host: Pipe,
    generation: AtomicU64,
    opens: AtomicUsize,
    down_until: Mutex<Option<Instant>>,
}

impl Wire {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Break current handles and refuse to open for `length`.
    pub fn outage(&self, length: Duration) {
        *self.down_until.lock().unwrap() = Some(Instant::now() + length);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_down(&self) -> bool {
        self.down_until
            .lock()
            .unwrap()
            .is_some_and(|until| Instant::now() < until)
    }
}

pub struct SimConnector {
    wire: Arc<Wire>,
}

impl SimConnector {
    pub fn new(wire: Arc<Wire>) -> Self {
        Self { wire }
    }
}

impl Connector for SimConnector {
    fn name(&self) -> &str {
        "sim0"
    }

    fn open(&self) -> io::Result<Connection> {
        if self.wire.is_down() {
            return Err(io::Error::new(ErrorKind::NotFound, "sim0 absent"));
        }
        self.wire.opens.fetch_add(1, Ordering::SeqCst);
        let generation = self.wire.generation();
        Ok(Connection {
            reader: Box::new(SimReader {
                wire: self.wire.clone(),
                generation,
            }),
            writer: Box::new(SimWriter {
                wire: self.wire.clone(),
                generation,
            }),
        })
    }
}

fn gone() -> io::Error {
    io::Error::new(ErrorKind::BrokenPipe, "sim0 disconnected")
}

struct SimReader {
    wire: Arc<Wire>,
    generation: u64,
}

impl Read for SimReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.wire.generation() != self.generation {
            return Err(gone());
        }
        match self.wire.to_host.pop_wait(buf, READ_WAIT) {
            0 => Err(io::Error::new(ErrorKind::TimedOut, "no data")),
            len => Ok(len),
        }
    }
}

struct SimWriter {
    wire: Arc<Wire>,
    generation: u64,
}

impl Write for SimWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.wire.generation() != self.generation {
            return Err(gone());
        }
        self.wire.to_device.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// --- Simulated programmer ---

/// Fault injection on the programmer's binary output. Indices count
/// bytes passed to `puts_binary` since the last [`Faults::reset`].
pub struct Faults {
    sent: AtomicUsize,
    flip_at: AtomicUsize,
    mute_from: AtomicUsize,
    delay_us: AtomicU64,
}

impl Faults {
    fn new() -> Self {
        Self {
            sent: AtomicUsize::new(0),
            flip_at: AtomicUsize::new(usize::MAX),
            mute_from: AtomicUsize::new(usize::MAX),
            delay_us: AtomicU64::new(0),
        }
    }

    pub fn reset(&self) {
        self.sent.store(0, Ordering::SeqCst);
    }

    /// Invert bit 4 of the binary byte at `index`.
    pub fn flip_at(&self, index: usize) {
        self.flip_at.store(index, Ordering::SeqCst);
    }

    /// Drop all output, text included, from binary byte `index` on.
    pub fn mute_from(&self, index: usize) {
        self.mute_from.store(index, Ordering::SeqCst);
    }

    /// Sleep before every binary send (acks, on the write path).
    pub fn delay_binary(&self, delay: Duration) {
        self.delay_us.store(delay.as_micros() as u64, Ordering::SeqCst);
    }

    fn muted(&self) -> bool {
        self.sent.load(Ordering::SeqCst) >= self.mute_from.load(Ordering::SeqCst)
    }
}

struct SimConsole {
    wire: Arc<Wire>,
    faults: Arc<Faults>,
}

impl fmt::Write for SimConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.faults.muted() {
            return Ok(());
        }
        let text = s.replace('\n', "\r\n");
        self.wire.to_host.push(text.as_bytes());
        Ok(())
    }
}

impl Console for SimConsole {
    fn getchar(&mut self) -> Option<u8> {
        let ch = self.wire.to_device.pop();
        if ch.is_none() {
            thread::yield_now();
        }
        ch
    }

    fn puts_binary(&mut self, data: &[u8]) -> Result<(), Stalled> {
        let delay = self.faults.delay_us.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_micros(delay));
        }
        let flip_at = self.faults.flip_at.load(Ordering::SeqCst);
        let mute_from = self.faults.mute_from.load(Ordering::SeqCst);
        let mut out = Vec::with_capacity(data.len());
        for &byte in data {
            let index = self.faults.sent.fetch_add(1, Ordering::SeqCst);
            if index >= mute_from {
                continue;
            }
            out.push(if index == flip_at { byte ^ 0x10 } else { byte });
        }
        self.wire.to_host.push(&out);
        Ok(())
    }

    fn break_pending(&mut self) -> bool {
        self.wire.to_device.take_through(BREAK)
    }
}

struct StdClock {
    start: Instant,
}

impl Clock for StdClock {
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

/// EEPROM contents shared with the test.
pub type Memory = Arc<Mutex<Vec<u8>>>;

struct MemProm {
    mem: Memory,
}

impl Prom for MemProm {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), PromError> {
        let start = addr as usize;
        buf.copy_from_slice(&self.mem.lock().unwrap()[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), PromError> {
        let start = addr as usize;
        let mut mem = self.mem.lock().unwrap();
        for (cell, byte) in mem[start..start + data.len()].iter_mut().zip(data) {
            *cell &= byte;
        }
        Ok(())
    }

    fn erase(&mut self, mode: EraseMode, console: &mut dyn Console) -> Result<(), PromError> {
        let mut mem = self.mem.lock().unwrap();
        match mode {
            EraseMode::Chip => mem.fill(0xff),
            EraseMode::Sectors { addr, len } => {
                let first = addr as usize / SECTOR_SIZE;
                let last = (addr as usize + len.max(1) as usize - 1) / SECTOR_SIZE;
                mem[first * SECTOR_SIZE..(last + 1) * SECTOR_SIZE].fill(0xff);
            }
        }
        let _ = console.write_str("\r80 0.001 sec    Done\n");
        Ok(())
    }

    fn status(&mut self) -> u16 {
        0x0080
    }

    fn status_clear(&mut self) {}

    fn id(&mut self) -> u32 {
        MX29F1615_ID
    }

    fn disable(&mut self) {}
}

/// Programmer firmware core running on its own thread, attached to a
/// fresh [`Wire`]. Stopped when dropped.
pub struct SimDevice {
    pub wire: Arc<Wire>,
    pub faults: Arc<Faults>,
    pub mem: Memory,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimDevice {
    pub fn start() -> Self {
        let wire = Wire::new();
        let faults = Arc::new(Faults::new());
        let mem: Memory = Arc::new(Mutex::new(vec![0xff; EEPROM_SIZE as usize]));
        let stop = Arc::new(AtomicBool::new(false));

        let console = SimConsole {
            wire: wire.clone(),
            faults: faults.clone(),
        };
        let prom = MemProm { mem: mem.clone() };
        let running = stop.clone();
        let thread = thread::spawn(move || {
            let clock = StdClock {
                start: Instant::now(),
            };
            let mut dev = Programmer::new(console, clock, prom);
            let mut shell = Shell::new("mxprog-sim 0.2.0");
            while !running.load(Ordering::Acquire) {
                let _ = shell.poll(&mut dev);
                dev.poll();
            }
        });

        Self {
            wire,
            faults,
            mem,
            stop,
            thread: Some(thread),
        }
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector::new(self.wire.clone())
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
