// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Byte link to the programmer.
//!
//! Two threads own the serial handle:
//! - the reader pulls bytes off the port into the RX ring (or straight to
//!   stdout in terminal mode) and is the only thread that reopens the
//!   device after an I/O error
//! - the writer drains the TX ring into the port, optionally pacing
//!   bytes, and keeps whatever it could not write for the next handle
//!
//! The main thread sees only the other ends of the two rings, through
//! [`Link`] and the [`ByteLink`] primitives.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use mxprog_common::ring::{Consumer, Producer, RingBuffer};

use crate::port::Connector;

pub const RX_RING_SIZE: usize = 8192;
pub const TX_RING_SIZE: usize = 4096;

/// Longest wait for TX ring space while sending binary data.
pub const SEND_STALL_MS: u64 = 500;
/// Longest wait for TX ring space while sending command text.
pub const STR_STALL_MS: u64 = 1000;

const REOPEN_INTERVAL: Duration = Duration::from_millis(400);
const WRITER_ABSENT_WAIT: Duration = Duration::from_millis(500);
const NOTICE_INTERVAL: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_micros(100);
const WRITE_BATCH: usize = 64;

/// The TX ring stayed full past the stall timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stalled;

/// Byte primitives the transfer and command layers are written against.
///
/// All timeouts are idle times: they restart whenever a byte moves.
pub trait ByteLink {
    /// Queue `data` for sending, failing if no byte can be queued for
    /// `stall_ms`.
    fn send_within(&mut self, data: &[u8], stall_ms: u64) -> Result<(), Stalled>;

    /// Fill `buf` until it is full or nothing arrives for `idle_ms`.
    /// Returns the number of bytes received.
    fn receive(&mut self, buf: &mut [u8], idle_ms: u64) -> usize;

    /// Wait until everything queued has been handed to the device.
    fn wait_flushed(&mut self, timeout_ms: u64) -> bool;

    fn send(&mut self, data: &[u8]) -> Result<(), Stalled> {
        self.send_within(data, SEND_STALL_MS)
    }

    fn send_str(&mut self, text: &str) -> Result<(), Stalled> {
        self.send_within(text.as_bytes(), STR_STALL_MS)
    }

    fn receive_byte(&mut self, idle_ms: u64) -> Option<u8> {
        let mut byte = [0u8];
        (self.receive(&mut byte, idle_ms) == 1).then_some(byte[0])
    }

    /// Throw input away until the line has been quiet for `idle_ms`.
    fn discard_input(&mut self, idle_ms: u64) {
        let mut scratch = [0u8; 64];
        while self.receive(&mut scratch, idle_ms) == scratch.len() {}
    }

    /// Consume input up to and including `text`. Returns `false` if the
    /// line goes quiet for `idle_ms` first.
    fn wait_for_text(&mut self, text: &str, idle_ms: u64) -> bool {
        let pattern = text.as_bytes();
        let mut matched = 0;
        while matched < pattern.len() {
            let Some(byte) = self.receive_byte(idle_ms) else {
                return false;
            };
            if byte == pattern[matched] {
                matched += 1;
            } else {
                matched = usize::from(byte == pattern[0]);
            }
        }
        true
    }
}

/// Link options.
#[derive(Debug, Clone, Default)]
pub struct LinkConfig {
    /// Delay after every byte written (`-D`).
    pub pacing_ms: u64,
    /// File receiving a copy of every byte read from the device.
    pub debug_log: Option<PathBuf>,
}

struct Shared<'a> {
    connector: &'a dyn Connector,
    running: AtomicBool,
    terminal: AtomicBool,
    reopen_requested: AtomicBool,
    writer_idle: AtomicBool,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    pacing_ms: u64,
}

impl Shared<'_> {
    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn writer(&self) -> MutexGuard<'_, Option<Box<dyn Write + Send>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the running flag when the session body returns or unwinds, so
/// the scoped threads always wind down.
struct StopOnDrop<'a>(&'a AtomicBool);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Main-thread end of the link.
pub struct Link<'a> {
    shared: &'a Shared<'a>,
    rx: Consumer<'a, RX_RING_SIZE>,
    tx: Producer<'a, TX_RING_SIZE>,
}

impl<'a> Link<'a> {
    /// Open the device, start the reader and writer threads and run
    /// `body` against the link. The threads are stopped and joined
    /// before this returns.
    pub fn run<R>(
        connector: &dyn Connector,
        config: &LinkConfig,
        body: impl FnOnce(&mut Link<'_>) -> R,
    ) -> io::Result<R> {
        let conn = connector.open()?;
        let log = config.debug_log.as_ref().and_then(|path| {
            File::create(path)
                .map_err(|e| warn!("Unable to open {} for log: {}", path.display(), e))
                .ok()
        });

        let shared = Shared {
            connector,
            running: AtomicBool::new(true),
            terminal: AtomicBool::new(false),
            reopen_requested: AtomicBool::new(false),
            writer_idle: AtomicBool::new(true),
            writer: Mutex::new(Some(conn.writer)),
            pacing_ms: config.pacing_ms,
        };
        let mut rx_ring = RingBuffer::<RX_RING_SIZE>::new();
        let mut tx_ring = RingBuffer::<TX_RING_SIZE>::new();
        let (rx_prod, rx_cons) = rx_ring.split();
        let (tx_prod, tx_cons) = tx_ring.split();
        let reader = conn.reader;

        let result = thread::scope(|s| {
            let shared = &shared;
            let _stop = StopOnDrop(&shared.running);
            s.spawn(move || reader_thread(shared, reader, rx_prod, log));
            s.spawn(move || writer_thread(shared, tx_cons));

            let mut link = Link {
                shared,
                rx: rx_cons,
                tx: tx_prod,
            };
            body(&mut link)
        });
        Ok(result)
    }

    pub fn name(&self) -> &str {
        self.shared.connector.name()
    }

    /// In terminal mode the reader copies device output to stdout
    /// instead of the RX ring.
    pub fn set_terminal(&mut self, on: bool) {
        self.shared.terminal.store(on, Ordering::Release);
    }

    pub fn tx_space(&self) -> usize {
        self.tx.space_remaining()
    }

    fn is_flushed(&self) -> bool {
        // Ring first: the writer clears `writer_idle` before draining it.
        self.tx.is_flushed() && self.shared.writer_idle.load(Ordering::SeqCst)
    }
}

impl ByteLink for Link<'_> {
    fn send_within(&mut self, data: &[u8], stall_ms: u64) -> Result<(), Stalled> {
        let stall = Duration::from_millis(stall_ms);
        for &byte in data {
            let mut waiting_since = None;
            while !self.tx.put(byte) {
                let since = *waiting_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= stall {
                    return Err(Stalled);
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], idle_ms: u64) -> usize {
        let idle = Duration::from_millis(idle_ms);
        let mut count = 0;
        let mut last = Instant::now();
        while count < buf.len() {
            match self.rx.get() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                    last = Instant::now();
                }
                None if last.elapsed() >= idle => break,
                None => thread::sleep(POLL_INTERVAL),
            }
        }
        count
    }

    fn wait_flushed(&mut self, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while !self.is_flushed() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

/// Rate limiting for the closed/reopened messages.
#[derive(Default)]
struct Notices {
    last: Option<Instant>,
    closed_shown: bool,
}

impl Notices {
    fn due(&self) -> bool {
        self.last.map_or(true, |t| t.elapsed() > NOTICE_INTERVAL)
    }

    fn closed(&mut self, name: &str) {
        self.closed_shown = self.due();
        if self.closed_shown {
            print!("\n<< Closed {} >>", name);
            let _ = io::stdout().flush();
        }
    }

    fn reopened(&mut self, name: &str) {
        if self.due() {
            if !self.closed_shown {
                println!();
            }
            println!("\r<< Reopened {} >>", name);
        }
        self.last = Some(Instant::now());
    }
}

fn reader_thread(
    shared: &Shared<'_>,
    reader: Box<dyn Read + Send>,
    mut rx: Producer<'_, RX_RING_SIZE>,
    mut log: Option<File>,
) {
    let name = shared.connector.name();
    let mut port = Some(reader);
    let mut notices = Notices::default();
    let mut buf = [0u8; 64];

    while shared.running() {
        let Some(reader) = port.as_mut() else {
            port = reopen(shared, &mut notices);
            continue;
        };
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("{}: end of file", name);
                port = None;
            }
            Ok(len) => {
                if let Some(file) = log.as_mut() {
                    if let Err(e) = file.write_all(&buf[..len]).and_then(|_| file.flush()) {
                        warn!("debug log write failed: {}", e);
                        log = None;
                    }
                }
                deliver(shared, &buf[..len], &mut rx);
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                if shared.reopen_requested.load(Ordering::Acquire) {
                    port = None;
                }
            }
            Err(e) => {
                debug!("{}: read failed: {}", name, e);
                port = None;
            }
        }
    }
}

fn deliver(shared: &Shared<'_>, data: &[u8], rx: &mut Producer<'_, RX_RING_SIZE>) {
    if shared.terminal.load(Ordering::Acquire) {
        let mut out = io::stdout().lock();
        let _ = out.write_all(data);
        let _ = out.flush();
        return;
    }
    for &byte in data {
        let mut warned = false;
        while !rx.put(byte) {
            if !warned {
                warn!("RX ring buffer overflow");
                warned = true;
            }
            if !shared.running() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Drop the current handle and poll until the device can be opened
/// again. Returns `None` only on shutdown.
fn reopen(shared: &Shared<'_>, notices: &mut Notices) -> Option<Box<dyn Read + Send>> {
    let name = shared.connector.name();
    *shared.writer() = None;
    notices.closed(name);

    loop {
        if !shared.running() {
            return None;
        }
        thread::sleep(REOPEN_INTERVAL);
        match shared.connector.open() {
            Ok(conn) => {
                *shared.writer() = Some(conn.writer);
                shared.reopen_requested.store(false, Ordering::Release);
                notices.reopened(name);
                return Some(conn.reader);
            }
            Err(e) => debug!("{}: reopen failed: {}", name, e),
        }
    }
}

fn writer_thread(shared: &Shared<'_>, mut tx: Consumer<'_, TX_RING_SIZE>) {
    let batch = if shared.pacing_ms > 0 { 1 } else { WRITE_BATCH };
    let mut pending: Vec<u8> = Vec::with_capacity(WRITE_BATCH);

    while shared.running() {
        if pending.is_empty() && tx.is_empty() {
            shared.writer_idle.store(true, Ordering::SeqCst);
            thread::sleep(POLL_INTERVAL);
            continue;
        }
        shared.writer_idle.store(false, Ordering::SeqCst);
        while pending.len() < batch {
            match tx.get() {
                Some(byte) => pending.push(byte),
                None => break,
            }
        }

        let mut slot = shared.writer();
        let Some(port) = slot.as_mut() else {
            drop(slot);
            thread::sleep(WRITER_ABSENT_WAIT);
            continue;
        };
        match port.write(&pending) {
            Ok(count) => {
                pending.drain(..count);
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => {
                debug!("{}: write failed: {}", shared.connector.name(), e);
                *slot = None;
                shared.reopen_requested.store(true, Ordering::Release);
                drop(slot);
                thread::sleep(WRITER_ABSENT_WAIT);
                continue;
            }
        }
        drop(slot);

        if shared.pacing_ms > 0 {
            thread::sleep(Duration::from_millis(shared.pacing_ms));
        }
    }
}
