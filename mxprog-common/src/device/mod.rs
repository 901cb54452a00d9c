// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Hardware-free programmer core.
//!
//! The firmware supplies three collaborators and the core does the rest:
//! - [`Console`]: the USB CDC byte stream (text out, binary out, input queue)
//! - [`Clock`]: a monotonic microsecond counter
//! - [`Prom`]: byte-addressed EEPROM access, normally [`mx29f1615::Mx29f1615`]
//!
//! Everything here is polled from a single loop; nothing blocks on an
//! interrupt. Waiting means spinning on the clock while calling
//! [`Console::getchar`], which also keeps the transport serviced.

pub mod mx29f1615;
pub mod prom;
pub mod shell;
pub mod transfer;

use core::fmt;

pub use prom::{EraseMode, Prom, PromError};
pub use shell::{Request, Shell};
pub use transfer::TransferFault;

/// Raw output could not be handed to the transport before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stalled;

/// Byte-oriented, bidirectional link to the host.
///
/// Text written through [`fmt::Write`] has `\n` expanded to `\r\n`;
/// [`Console::puts_binary`] sends bytes untouched.
pub trait Console: fmt::Write {
    /// Next received byte, or `None` if nothing is queued.
    ///
    /// Implementations push out pending output before looking at the
    /// input queue so that a caller spinning here never starves the
    /// transmit side.
    fn getchar(&mut self) -> Option<u8>;

    /// Send raw bytes, failing if the transport stops draining.
    fn puts_binary(&mut self, data: &[u8]) -> Result<(), Stalled>;

    /// Whether the host has typed ^C. Input up to and including the
    /// ^C is consumed when it has.
    fn break_pending(&mut self) -> bool;
}

/// Monotonic time source.
pub trait Clock {
    fn now_us(&self) -> u64;

    fn deadline_ms(&self, ms: u32) -> u64 {
        self.now_us() + u64::from(ms) * 1000
    }

    fn has_elapsed(&self, deadline: u64) -> bool {
        self.now_us() >= deadline
    }
}

/// The device side of the programmer: console, clock and EEPROM, owned
/// together and handed by reference to the shell and transfer engine.
pub struct Programmer<C, K, P> {
    pub console: C,
    pub clock: K,
    pub prom: P,
}

impl<C: Console, K: Clock, P: Prom> Programmer<C, K, P> {
    pub fn new(console: C, clock: K, prom: P) -> Self {
        Self {
            console,
            clock,
            prom,
        }
    }

    /// Wait up to `timeout_ms` for the next input byte.
    pub fn getchar_wait(&mut self, timeout_ms: u32) -> Option<u8> {
        let deadline = self.clock.deadline_ms(timeout_ms);
        loop {
            if let Some(ch) = self.console.getchar() {
                return Some(ch);
            }
            if self.clock.has_elapsed(deadline) {
                return None;
            }
        }
    }

    /// Throw away all input arriving during the next `ms` milliseconds.
    pub fn discard_input(&mut self, ms: u32) {
        let deadline = self.clock.deadline_ms(ms);
        while !self.clock.has_elapsed(deadline) {
            let _ = self.console.getchar();
        }
    }

    /// Idle housekeeping, called from the main loop.
    pub fn poll(&mut self) {
        self.prom.poll();
    }
}
