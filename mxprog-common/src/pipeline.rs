// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Outstanding-acknowledgement FIFO for a chunk sender.
//!
//! Each entry is the stream position of a CRC the sender has emitted but
//! whose status byte it has not read yet. Senders pop the oldest entry
//! before pushing once the pipeline is full, so at most `N` chunks are
//! ever in flight.

use heapless::Deque;

pub struct AckPipeline<const N: usize> {
    pending: Deque<u32, N>,
    high_water: usize,
}

impl<const N: usize> Default for AckPipeline<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> AckPipeline<N> {
    pub const fn new() -> Self {
        Self {
            pending: Deque::new(),
            high_water: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.pending.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Record a chunk boundary awaiting its acknowledgement.
    ///
    /// Returns the position back if the pipeline is already full.
    pub fn push(&mut self, pos: u32) -> Result<(), u32> {
        self.pending.push_back(pos)?;
        self.high_water = self.high_water.max(self.pending.len());
        Ok(())
    }

    /// Oldest unacknowledged position.
    pub fn pop(&mut self) -> Option<u32> {
        self.pending.pop_front()
    }

    /// Largest number of entries ever outstanding at once.
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}
