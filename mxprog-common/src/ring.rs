// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Lock-free single-producer/single-consumer byte ring buffer.
//!
//! One slot is always left unused, so a ring of capacity `N` holds at
//! most `N - 1` bytes: empty when the indices are equal, full when
//! advancing the producer index would make them equal.
//!
//! The buffer itself only hands out one [`Producer`] and one
//! [`Consumer`] through [`RingBuffer::split`], which needs `&mut` access.
//! That is what enforces the single-writer/single-reader discipline: the
//! two handles may live in different execution contexts (two threads, or
//! an interrupt handler and the main loop), but neither can be cloned.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct RingBuffer<const N: usize> {
    buf: UnsafeCell<[u8; N]>,
    producer: AtomicUsize,
    consumer: AtomicUsize,
}

// Slots are only written by the Producer and only read by the Consumer;
// ownership of a slot is handed over by the Release/Acquire index updates.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<N> {
    const VALID: () = assert!(N >= 2, "ring buffer needs at least two slots");

    pub const fn new() -> Self {
        let _ = Self::VALID;
        Self {
            buf: UnsafeCell::new([0; N]),
            producer: AtomicUsize::new(0),
            consumer: AtomicUsize::new(0),
        }
    }

    /// Number of bytes the ring can hold.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Split into the producer and consumer handles.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let ring: &Self = self;
        (Producer { ring }, Consumer { ring })
    }

    fn used(&self) -> usize {
        let prod = self.producer.load(Ordering::Acquire);
        let cons = self.consumer.load(Ordering::Acquire);
        (prod + N - cons) % N
    }

    #[inline]
    fn slot(&self, index: usize) -> *mut u8 {
        debug_assert!(index < N);
        // Pointer arithmetic on the raw array so no reference to the
        // whole buffer is formed while the other side touches a slot.
        unsafe { self.buf.get().cast::<u8>().add(index) }
    }

    #[inline]
    const fn next(index: usize) -> usize {
        if index + 1 == N {
            0
        } else {
            index + 1
        }
    }
}

/// Write side of a [`RingBuffer`].
pub struct Producer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<const N: usize> Producer<'_, N> {
    /// Append a byte. Returns `false` (and drops the byte) when full.
    pub fn put(&mut self, byte: u8) -> bool {
        let prod = self.ring.producer.load(Ordering::Relaxed);
        let next = RingBuffer::<N>::next(prod);
        if next == self.ring.consumer.load(Ordering::Acquire) {
            return false;
        }
        unsafe { self.ring.slot(prod).write(byte) };
        self.ring.producer.store(next, Ordering::Release);
        true
    }

    /// Append as many bytes of `data` as fit, returning how many were taken.
    pub fn put_slice(&mut self, data: &[u8]) -> usize {
        data.iter().take_while(|&&b| self.put(b)).count()
    }

    /// Free slots left for the producer.
    pub fn space_remaining(&self) -> usize {
        self.ring.capacity() - self.ring.used()
    }

    /// True once the consumer has taken every byte put so far.
    pub fn is_flushed(&self) -> bool {
        self.ring.used() == 0
    }
}

/// Read side of a [`RingBuffer`].
pub struct Consumer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<const N: usize> Consumer<'_, N> {
    /// Take the oldest byte, if any.
    pub fn get(&mut self) -> Option<u8> {
        let cons = self.ring.consumer.load(Ordering::Relaxed);
        if cons == self.ring.producer.load(Ordering::Acquire) {
            return None;
        }
        let byte = unsafe { self.ring.slot(cons).read() };
        self.ring
            .consumer
            .store(RingBuffer::<N>::next(cons), Ordering::Release);
        Some(byte)
    }

    /// Bytes waiting to be taken.
    pub fn len(&self) -> usize {
        self.ring.used()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything currently queued.
    pub fn clear(&mut self) {
        while self.get().is_some() {}
    }

    /// Look for `marker` among the queued bytes. If present, consume
    /// everything up to and including it and return `true`; otherwise
    /// leave the queue untouched.
    pub fn take_through(&mut self, marker: u8) -> bool {
        let prod = self.ring.producer.load(Ordering::Acquire);
        let mut cons = self.ring.consumer.load(Ordering::Relaxed);
        while cons != prod {
            let byte = unsafe { self.ring.slot(cons).read() };
            cons = RingBuffer::<N>::next(cons);
            if byte == marker {
                self.ring.consumer.store(cons, Ordering::Release);
                return true;
            }
        }
        false
    }
}
