// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Error types for talking to the programmer.

use thiserror::Error;

/// Failure of a command or transfer. Offsets are relative to the start
/// of the transfer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{what} timeout at 0x{offset:x}")]
    Timeout { what: &'static str, offset: usize },

    #[error(
        "Bad CRC {received:08x} received from programmer (should be {expected:08x}) at 0x{start:x}-0x{end:x}"
    )]
    CrcMismatch {
        start: usize,
        end: usize,
        expected: u32,
        received: u32,
    },

    #[error("Remote sent error {code} at 0x{offset:x}")]
    RemoteError { code: u8, offset: usize },

    #[error("Status from programmer: {message}")]
    RemoteMessage { message: String },

    #[error("CMD: timeout waiting for prompt")]
    PromptTimeout,

    #[error("Aborted by user")]
    UserAbort,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transfer offset the failure points at, if it has one.
    pub fn offset(&self) -> Option<usize> {
        match *self {
            Error::Timeout { offset, .. } | Error::RemoteError { offset, .. } => Some(offset),
            Error::CrcMismatch { start, .. } => Some(start),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A receive that stopped early. `received` bytes at the start of the
/// buffer passed their CRC check and are valid.
#[derive(Debug, Error)]
#[error("{error} (0x{received:x} bytes received)")]
pub struct Incomplete {
    pub received: usize,
    #[source]
    pub error: Error,
}
