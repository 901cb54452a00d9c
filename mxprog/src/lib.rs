// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host side of the MX29F1615 programmer.
//!
//! Layers, bottom up:
//! - [`port`]: opening (and reopening) the USB CDC device
//! - [`link`]: reader/writer threads and timed byte primitives
//! - [`transfer`]: the chunked CRC-32 transfer in both directions
//! - [`session`]: command lines and prompt synchronization
//! - [`eeprom`]: id, status, read, write, verify and erase operations

pub mod eeprom;
pub mod error;
pub mod link;
pub mod port;
pub mod session;
pub mod transfer;
pub mod verify;

pub use error::{Error, Incomplete, Result};
pub use link::{ByteLink, Link, LinkConfig};
pub use port::{find_programmer, Connection, Connector, SerialConnector};
