// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Common types and the device core for the MX29F1615 programmer.
//!
//! This crate supports both `no_std` (firmware) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: Enables `std::error::Error` impls for host tools
//!
//! The host utility uses the CRC engine, ring buffer, ack pipeline and
//! protocol constants. The firmware additionally drives everything under
//! [`device`], which is hardware-free and unit tested on the host.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod crc;
pub mod device;
pub mod pipeline;
pub mod protocol;
pub mod ring;

// Re-export commonly used types
pub use crc::crc32;
pub use pipeline::AckPipeline;
pub use protocol::{DATA_CRC_INTERVAL, EEPROM_SIZE, PROMPT};
pub use protocol::{READ_PIPELINE_DEPTH, WRITE_PIPELINE_DEPTH};
pub use ring::{Consumer, Producer, RingBuffer};
