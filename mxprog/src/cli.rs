// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use mxprog::{find_programmer, Link, LinkConfig, SerialConnector};
use mxprog_common::protocol::EEPROM_SIZE;

use crate::commands;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "mxprog", version)]
#[command(about = "Read, write, verify and erase an MX29F1615 EEPROM")]
pub struct Cli {
    /// Starting EEPROM address
    #[arg(short, long, value_parser = parse_number)]
    pub addr: Option<u32>,

    /// Length in bytes
    #[arg(short, long, value_parser = parse_number)]
    pub len: Option<u32>,

    /// Read EEPROM to file
    #[arg(short, long)]
    pub read: bool,

    /// Write file to EEPROM
    #[arg(short, long)]
    pub write: bool,

    /// Verify EEPROM against file
    #[arg(short, long)]
    pub verify: bool,

    /// Erase EEPROM (chip, sector at -a, or sectors covering -a/-l)
    #[arg(short, long)]
    pub erase: bool,

    /// Report EEPROM id
    #[arg(short, long)]
    pub identify: bool,

    /// Talk to the programmer's command line
    #[arg(short, long)]
    pub term: bool,

    /// Repeat the image to fill the whole EEPROM
    #[arg(short, long)]
    pub fill: bool,

    /// Answer yes to every question
    #[arg(short, long)]
    pub yes: bool,

    /// Delay in milliseconds after each byte sent
    #[arg(short = 'D', long, value_name = "MS", default_value_t = 0)]
    pub delay: u64,

    /// Serial device of the programmer (found automatically if omitted)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Show every miscompare in full
    #[arg(short = 'A', long)]
    pub all: bool,

    /// Copy every byte received from the programmer to this file
    #[arg(long, env = "TERM_DEBUG", value_name = "FILE")]
    pub debug_log: Option<PathBuf>,

    /// Image file for -r, -w and -v
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,
}

/// Parse a number the way C's `%i` does: `0x` hex, leading `0` octal,
/// otherwise decimal.
fn parse_number(text: &str) -> Result<u32, String> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        u32::from_str_radix(&text[1..], 8)
    } else {
        text.parse()
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", text, e))
}

impl Cli {
    /// Check option combinations clap cannot express.
    pub fn validate(&self) -> Result<(), clap::Error> {
        let usage = |kind, msg: &str| Err(Cli::command().error(kind, msg));

        let exclusive = [self.identify, self.read, self.term]
            .iter()
            .filter(|&&on| on)
            .count();
        let combined = self.erase || self.write || self.verify;

        if exclusive > 1 || (exclusive == 1 && combined) {
            return usage(
                ErrorKind::ArgumentConflict,
                "-i, -r and -t can not be combined with other operations",
            );
        }
        if exclusive == 0 && !combined {
            return usage(
                ErrorKind::MissingRequiredArgument,
                "specify an operation: -e, -i, -r, -t, -v or -w",
            );
        }
        if (self.read || self.write || self.verify) && self.file.is_none() {
            return usage(
                ErrorKind::MissingRequiredArgument,
                "-r, -w and -v need a filename",
            );
        }
        if self.fill && !(self.write || self.verify) {
            return usage(ErrorKind::ArgumentConflict, "-f needs -w or -v");
        }
        if self.len == Some(0) {
            return usage(ErrorKind::InvalidValue, "length 0 is invalid");
        }
        if self.addr.is_some_and(|addr| addr >= EEPROM_SIZE) {
            return usage(
                ErrorKind::InvalidValue,
                &format!("address must be below 0x{:x}", EEPROM_SIZE),
            );
        }
        Ok(())
    }
}

/// Execute the parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let device = match &cli.device {
        Some(device) => device.clone(),
        None => find_programmer().context("No programmer found; specify one with -d")?,
    };
    let connector = SerialConnector::new(device.as_str());
    let config = LinkConfig {
        pacing_ms: cli.delay,
        debug_log: cli.debug_log.clone(),
    };

    Link::run(&connector, &config, |link| commands::execute(link, &cli))
        .with_context(|| format!("Failed to open {}", device))?
}
