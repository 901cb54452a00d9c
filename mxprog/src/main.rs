// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host utility for the MX29F1615 EEPROM programmer.
//!
//! Usage:
//!   mxprog -i
//!   mxprog -r image.bin -a 0x100000 -l 0x1000
//!   mxprog -e -w -v image.bin
//!   mxprog -t -d /dev/ttyACM0

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    let args = cli::Cli::parse();
    if let Err(e) = args.validate() {
        e.exit();
    }
    cli::run(args)
}
