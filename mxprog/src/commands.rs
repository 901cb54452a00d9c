// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Operation implementations for the command line tool.

use std::fs;
use std::io::{self, BufRead, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;

use mxprog::eeprom::{self, EraseTarget};
use mxprog::verify::{format_fail_range, REPORT_MAX};
use mxprog::{ByteLink, Error, Link};
use mxprog_common::protocol::{EEPROM_SIZE, MX29F1615_ID};

use crate::cli::Cli;

/// Leaves terminal mode.
const CTRL_X: u8 = 0x18;
/// Sends the next byte as is.
const CTRL_V: u8 = 0x16;
/// Time for the last output to arrive once stdin is exhausted.
const EOF_LINGER: Duration = Duration::from_millis(400);

/// Run the operations selected on the command line.
pub fn execute(link: &mut Link<'_>, cli: &Cli) -> Result<()> {
    if cli.term {
        return terminal(link);
    }
    if cli.identify {
        return identify(link);
    }
    if cli.read {
        return read(link, cli, file_arg(cli)?);
    }

    if cli.erase {
        erase(link, EraseTarget::from_options(cli.addr, cli.len), cli.yes)?;
    }
    if cli.write || cli.verify {
        let file = file_arg(cli)?;
        let image =
            fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        let addr = cli.addr.unwrap_or(0) as usize;
        let len = match cli.len {
            Some(len) if len as usize > image.len() => bail!(
                "Length 0x{:x} is more than the 0x{:x} bytes of {}",
                len,
                image.len(),
                file.display()
            ),
            Some(len) => len as usize,
            None => image.len().min(EEPROM_SIZE as usize),
        };
        if addr + len > EEPROM_SIZE as usize {
            bail!(
                "0x{:x} bytes at 0x{:x} do not fit in the 0x{:x} byte EEPROM",
                len,
                addr,
                EEPROM_SIZE
            );
        }

        let data = &image[..len];
        let mut base = addr;
        loop {
            if cli.write {
                write(link, base as u32, data, file)?;
            }
            if cli.verify {
                verify(link, base as u32, data, cli.all)?;
            }
            base += len;
            if !cli.fill || base + len > EEPROM_SIZE as usize {
                break;
            }
        }
    }
    Ok(())
}

fn file_arg(cli: &Cli) -> Result<&PathBuf> {
    cli.file.as_ref().context("No filename given")
}

fn progress_bar(what: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:8} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}%")?
            .progress_chars("#>-"),
    );
    pb.set_message(what.to_string());
    Ok(pb)
}

fn identify(link: &mut Link<'_>) -> Result<()> {
    let id = eeprom::identify(link)?;
    let known = u32::from_str_radix(&id, 16).is_ok_and(|id| id == MX29F1615_ID);
    println!("{}  {}", id, if known { "MX29F1615" } else { "Unknown" });
    Ok(())
}

fn read(link: &mut Link<'_>, cli: &Cli, file: &Path) -> Result<()> {
    let addr = cli.addr.unwrap_or(0);
    let len = cli.len.unwrap_or(EEPROM_SIZE - addr);
    if addr.checked_add(len).map_or(true, |end| end > EEPROM_SIZE) {
        bail!("0x{:x} bytes at 0x{:x} run past the end of the EEPROM", len, addr);
    }
    let mut buf = vec![0u8; len as usize];

    let pb = progress_bar("Read")?;
    let result = eeprom::read(link, addr, &mut buf, &mut |p| pb.set_position(p as u64));
    let received = match &result {
        Ok(stats) => stats.bytes,
        Err(incomplete) => incomplete.received,
    };
    if result.is_ok() {
        pb.finish();
    } else {
        pb.abandon();
    }

    // Whatever arrived intact is kept, even after a failure.
    fs::write(file, &buf[..received])
        .with_context(|| format!("Failed to write {}", file.display()))?;
    if let Err(incomplete) = result {
        let offset = incomplete.error.offset();
        return Err(located(incomplete, offset, addr, "Read"));
    }
    println!(
        "Read 0x{:x} bytes from device and wrote to file {}",
        received,
        file.display()
    );
    Ok(())
}

fn write(link: &mut Link<'_>, addr: u32, data: &[u8], file: &Path) -> Result<()> {
    println!(
        "Writing 0x{:06x} bytes to EEPROM starting at address 0x{:x}",
        data.len(),
        addr
    );
    let pb = progress_bar("Write")?;
    let outcome = match eeprom::write(link, addr, data, &mut |p| pb.set_position(p as u64)) {
        Ok(outcome) => outcome,
        Err(e) => {
            pb.abandon();
            let offset = e.offset();
            return Err(located(e, offset, addr, "Write"));
        }
    };
    pb.finish();
    println!(
        "Wrote 0x{:x} bytes to device from file {}",
        outcome.stats.bytes,
        file.display()
    );
    println!("Status: {}", outcome.status);
    Ok(())
}

fn verify(link: &mut Link<'_>, addr: u32, expected: &[u8], all: bool) -> Result<()> {
    let report_max = if all { None } else { Some(REPORT_MAX) };
    let pb = progress_bar("Verify")?;
    let (actual, report) =
        match eeprom::verify(link, addr, expected, report_max, &mut |p| pb.set_position(p as u64)) {
            Ok(outcome) => outcome,
            Err(incomplete) => {
                pb.abandon();
                let offset = incomplete.error.offset();
                return Err(located(incomplete, offset, addr, "Verify"));
            }
        };
    pb.finish();

    for range in &report.ranges {
        print!("{}", format_fail_range(expected, &actual, range, addr, all));
    }
    if !report.is_match() {
        bail!("{} miscompares", report.miscompares);
    }
    println!("Verify success");
    Ok(())
}

/// Attach the EEPROM address to a transfer failure. Transfer offsets
/// are also offsets into the file.
fn located<E>(error: E, offset: Option<usize>, base: u32, what: &str) -> anyhow::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let error = anyhow::Error::new(error);
    match offset {
        Some(offset) => error.context(format!(
            "{} failed at EEPROM address 0x{:06x} (file offset 0x{:x})",
            what,
            base as usize + offset,
            offset
        )),
        None => error.context(format!("{} failed", what)),
    }
}

fn erase(link: &mut Link<'_>, target: EraseTarget, yes: bool) -> Result<()> {
    if !yes && !are_you_sure(&target.to_string())? {
        return Err(Error::UserAbort.into());
    }
    let mut stdout = io::stdout();
    eeprom::erase(link, target, &mut |text| {
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    })?;
    println!();
    Ok(())
}

fn are_you_sure(prompt: &str) -> Result<bool> {
    print!("{} - are you sure? (y/n) ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim_start().chars().next(), Some('y' | 'Y')))
}

/// Pass stdin to the programmer and its output to stdout until ^X.
///
/// stdin is read as the terminal delivers it, so input goes out a line
/// at a time.
fn terminal(link: &mut Link<'_>) -> Result<()> {
    link.set_terminal(true);
    println!("<< Type ^X to exit.  Opened {} >>", link.name());

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut byte = [0u8];
    let mut literal = false;
    let result = loop {
        match input.read(&mut byte) {
            Ok(0) => {
                thread::sleep(EOF_LINGER);
                break Ok(());
            }
            Ok(_) => {
                let ch = byte[0];
                if literal {
                    literal = false;
                } else if ch == CTRL_X {
                    break Ok(());
                } else if ch == CTRL_V {
                    literal = true;
                    continue;
                }
                if link.send(&[ch]).is_err() {
                    warn!("programmer is not accepting input");
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => break Err(e.into()),
        }
    };
    link.set_terminal(false);
    result
}
