// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command line shell: line editing, prompt and the command table.
//!
//! The host synchronizes on the prompt, so every completed line (even an
//! empty one) is answered with command output followed by [`PROMPT`].

use core::fmt::Write;

use heapless::Vec;

use super::prom::status_text;
use super::{Clock, Console, EraseMode, Programmer, Prom};
use crate::protocol::{Rc, BREAK, EEPROM_SIZE, KILL_LINE, PROMPT};

/// Longest accepted command line.
pub const LINE_MAX: usize = 80;

/// Most whitespace-separated words in a command line.
pub const ARGS_MAX: usize = 8;

/// Action the shell cannot perform itself and hands to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Reset,
}

/// Why a command did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmdError {
    /// Bad or missing arguments: print the usage text.
    Usage,
    /// Failed with this return code: print `FAILURE <code>`.
    Failed(u8),
}

impl From<Rc> for CmdError {
    fn from(rc: Rc) -> Self {
        CmdError::Failed(rc.code())
    }
}

/// What a command handler gets to work with.
struct Ctx<'a, C, K, P> {
    dev: &'a mut Programmer<C, K, P>,
    version: &'static str,
}

type Handler<C, K, P> = fn(&mut Ctx<'_, C, K, P>, &[&str]) -> Result<Option<Request>, CmdError>;

struct Entry<C, K, P> {
    name: &'static str,
    usage: &'static str,
    help: &'static str,
    run: Handler<C, K, P>,
}

fn commands<C: Console, K: Clock, P: Prom>() -> [Entry<C, K, P>; 4] {
    [
        Entry {
            name: "help",
            usage: "help",
            help: "Show this list",
            run: cmd_help,
        },
        Entry {
            name: "prom",
            usage: PROM_USAGE,
            help: "EEPROM access",
            run: cmd_prom,
        },
        Entry {
            name: "reset",
            usage: "reset",
            help: "Reset the programmer (drops USB)",
            run: cmd_reset,
        },
        Entry {
            name: "version",
            usage: "version",
            help: "Show firmware version",
            run: cmd_version,
        },
    ]
}

const PROM_USAGE: &str = "prom erase chip|<addr> [<len>]\n\
                          prom id\n\
                          prom read <addr> <len>\n\
                          prom status [clear]\n\
                          prom write <addr> <len>\n\
                          prom disable";

/// Result of feeding one input byte to the line editor.
#[derive(Debug, PartialEq, Eq)]
enum Edit {
    Pending,
    Submit,
}

pub struct Shell {
    version: &'static str,
    line: Vec<u8, LINE_MAX>,
    prompted: bool,
    last_cr: bool,
}

impl Shell {
    pub fn new(version: &'static str) -> Self {
        Self {
            version,
            line: Vec::new(),
            prompted: false,
            last_cr: false,
        }
    }

    /// Print the prompt if due, then consume pending input. Runs at most
    /// one command per call.
    pub fn poll<C: Console, K: Clock, P: Prom>(
        &mut self,
        dev: &mut Programmer<C, K, P>,
    ) -> Option<Request> {
        if !self.prompted {
            let _ = dev.console.write_str(PROMPT);
            self.prompted = true;
        }
        while let Some(ch) = dev.console.getchar() {
            if self.edit(ch, &mut dev.console) == Edit::Submit {
                let request = self.execute(dev);
                self.line.clear();
                self.prompted = false;
                return request;
            }
        }
        None
    }

    fn edit(&mut self, ch: u8, console: &mut impl Console) -> Edit {
        let after_cr = core::mem::replace(&mut self.last_cr, ch == b'\r');
        match ch {
            b'\n' if after_cr => Edit::Pending,
            b'\r' | b'\n' => {
                let _ = console.write_str("\n");
                Edit::Submit
            }
            0x08 | 0x7f => {
                if self.line.pop().is_some() {
                    let _ = console.write_str("\x08 \x08");
                }
                Edit::Pending
            }
            KILL_LINE => {
                for _ in 0..self.line.len() {
                    let _ = console.write_str("\x08 \x08");
                }
                self.line.clear();
                Edit::Pending
            }
            BREAK => {
                let _ = console.write_str("^C\n");
                self.line.clear();
                Edit::Submit
            }
            0x20..=0x7e => {
                if self.line.push(ch).is_ok() {
                    let _ = console.write_char(ch as char);
                }
                Edit::Pending
            }
            _ => Edit::Pending,
        }
    }

    fn execute<C: Console, K: Clock, P: Prom>(
        &self,
        dev: &mut Programmer<C, K, P>,
    ) -> Option<Request> {
        let Ok(text) = core::str::from_utf8(&self.line) else {
            return None;
        };
        let mut argv: Vec<&str, ARGS_MAX> = Vec::new();
        for word in text.split_ascii_whitespace() {
            if argv.push(word).is_err() {
                let _ = writeln!(dev.console, "Too many arguments");
                return None;
            }
        }
        let name = *argv.first()?;

        let table = commands::<C, K, P>();
        let Some(entry) = table.iter().find(|e| e.name == name) else {
            let _ = writeln!(dev.console, "Unknown command: {}", name);
            return None;
        };

        let mut ctx = Ctx {
            dev,
            version: self.version,
        };
        match (entry.run)(&mut ctx, &argv) {
            Ok(request) => request,
            Err(CmdError::Usage) => {
                let _ = writeln!(ctx.dev.console, "{}", entry.usage);
                None
            }
            Err(CmdError::Failed(code)) => {
                let _ = writeln!(ctx.dev.console, "FAILURE {}", code);
                None
            }
        }
    }
}

fn cmd_help<C: Console, K: Clock, P: Prom>(
    ctx: &mut Ctx<'_, C, K, P>,
    _argv: &[&str],
) -> Result<Option<Request>, CmdError> {
    for entry in commands::<C, K, P>().iter() {
        let _ = writeln!(ctx.dev.console, "{:<8} - {}", entry.name, entry.help);
    }
    Ok(None)
}

fn cmd_reset<C: Console, K: Clock, P: Prom>(
    _ctx: &mut Ctx<'_, C, K, P>,
    _argv: &[&str],
) -> Result<Option<Request>, CmdError> {
    Ok(Some(Request::Reset))
}

fn cmd_version<C: Console, K: Clock, P: Prom>(
    ctx: &mut Ctx<'_, C, K, P>,
    _argv: &[&str],
) -> Result<Option<Request>, CmdError> {
    let _ = writeln!(ctx.dev.console, "{}", ctx.version);
    Ok(None)
}

/// Parse a hex number with optional `0x` prefix.
pub fn parse_hex(text: &str) -> Option<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}

fn hex_arg(text: &str) -> Result<u32, CmdError> {
    parse_hex(text).ok_or(CmdError::Failed(Rc::BadParam.code()))
}

fn range_arg(argv: &[&str]) -> Result<(u32, u32), CmdError> {
    let [addr, len] = argv else {
        return Err(CmdError::Usage);
    };
    let addr = hex_arg(addr)?;
    let len = hex_arg(len)?;
    match addr.checked_add(len) {
        Some(end) if end <= EEPROM_SIZE => Ok((addr, len)),
        _ => Err(Rc::BadParam.into()),
    }
}

fn cmd_prom<C: Console, K: Clock, P: Prom>(
    ctx: &mut Ctx<'_, C, K, P>,
    argv: &[&str],
) -> Result<Option<Request>, CmdError> {
    let dev = &mut *ctx.dev;
    let Some(&verb) = argv.get(1) else {
        return Err(CmdError::Usage);
    };
    let args = &argv[2..];

    match verb {
        "read" => {
            let (addr, len) = range_arg(args)?;
            dev.read_binary(addr, len)
                .map_err(|f| CmdError::Failed(f.rc()))?;
        }
        "write" => {
            let (addr, len) = range_arg(args)?;
            dev.write_binary(addr, len)
                .map_err(|f| CmdError::Failed(f.rc()))?;
        }
        "status" => match args {
            [] => {
                let status = dev.prom.status();
                let _ = writeln!(dev.console, "{:04x} {}", status, status_text(status));
            }
            ["clear"] => dev.prom.status_clear(),
            _ => return Err(CmdError::Usage),
        },
        "erase" => {
            let mode = match args {
                ["chip"] => EraseMode::Chip,
                [addr] => EraseMode::Sectors {
                    addr: hex_arg(addr)?,
                    len: 0,
                },
                [addr, len] => EraseMode::Sectors {
                    addr: hex_arg(addr)?,
                    len: hex_arg(len)?,
                },
                _ => return Err(CmdError::Usage),
            };
            if let Err(e) = dev.prom.erase(mode, &mut dev.console) {
                let _ = writeln!(dev.console, "  {}", e);
                return Err(CmdError::Failed(e.code()));
            }
        }
        "id" => {
            let id = dev.prom.id();
            let _ = writeln!(dev.console, "{:08x}", id);
        }
        "disable" => dev.prom.disable(),
        _ => return Err(CmdError::Usage),
    }
    Ok(None)
}
