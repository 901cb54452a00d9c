// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-mode exchange with the programmer's shell.

use std::fmt;

use log::debug;

use mxprog_common::protocol::{KILL_LINE, PROMPT};

use crate::error::{Error, Result};
use crate::link::{ByteLink, Stalled};

/// Quiet time before the fresh prompt is requested.
const PRE_COMMAND_DISCARD_MS: u64 = 50;
const PROMPT_TIMEOUT_MS: u64 = 500;
const ECHO_TIMEOUT_MS: u64 = 200;

/// Prompt without its trailing space, which is left for the echo wait
/// to consume.
const PROMPT_MARK: &str = "CMD>";

/// Issue one command line.
///
/// Kills any partial line, waits for a fresh prompt, sends the command
/// and consumes its echo. Afterwards the link carries the command's
/// output (or binary stream).
pub fn send_cmd(link: &mut dyn ByteLink, cmd: impl fmt::Display) -> Result<()> {
    let cmd = cmd.to_string();
    let stalled = |_: Stalled| Error::Timeout {
        what: "command send",
        offset: 0,
    };

    link.send(&[KILL_LINE]).map_err(stalled)?;
    link.discard_input(PRE_COMMAND_DISCARD_MS);
    link.send_str("\n").map_err(stalled)?;
    if !link.wait_for_text(PROMPT_MARK, PROMPT_TIMEOUT_MS) {
        return Err(Error::PromptTimeout);
    }

    debug!("CMD: {}", cmd);
    link.send_str(&cmd).map_err(stalled)?;
    link.send_str("\n").map_err(stalled)?;
    if !link.wait_for_text("\n", ECHO_TIMEOUT_MS) {
        return Err(Error::Timeout {
            what: "command echo",
            offset: 0,
        });
    }
    Ok(())
}

/// Collect command output until the line is idle for `idle_ms`, minus
/// the trailing prompt.
pub fn recv_output(link: &mut dyn ByteLink, idle_ms: u64) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let len = link.receive(&mut buf, idle_ms);
        raw.extend_from_slice(&buf[..len]);
        if len < buf.len() {
            break;
        }
    }
    let mut text = String::from_utf8_lossy(&raw).into_owned();
    if let Some(body) = text.strip_suffix(PROMPT) {
        text.truncate(body.len());
    }
    text
}
