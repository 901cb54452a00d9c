// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Comparison of an image against EEPROM contents.

use std::fmt::Write as _;
use std::ops::Range;

/// Bytes shown per miscompare range unless everything was requested.
pub const SHOW_BYTES: usize = 16;

/// Miscompare ranges reported unless everything was requested.
pub const REPORT_MAX: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Differing bytes.
    pub miscompares: usize,
    /// Runs of differing bytes, at most the `report_max` given to
    /// [`compare`].
    pub ranges: Vec<Range<usize>>,
}

impl VerifyReport {
    pub fn is_match(&self) -> bool {
        self.miscompares == 0
    }
}

/// Compare `expected` with `actual` over their common length.
///
/// Every differing byte is counted; only the first `report_max` runs are
/// recorded (`None` records all).
pub fn compare(expected: &[u8], actual: &[u8], report_max: Option<usize>) -> VerifyReport {
    let mut report = VerifyReport::default();
    let limit = report_max.unwrap_or(usize::MAX);
    let mut run: Option<usize> = None;

    for (pos, (want, got)) in expected.iter().zip(actual).enumerate() {
        if want != got {
            report.miscompares += 1;
            run.get_or_insert(pos);
        } else if let Some(start) = run.take() {
            if report.ranges.len() < limit {
                report.ranges.push(start..pos);
            }
        }
    }
    if let Some(start) = run {
        if report.ranges.len() < limit {
            report.ranges.push(start..expected.len().min(actual.len()));
        }
    }
    report
}

/// Two-line dump of one miscompare range, `base` being the EEPROM
/// address of index 0.
pub fn format_fail_range(
    expected: &[u8],
    actual: &[u8],
    range: &Range<usize>,
    base: u32,
    show_all: bool,
) -> String {
    let addr = base as usize + range.start;
    let shown = if show_all {
        range.len()
    } else {
        range.len().min(SHOW_BYTES)
    };
    let mut out = String::new();
    for (label, data) in [("file  ", expected), ("eeprom", actual)] {
        let _ = write!(out, "{} 0x{:06x}:", label, addr);
        for byte in &data[range.start..range.start + shown] {
            let _ = write!(out, " {:02x}", byte);
        }
        if shown < range.len() {
            out.push_str(" ...");
        }
        out.push('\n');
    }
    out
}
