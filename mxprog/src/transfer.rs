// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host end of the chunked CRC transfer.
//!
//! [`receive_crc`] consumes what the programmer streams for `prom read`
//! and [`send_crc`] produces what it expects for `prom write`. Chunks are
//! [`DATA_CRC_INTERVAL`] bytes, each closed by the rolling CRC-32 and
//! answered by one status byte from the receiving side.

use log::{debug, trace};

use mxprog_common::crc::crc32;
use mxprog_common::pipeline::AckPipeline;
use mxprog_common::protocol::{
    CRC_SIZE, DATA_CRC_INTERVAL, FAILURE_CRC, STATUS_OK, WRITE_PIPELINE_DEPTH,
};

use crate::error::{Error, Incomplete, Result};
use crate::link::{ByteLink, Stalled};

/// Idle wait for the status byte ahead of each chunk.
pub const STATUS_TIMEOUT_MS: u64 = 200;
/// Idle wait within the chunk payload.
pub const DATA_TIMEOUT_MS: u64 = 200;
/// Wait for the CRC. Longer, since the programmer may be reading the
/// next pages from the EEPROM first.
pub const CRC_TIMEOUT_MS: u64 = 2000;
/// Wait for each ack on the write path.
pub const ACK_TIMEOUT_MS: u64 = 200;
/// Quiet time required before starting to send.
pub const PRE_SEND_DISCARD_MS: u64 = 250;

/// Ack byte sent for a chunk whose CRC did not match.
const ACK_CRC_ERROR: u8 = 1;
/// Most bytes of a failure line collected from the programmer.
const MESSAGE_MAX: usize = 64;
const MESSAGE_IDLE_MS: u64 = 100;

/// Counters for one completed (or failed) transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes: usize,
    pub chunks: usize,
    /// Most chunks ever awaiting their ack at once (sending side only).
    pub max_in_flight: usize,
}

/// Calls the observer only when the integer percentage changes.
struct Percent<'a> {
    total: usize,
    last: Option<usize>,
    observer: &'a mut dyn FnMut(usize),
}

impl<'a> Percent<'a> {
    fn new(total: usize, observer: &'a mut dyn FnMut(usize)) -> Self {
        Self {
            total,
            last: None,
            observer,
        }
    }

    fn update(&mut self, done: usize) {
        let percent = if self.total == 0 {
            100
        } else {
            done * 100 / self.total
        };
        if self.last != Some(percent) {
            self.last = Some(percent);
            (self.observer)(percent);
        }
    }
}

/// Collect the rest of a two-space failure line. `head` holds bytes
/// already consumed where binary data was expected.
fn remote_message(link: &mut dyn ByteLink, head: &[u8]) -> Error {
    let mut buf = [0u8; MESSAGE_MAX];
    let len = link.receive(&mut buf, MESSAGE_IDLE_MS);
    let mut raw = head.to_vec();
    raw.extend_from_slice(&buf[..len]);
    let text = String::from_utf8_lossy(&raw);
    let message = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string();
    debug!("failure line from programmer: {:?}", text);
    Error::RemoteMessage { message }
}

fn send_timeout(what: &'static str, offset: usize) -> impl FnOnce(Stalled) -> Error {
    move |_| Error::Timeout { what, offset }
}

/// Receive `buf.len()` bytes streamed by `prom read`.
///
/// On failure, the bytes before [`Incomplete::received`] passed their
/// CRC check and are valid.
pub fn receive_crc(
    link: &mut dyn ByteLink,
    buf: &mut [u8],
    on_percent: &mut dyn FnMut(usize),
) -> std::result::Result<TransferStats, Incomplete> {
    let mut stats = TransferStats::default();
    let mut percent = Percent::new(buf.len(), on_percent);
    let mut crc = 0u32;

    percent.update(0);
    while stats.bytes < buf.len() {
        let start = stats.bytes;
        let end = (start + DATA_CRC_INTERVAL).min(buf.len());
        if let Err(error) = receive_chunk(link, &mut buf[start..end], start, &mut crc) {
            return Err(Incomplete {
                received: stats.bytes,
                error,
            });
        }
        stats.bytes = end;
        stats.chunks += 1;
        percent.update(end);
    }
    Ok(stats)
}

fn receive_chunk(
    link: &mut dyn ByteLink,
    chunk: &mut [u8],
    start: usize,
    crc: &mut u32,
) -> Result<()> {
    let end = start + chunk.len();

    match link.receive_byte(STATUS_TIMEOUT_MS) {
        None => return Err(Error::Timeout { what: "status", offset: start }),
        Some(STATUS_OK) => {}
        Some(b' ') => return Err(remote_message(link, b" ")),
        Some(code) => return Err(Error::RemoteError { code, offset: start }),
    }

    let got = link.receive(chunk, DATA_TIMEOUT_MS);
    if got < chunk.len() {
        return Err(Error::Timeout {
            what: "data",
            offset: start + got,
        });
    }
    let expected = crc32(*crc, chunk);
    *crc = expected;

    let mut raw = [0u8; CRC_SIZE];
    if link.receive(&mut raw, CRC_TIMEOUT_MS) < CRC_SIZE {
        return Err(Error::Timeout { what: "CRC", offset: end });
    }
    let received = u32::from_le_bytes(raw);
    if received == FAILURE_CRC {
        return Err(remote_message(link, &raw));
    }
    if received != expected {
        let _ = link.send(&[ACK_CRC_ERROR]);
        return Err(Error::CrcMismatch {
            start,
            end,
            expected,
            received,
        });
    }
    trace!("chunk 0x{:x}-0x{:x} ok", start, end);
    link.send(&[STATUS_OK]).map_err(send_timeout("ack send", end))
}

/// Stream `data` to the programmer after a `prom write` command.
///
/// At most [`WRITE_PIPELINE_DEPTH`] chunks are sent ahead of their ack.
pub fn send_crc(
    link: &mut dyn ByteLink,
    data: &[u8],
    on_percent: &mut dyn FnMut(usize),
) -> Result<TransferStats> {
    let mut stats = TransferStats::default();
    let mut percent = Percent::new(data.len(), on_percent);
    let mut acks = AckPipeline::<WRITE_PIPELINE_DEPTH>::new();
    let mut crc = 0u32;

    link.discard_input(PRE_SEND_DISCARD_MS);
    percent.update(0);

    for (index, chunk) in data.chunks(DATA_CRC_INTERVAL).enumerate() {
        let start = index * DATA_CRC_INTERVAL;
        let end = start + chunk.len();

        if acks.is_full() {
            if let Some(pos) = acks.pop() {
                wait_ack(link, pos as usize)?;
                stats.bytes = pos as usize;
                percent.update(stats.bytes);
            }
        }

        link.send(chunk).map_err(send_timeout("data send", start))?;
        crc = crc32(crc, chunk);
        link.send(&crc.to_le_bytes())
            .map_err(send_timeout("CRC send", end))?;
        // Positions stay below EEPROM_SIZE, well inside u32.
        let _ = acks.push(end as u32);
        stats.chunks += 1;
    }

    while let Some(pos) = acks.pop() {
        wait_ack(link, pos as usize)?;
        stats.bytes = pos as usize;
        percent.update(stats.bytes);
    }
    stats.max_in_flight = acks.high_water();
    Ok(stats)
}

fn wait_ack(link: &mut dyn ByteLink, offset: usize) -> Result<()> {
    match link.receive_byte(ACK_TIMEOUT_MS) {
        None => Err(Error::Timeout { what: "ack", offset }),
        Some(STATUS_OK) => Ok(()),
        Some(b' ') => Err(remote_message(link, b" ")),
        Some(code) => Err(Error::RemoteError { code, offset }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Link replaying canned input. An empty queue reads as a timeout.
    #[derive(Default)]
    struct ScriptedLink {
        input: VecDeque<u8>,
        output: Vec<u8>,
        /// Input stays invisible until something has been sent.
        replies: bool,
    }

    impl ScriptedLink {
        fn with_input(input: &[u8]) -> Self {
            Self {
                input: input.iter().copied().collect(),
                ..Self::default()
            }
        }

        fn replying(input: &[u8]) -> Self {
            Self {
                replies: true,
                ..Self::with_input(input)
            }
        }
    }

    impl ByteLink for ScriptedLink {
        fn send_within(&mut self, data: &[u8], _stall_ms: u64) -> std::result::Result<(), Stalled> {
            self.output.extend_from_slice(data);
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8], _idle_ms: u64) -> usize {
            if self.replies && self.output.is_empty() {
                return 0;
            }
            let mut count = 0;
            while count < buf.len() {
                match self.input.pop_front() {
                    Some(byte) => buf[count] = byte,
                    None => break,
                }
                count += 1;
            }
            count
        }

        fn wait_flushed(&mut self, _timeout_ms: u64) -> bool {
            true
        }
    }

    /// What the programmer sends for `prom read` of `data`.
    fn device_stream(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut crc = 0;
        for chunk in data.chunks(DATA_CRC_INTERVAL) {
            out.push(STATUS_OK);
            out.extend_from_slice(chunk);
            crc = crc32(crc, chunk);
            out.extend_from_slice(&crc.to_le_bytes());
        }
        out
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 256) as u8).collect()
    }

    // --- receive_crc ---

    #[test]
    fn test_receive_acks_every_chunk() {
        let data = sample(600);
        let mut link = ScriptedLink::with_input(&device_stream(&data));
        let mut buf = vec![0u8; data.len()];
        let stats = receive_crc(&mut link, &mut buf, &mut |_| {}).unwrap();

        assert_eq!(buf, data);
        assert_eq!(stats.bytes, 600);
        assert_eq!(stats.chunks, 3);
        assert_eq!(link.output, vec![0, 0, 0]);
    }

    #[test]
    fn test_receive_reports_each_percent_once() {
        let data = sample(1024);
        let mut link = ScriptedLink::with_input(&device_stream(&data));
        let mut buf = vec![0u8; data.len()];
        let mut seen = Vec::new();
        receive_crc(&mut link, &mut buf, &mut |p| seen.push(p)).unwrap();
        assert_eq!(seen, vec![0, 25, 50, 75, 100]);
    }

    #[test]
    fn test_receive_crc_mismatch_nacks() {
        let data = sample(512);
        let mut stream = device_stream(&data);
        // Second chunk's payload starts after 1 + 256 + 4 + 1 bytes
        stream[262 + 10] ^= 0x04;
        let mut link = ScriptedLink::with_input(&stream);
        let mut buf = vec![0u8; data.len()];
        let err = receive_crc(&mut link, &mut buf, &mut |_| {}).unwrap_err();

        assert_eq!(err.received, 256);
        assert!(matches!(
            err.error,
            Error::CrcMismatch { start: 256, end: 512, .. }
        ));
        assert_eq!(link.output, vec![0, ACK_CRC_ERROR]);
    }

    #[test]
    fn test_receive_crc_timeout_reports_chunk_end() {
        let data = sample(300);
        let mut stream = device_stream(&data);
        stream.truncate(stream.len() - 2);
        let mut link = ScriptedLink::with_input(&stream);
        let mut buf = vec![0u8; data.len()];
        let err = receive_crc(&mut link, &mut buf, &mut |_| {}).unwrap_err();

        assert_eq!(err.received, 256);
        assert!(matches!(err.error, Error::Timeout { what: "CRC", offset: 300 }));
    }

    #[test]
    fn test_receive_short_chunk_is_timeout() {
        let data = sample(256);
        let mut stream = device_stream(&data);
        stream.truncate(100);
        let mut link = ScriptedLink::with_input(&stream);
        let mut buf = vec![0u8; data.len()];
        let err = receive_crc(&mut link, &mut buf, &mut |_| {}).unwrap_err();

        assert_eq!(err.received, 0);
        assert!(matches!(err.error, Error::Timeout { what: "data", offset: 99 }));
    }

    #[test]
    fn test_receive_remote_status_code() {
        let mut link = ScriptedLink::with_input(&[2]);
        let mut buf = vec![0u8; 16];
        let err = receive_crc(&mut link, &mut buf, &mut |_| {}).unwrap_err();
        assert!(matches!(err.error, Error::RemoteError { code: 2, offset: 0 }));
    }

    #[test]
    fn test_receive_failure_line_instead_of_status() {
        let mut link = ScriptedLink::with_input(b"  Timeout at 400\r\n\x01");
        let mut buf = vec![0u8; 16];
        let err = receive_crc(&mut link, &mut buf, &mut |_| {}).unwrap_err();
        match err.error {
            Error::RemoteMessage { message } => assert_eq!(message, "Timeout at 400"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_receive_failure_line_instead_of_crc() {
        let data = sample(16);
        let mut stream = vec![STATUS_OK];
        stream.extend_from_slice(&data);
        stream.extend_from_slice(b"    Aborted at 0x10\r\n");
        let mut link = ScriptedLink::with_input(&stream);
        let mut buf = vec![0u8; data.len()];
        let err = receive_crc(&mut link, &mut buf, &mut |_| {}).unwrap_err();
        match err.error {
            Error::RemoteMessage { message } => assert_eq!(message, "Aborted at 0x10"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_receive_empty_buffer() {
        let mut link = ScriptedLink::default();
        let stats = receive_crc(&mut link, &mut [], &mut |_| {}).unwrap();
        assert_eq!(stats, TransferStats::default());
    }

    // --- send_crc ---

    #[test]
    fn test_send_frames_data_and_rolling_crc() {
        let data = sample(300);
        let mut link = ScriptedLink::replying(&[0, 0]);
        let stats = send_crc(&mut link, &data, &mut |_| {}).unwrap();

        let mut expected = data[..256].to_vec();
        let crc = crc32(0, &data[..256]);
        expected.extend_from_slice(&crc.to_le_bytes());
        expected.extend_from_slice(&data[256..]);
        expected.extend_from_slice(&crc32(crc, &data[256..]).to_le_bytes());

        assert_eq!(link.output, expected);
        assert_eq!(stats.bytes, 300);
        assert_eq!(stats.chunks, 2);
    }

    #[test]
    fn test_send_pipeline_never_exceeds_depth() {
        let data = sample(10 * DATA_CRC_INTERVAL);
        let mut link = ScriptedLink::replying(&[0; 10]);
        let stats = send_crc(&mut link, &data, &mut |_| {}).unwrap();
        assert_eq!(stats.max_in_flight, WRITE_PIPELINE_DEPTH);
    }

    #[test]
    fn test_send_ack_timeout_reports_chunk_end() {
        let data = sample(1024);
        let mut link = ScriptedLink::replying(&[0]);
        let err = send_crc(&mut link, &data, &mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::Timeout { what: "ack", offset: 512 }));
    }

    #[test]
    fn test_send_remote_failure() {
        let data = sample(512);
        let mut link = ScriptedLink::replying(b"\x00  Program failed at 80 (status 90)\r\n\x02");
        let err = send_crc(&mut link, &data, &mut |_| {}).unwrap_err();
        match err {
            Error::RemoteMessage { message } => {
                assert_eq!(message, "Program failed at 80 (status 90)")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_send_remote_code() {
        let data = sample(256);
        let mut link = ScriptedLink::replying(&[7]);
        let err = send_crc(&mut link, &data, &mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::RemoteError { code: 7, offset: 256 }));
    }

    // --- chunk boundaries ---

    const BOUNDARY_LENGTHS: [usize; 5] = [1, 255, 256, 257, 512];

    #[test]
    fn test_receive_chunk_boundary_lengths() {
        for len in BOUNDARY_LENGTHS {
            let data = sample(len);
            let chunks = len.div_ceil(DATA_CRC_INTERVAL);
            let mut link = ScriptedLink::with_input(&device_stream(&data));
            let mut buf = vec![0u8; len];
            let stats = receive_crc(&mut link, &mut buf, &mut |_| {}).unwrap();

            assert_eq!(buf, data, "len {len}");
            assert_eq!(stats.chunks, chunks, "len {len}");
            assert_eq!(link.output, vec![STATUS_OK; chunks], "len {len}");
            assert!(link.input.is_empty(), "len {len}");
        }
    }

    #[test]
    fn test_send_chunk_boundary_lengths() {
        for len in BOUNDARY_LENGTHS {
            let data = sample(len);
            let chunks = len.div_ceil(DATA_CRC_INTERVAL);
            let mut link = ScriptedLink::replying(&vec![STATUS_OK; chunks]);
            let stats = send_crc(&mut link, &data, &mut |_| {}).unwrap();

            assert_eq!(stats.chunks, chunks, "len {len}");
            assert_eq!(link.output.len(), len + chunks * CRC_SIZE, "len {len}");

            let last = (len - 1) % DATA_CRC_INTERVAL + 1;
            let tail = &link.output[link.output.len() - CRC_SIZE - last..];
            assert_eq!(&tail[..last], &data[len - last..], "len {len}");
            let crc = u32::from_le_bytes(tail[last..].try_into().unwrap());
            assert_eq!(crc, crc32(0, &data), "len {len}");
            assert!(link.input.is_empty(), "len {len}");
        }
    }
}
