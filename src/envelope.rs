// envelope.rs
//
// The framed JSON wire protocol shared by both sides: one JSON object per
// line, newline-terminated. `LineReader` absorbs the buffer-merge hazard
// (multiple frames in one read, or one frame split across reads) by keeping
// a residual byte buffer per connection and only ever handing back complete
// lines.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::errors::ChatResult;

/// Exhaustive flag vocabulary (spec.md §6). The empty-string variant is
/// plain chat; everything else is a system/admin notice or a client-issued
/// control frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flag {
    #[default]
    #[serde(rename = "")]
    Chat,
    #[serde(rename = "AUTH_OK")]
    AuthOk,
    #[serde(rename = "AUTH_INVALID")]
    AuthInvalid,
    #[serde(rename = "AUTH_DENIED")]
    AuthDenied,
    #[serde(rename = "AUTH_BAN")]
    AuthBan,
    #[serde(rename = "USER_LIST_UPDATE")]
    UserListUpdate,
    #[serde(rename = "SYS_SERVER_CLOSED")]
    SysServerClosed,
    #[serde(rename = "ADMIN_MSG")]
    AdminMsg,
    #[serde(rename = "ADMIN_KICK")]
    AdminKick,
    #[serde(rename = "ADMIN_BAN")]
    AdminBan,
    #[serde(rename = "ADMIN_MUTE")]
    AdminMute,
    #[serde(rename = "CLIENT_QUIT")]
    ClientQuit,
}

/// The one wire unit. `timestamp` is ignored on incoming frames and
/// stamped fresh by `encode` on outgoing ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub flag: Flag,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
}

impl Envelope {
    pub fn chat(sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            flag: Flag::Chat,
            sender: sender.into(),
            message: message.into(),
            timestamp: String::new(),
        }
    }

    /// A system/admin envelope with no sender (server-originated).
    pub fn system(flag: Flag, message: impl Into<String>) -> Self {
        Self {
            flag,
            sender: String::new(),
            message: message.into(),
            timestamp: String::new(),
        }
    }
}

/// `"DD Mon YYYY, HH:MM"`, matching the original server's stamp format.
pub fn now_stamp() -> String {
    Local::now().format("%d %b %Y, %H:%M").to_string()
}

/// Serialize as one JSON object followed by `\n`. Always re-stamps
/// `timestamp` at encode time, regardless of what the caller set.
pub fn encode(envelope: &Envelope) -> ChatResult<Vec<u8>> {
    let mut stamped = envelope.clone();
    stamped.timestamp = now_stamp();
    let mut bytes = serde_json::to_vec(&stamped)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse one already-delimited line as an envelope. Malformed JSON is the
/// caller's problem to log and drop - decoding a single bad line must never
/// close the connection (spec.md §4.1).
pub fn decode(line: &[u8]) -> serde_json::Result<Envelope> {
    serde_json::from_slice(line)
}

/// Accumulates raw bytes across reads and yields complete, newline-stripped
/// lines. Empty lines are discarded.
#[derive(Default)]
pub struct LineReader {
    residual: Vec<u8>,
    queue: VecDeque<Vec<u8>>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.residual.extend_from_slice(bytes);
        while let Some(pos) = self.residual.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.residual.drain(..=pos).collect();
            line.pop(); // drop the '\n'
            if !line.iter().all(u8::is_ascii_whitespace) {
                self.queue.push_back(line);
            }
        }
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.queue.pop_front()
    }
}

/// Outcome of blocking-with-timeout reads against a session's socket.
pub enum LineOutcome {
    Line(Vec<u8>),
    /// Peer closed the connection (zero-length read) or a transport error
    /// (`ConnectionReset`/`BrokenPipe`) was observed.
    Closed,
    /// The read timed out and the session's exit signal is set.
    ExitRequested,
}

/// Reads one complete line from `stream`, using `reader` to absorb partial
/// and merged frames, and polling `exit` between 1-second read timeouts so
/// shutdown is observed promptly (spec.md §4.8, §5).
pub fn read_line(
    stream: &mut TcpStream,
    reader: &mut LineReader,
    exit: &AtomicBool,
) -> ChatResult<LineOutcome> {
    let mut buf = [0u8; 1024];
    loop {
        if let Some(line) = reader.pop() {
            return Ok(LineOutcome::Line(line));
        }

        match stream.read(&mut buf) {
            Ok(0) => return Ok(LineOutcome::Closed),
            Ok(n) => reader.feed(&buf[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if exit.load(Ordering::SeqCst) {
                    return Ok(LineOutcome::ExitRequested);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
                ) =>
            {
                return Ok(LineOutcome::Closed)
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_on_well_formed_envelope() {
        let original = Envelope::chat("admin", "hi");
        let bytes = encode(&original).unwrap();
        let line = &bytes[..bytes.len() - 1]; // strip trailing '\n'
        let decoded = decode(line).unwrap();
        assert_eq!(decoded.flag, Flag::Chat);
        assert_eq!(decoded.sender, "admin");
        assert_eq!(decoded.message, "hi");
        assert!(!decoded.timestamp.is_empty());
    }

    #[test]
    fn line_reader_splits_merged_frames_in_one_read() {
        let mut reader = LineReader::new();
        reader.feed(b"{\"flag\":\"\",\"sender\":\"a\",\"message\":\"one\"}\n{\"flag\":\"\",\"sender\":\"a\",\"message\":\"two\"}\n");
        let first = reader.pop().unwrap();
        let second = reader.pop().unwrap();
        assert!(decode(&first).unwrap().message == "one");
        assert!(decode(&second).unwrap().message == "two");
        assert!(reader.pop().is_none());
    }

    #[test]
    fn line_reader_reassembles_a_frame_split_across_reads() {
        let mut reader = LineReader::new();
        reader.feed(b"{\"flag\":\"\",\"sender\":\"a\",\"mess");
        assert!(reader.pop().is_none());
        reader.feed(b"age\":\"hi\"}\n");
        let line = reader.pop().unwrap();
        assert_eq!(decode(&line).unwrap().message, "hi");
    }

    #[test]
    fn line_reader_discards_blank_lines() {
        let mut reader = LineReader::new();
        reader.feed(b"\n\n");
        assert!(reader.pop().is_none());
    }

    #[test]
    fn malformed_json_is_reported_not_panicked() {
        let mut reader = LineReader::new();
        reader.feed(b"not json\n");
        let line = reader.pop().unwrap();
        assert!(decode(&line).is_err());
    }
}
