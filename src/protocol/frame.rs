//! WebSocket frame types

use super::constants::{close_codes, opcodes, MAX_CONTROL_PAYLOAD};
use bytes::Bytes;
use std::io;

/// Frame opcode (RFC 6455 §5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message
    Continuation,
    /// UTF-8 text data
    Text,
    /// Binary data
    Binary,
    /// Close handshake
    Close,
    /// Liveness probe; must be answered with a pong
    Ping,
    /// Probe response
    Pong,
}

impl OpCode {
    /// Whether this opcode is a control frame (close, ping, pong).
    ///
    /// Control frames may not be fragmented and carry at most 125 bytes.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Whether this opcode carries application data.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Text | Self::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = io::Error;

    fn try_from(value: u8) -> io::Result<Self> {
        match value {
            opcodes::CONTINUATION => Ok(Self::Continuation),
            opcodes::TEXT => Ok(Self::Text),
            opcodes::BINARY => Ok(Self::Binary),
            opcodes::CLOSE => Ok(Self::Close),
            opcodes::PING => Ok(Self::Ping),
            opcodes::PONG => Ok(Self::Pong),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid opcode: 0x{:X}", other),
            )),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> u8 {
        match value {
            OpCode::Continuation => opcodes::CONTINUATION,
            OpCode::Text => opcodes::TEXT,
            OpCode::Binary => opcodes::BINARY,
            OpCode::Close => opcodes::CLOSE,
            OpCode::Ping => opcodes::PING,
            OpCode::Pong => opcodes::PONG,
        }
    }
}

/// A single WebSocket frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    /// Frame type
    pub opcode: OpCode,
    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Text frame with the given payload.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Text,
            payload: payload.into(),
        }
    }

    /// Binary frame with the given payload.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }

    /// Ping frame.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Ping,
            payload: payload.into(),
        }
    }

    /// Pong frame, normally echoing a ping payload.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Pong,
            payload: payload.into(),
        }
    }

    /// Close frame carrying a code and reason. The reason is truncated so
    /// the control payload stays within the 125-byte bound.
    pub fn close(code: u16, reason: &str) -> Self {
        let reason = truncate_utf8(reason, MAX_CONTROL_PAYLOAD - 2);
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self {
            fin: true,
            opcode: OpCode::Close,
            payload: payload.into(),
        }
    }

    /// Parse the code and reason out of a close-frame payload.
    ///
    /// An empty payload means the peer sent no status (reported as 1005).
    pub fn close_code_reason(&self) -> (u16, String) {
        if self.payload.len() < 2 {
            return (close_codes::NO_STATUS, String::new());
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = String::from_utf8_lossy(&self.payload[2..]).into_owned();
        (code, reason)
    }
}

/// XOR the payload with the 4-byte mask key (involution: applying twice
/// restores the original).
pub(crate) fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
