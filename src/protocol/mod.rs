//! WebSocket protocol driver
//!
//! This module handles:
//! * The HTTP Upgrade handshake over a validated transport
//! * Frame encoding (client frames masked) and incremental decoding
//! * Protocol constants and close codes

pub mod constants;
mod decode;
mod encode;
mod frame;
pub mod handshake;

pub use decode::decode_frame;
pub use encode::{client_mask, encode_frame};
pub use frame::{Frame, OpCode};
pub use handshake::UpgradeResponse;
