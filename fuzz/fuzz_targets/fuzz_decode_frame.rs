//! Fuzz the incremental frame decoder with arbitrary wire bytes.
//!
//! The decoder must never panic: any input either yields frames, asks for
//! more bytes, or reports a protocol error.

#![no_main]

use bytes::{Buf, BytesMut};
use libfuzzer_sys::fuzz_target;
use pinsock::protocol::decode_frame;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    loop {
        match decode_frame(&mut buf, 1 << 20) {
            Ok(Some((_frame, consumed))) => {
                assert!(consumed > 0);
                assert!(consumed <= data.len());
                buf.advance(consumed);
            }
            Ok(None) | Err(_) => break,
        }
    }
});
