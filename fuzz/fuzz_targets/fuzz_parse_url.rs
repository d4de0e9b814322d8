//! Fuzz the WebSocket URL parser: arbitrary input must produce a parsed
//! URL or an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pinsock::WsUrl;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = WsUrl::parse(s);
    }
});
