//! Incremental frame decoding
//!
//! Decodes from an accumulation buffer the way the transport fills it:
//! `Ok(None)` means the buffer does not yet hold a complete frame, an
//! error means the peer violated the protocol and the connection must be
//! torn down. The caller advances the buffer by the returned byte count.

use super::constants::MAX_CONTROL_PAYLOAD;
use super::frame::{apply_mask, Frame, OpCode};
use bytes::{Bytes, BytesMut};
use std::io;

/// Try to decode one frame from the front of `data`.
///
/// # Returns
/// * `Ok(Some((frame, consumed)))`: a complete frame; advance by `consumed`
/// * `Ok(None)`: more bytes needed
/// * `Err(_)`: protocol violation (invalid opcode, reserved bits, control
///   framing rules, or a payload beyond `max_payload`)
pub fn decode_frame(
    data: &mut BytesMut,
    max_payload: usize,
) -> io::Result<Option<(Frame, usize)>> {
    if data.len() < 2 {
        return Ok(None);
    }

    let first = data[0];
    let second = data[1];

    if first & 0x70 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "reserved bits set without a negotiated extension",
        ));
    }

    let fin = first & 0x80 != 0;
    let opcode = OpCode::try_from(first & 0x0F)?;
    let masked = second & 0x80 != 0;
    let len7 = (second & 0x7F) as usize;

    let mut offset = 2;
    let payload_len = match len7 {
        126 => {
            if data.len() < offset + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
            offset += 2;
            len
        }
        127 => {
            if data.len() < offset + 8 {
                return Ok(None);
            }
            let len = u64::from_be_bytes(data[offset..offset + 8].try_into().unwrap());
            offset += 8;
            usize::try_from(len).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "payload length overflows usize")
            })?
        }
        len => len,
    };

    if opcode.is_control() {
        if !fin {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "fragmented control frame",
            ));
        }
        if payload_len > MAX_CONTROL_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("control frame payload of {} bytes", payload_len),
            ));
        }
    }

    if payload_len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "payload length {} exceeds configured limit {}",
                payload_len, max_payload
            ),
        ));
    }

    let mask = if masked {
        if data.len() < offset + 4 {
            return Ok(None);
        }
        let key = [
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ];
        offset += 4;
        Some(key)
    } else {
        None
    };

    if data.len() < offset + payload_len {
        return Ok(None);
    }

    let mut payload = data[offset..offset + payload_len].to_vec();
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    let frame = Frame {
        fin,
        opcode,
        payload: Bytes::from(payload),
    };
    Ok(Some((frame, offset + payload_len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode::encode_frame;
    use bytes::Buf;

    fn decode_all(mut wire: BytesMut, max_payload: usize) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some((frame, consumed)) = decode_frame(&mut wire, max_payload).unwrap() {
            wire.advance(consumed);
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_decode_unmasked_text() {
        let wire = BytesMut::from(&[0x81u8, 0x02, b'h', b'i'][..]);
        let frames = decode_all(wire, 1024);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert_eq!(&frames[0].payload[..], b"hi");
        assert!(frames[0].fin);
    }

    #[test]
    fn test_decode_unmasks_masked_frame() {
        let encoded = encode_frame(&Frame::text("masked payload"), Some([9, 8, 7, 6]));
        let frames = decode_all(encoded, 1024);
        assert_eq!(&frames[0].payload[..], b"masked payload");
    }

    #[test]
    fn test_decode_incomplete_returns_none() {
        // Header promises 2 bytes of payload, only 1 present
        let mut wire = BytesMut::from(&[0x81u8, 0x02, b'h'][..]);
        assert!(decode_frame(&mut wire, 1024).unwrap().is_none());
        assert_eq!(wire.len(), 3); // untouched
    }

    #[test]
    fn test_decode_two_frames_back_to_back() {
        let mut wire = encode_frame(&Frame::text("one"), None);
        wire.extend_from_slice(&encode_frame(&Frame::ping("p"), None));
        let frames = decode_all(wire, 1024);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].opcode, OpCode::Ping);
    }

    #[test]
    fn test_decode_extended_lengths() {
        let frames = decode_all(encode_frame(&Frame::binary(vec![7u8; 300]), None), 1024);
        assert_eq!(frames[0].payload.len(), 300);

        let frames = decode_all(
            encode_frame(&Frame::binary(vec![7u8; 70_000]), None),
            1 << 20,
        );
        assert_eq!(frames[0].payload.len(), 70_000);
    }

    #[test]
    fn test_invalid_opcode_is_protocol_error() {
        let mut wire = BytesMut::from(&[0x83u8, 0x00][..]);
        assert!(decode_frame(&mut wire, 1024).is_err());
    }

    #[test]
    fn test_reserved_bits_are_protocol_error() {
        let mut wire = BytesMut::from(&[0xC1u8, 0x00][..]);
        assert!(decode_frame(&mut wire, 1024).is_err());
    }

    #[test]
    fn test_oversized_payload_is_protocol_error() {
        let mut wire = BytesMut::from(&encode_frame(&Frame::binary(vec![0u8; 2048]), None)[..]);
        assert!(decode_frame(&mut wire, 1024).is_err());
    }

    #[test]
    fn test_oversized_length_rejected_before_buffering() {
        // 64-bit length header claiming 1 TiB; only the header is present
        let mut wire = BytesMut::from(&[0x82u8, 127][..]);
        wire.extend_from_slice(&(1u64 << 40).to_be_bytes());
        assert!(decode_frame(&mut wire, 16 * 1024 * 1024).is_err());
    }

    #[test]
    fn test_fragmented_control_frame_rejected() {
        // Ping with fin clear
        let mut wire = BytesMut::from(&[0x09u8, 0x00][..]);
        assert!(decode_frame(&mut wire, 1024).is_err());
    }

    #[test]
    fn test_oversized_control_payload_rejected() {
        let mut wire = BytesMut::from(&[0x89u8, 126, 0x00, 0x80][..]);
        assert!(decode_frame(&mut wire, 1024).is_err());
    }
}
