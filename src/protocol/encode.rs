//! Frame encoding

use super::frame::{apply_mask, Frame};
use bytes::{BufMut, BytesMut};

/// Random mask key for a client-to-server frame (RFC 6455 §5.3 requires
/// every client frame to be masked).
pub fn client_mask() -> [u8; 4] {
    rand::random()
}

/// Encode a frame into wire bytes. `mask` must be `Some` for frames sent
/// by a client and `None` for frames sent by a server.
pub fn encode_frame(frame: &Frame, mask: Option<[u8; 4]>) -> BytesMut {
    let payload_len = frame.payload.len();
    let mut buf = BytesMut::with_capacity(payload_len + 14);

    let first = (u8::from(frame.fin) << 7) | u8::from(frame.opcode);
    buf.put_u8(first);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if payload_len < 126 {
        buf.put_u8(mask_bit | payload_len as u8);
    } else if payload_len <= u16::MAX as usize {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(payload_len as u64);
    }

    match mask {
        Some(key) => {
            buf.put_slice(&key);
            let start = buf.len();
            buf.put_slice(&frame.payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.put_slice(&frame.payload),
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::OpCode;

    #[test]
    fn test_encode_short_unmasked_text() {
        let buf = encode_frame(&Frame::text("hi"), None);
        assert_eq!(&buf[..], &[0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_encode_masked_sets_mask_bit_and_scrambles() {
        let mask = [1, 2, 3, 4];
        let buf = encode_frame(&Frame::text("hi"), Some(mask));
        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 0x80 | 0x02);
        assert_eq!(&buf[2..6], &mask);
        assert_eq!(buf[6], b'h' ^ 1);
        assert_eq!(buf[7], b'i' ^ 2);
    }

    #[test]
    fn test_encode_extended_16bit_length() {
        let payload = vec![0u8; 300];
        let buf = encode_frame(&Frame::binary(payload), None);
        assert_eq!(buf[0], 0x82);
        assert_eq!(buf[1], 126);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 300);
        assert_eq!(buf.len(), 4 + 300);
    }

    #[test]
    fn test_encode_extended_64bit_length() {
        let payload = vec![0u8; 70_000];
        let buf = encode_frame(&Frame::binary(payload), None);
        assert_eq!(buf[1], 127);
        let len = u64::from_be_bytes(buf[2..10].try_into().unwrap());
        assert_eq!(len, 70_000);
    }

    #[test]
    fn test_encode_non_final_fragment() {
        let frame = Frame {
            fin: false,
            opcode: OpCode::Text,
            payload: "part".into(),
        };
        let buf = encode_frame(&frame, None);
        assert_eq!(buf[0], 0x01); // fin clear
    }

    #[test]
    fn test_client_mask_varies() {
        // Two draws colliding is possible but astronomically unlikely
        assert_ne!(client_mask(), client_mask());
    }
}
