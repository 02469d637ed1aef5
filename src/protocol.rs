//! eISCP packet framing and ISCP message parsing
//!
//! Wire format:
//! ```text
//! ┌────────────┬──────────────┬────────────┬─────────┬──────────┬───────────────┐
//! │ "ISCP" (4) │ header size  │ data size  │ version │ reserved │ payload       │
//! │            │ (4B BE = 16) │ (4B BE)    │ (1B =1) │ (3B = 0) │ "!1PWR01\r"   │
//! └────────────┴──────────────┴────────────┴─────────┴──────────┴───────────────┘
//! ```

use crate::error::{IscpError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Packet magic
pub const MAGIC: [u8; 4] = *b"ISCP";

/// Size of the fixed packet header
pub const HEADER_SIZE: usize = 16;

/// Protocol version carried in every header
pub const VERSION: u8 = 0x01;

/// End-of-file marker receivers append to their messages
pub const EOF: u8 = 0x1A;

/// Start character plus destination unit type (1 = receiver)
pub const MESSAGE_PREAMBLE: &str = "!1";

/// Largest payload accepted from a stream
///
/// ISCP messages are a few dozen bytes; the longest status replies (NET/USB
/// metadata) stay well below this.
pub const MAX_PAYLOAD: usize = 4096;

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Number of payload bytes following the header
    pub data_size: u32,
    /// Protocol version
    pub version: u8,
}

/// Wrap a raw payload into an eISCP packet.
pub fn encode_packet(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > u32::MAX as usize {
        return Err(IscpError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    let mut dst = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32(HEADER_SIZE as u32);
    dst.put_u32(payload.len() as u32);
    dst.put_u8(VERSION);
    dst.put_slice(&[0x00, 0x00, 0x00]);
    dst.put_slice(payload);
    Ok(dst.freeze())
}

/// Turn a wire command like `PWR01` into the ISCP message `!1PWR01\r`.
pub fn command_to_message(command: &str) -> String {
    if command.starts_with(MESSAGE_PREAMBLE) {
        format!("{}\r", command)
    } else {
        format!("{}{}\r", MESSAGE_PREAMBLE, command)
    }
}

/// Build the complete packet for a wire command.
pub fn command_to_packet(command: &str) -> Result<Bytes> {
    encode_packet(command_to_message(command).as_bytes())
}

/// Validate and decode the 16-byte packet header.
pub fn decode_header(header: &[u8]) -> Result<PacketHeader> {
    if header.len() < HEADER_SIZE {
        return Err(IscpError::MalformedHeader(format!(
            "expected {} header bytes, got {}",
            HEADER_SIZE,
            header.len()
        )));
    }

    let mut buf = &header[..HEADER_SIZE];
    if buf[..4] != MAGIC {
        return Err(IscpError::MalformedHeader(format!(
            "bad magic {:?}",
            &buf[..4]
        )));
    }
    buf.advance(4);

    let header_size = buf.get_u32();
    if header_size as usize != HEADER_SIZE {
        return Err(IscpError::MalformedHeader(format!(
            "header size {} != {}",
            header_size, HEADER_SIZE
        )));
    }

    let data_size = buf.get_u32();
    let version = buf.get_u8();

    Ok(PacketHeader { data_size, version })
}

/// Take exactly `header.data_size` payload bytes from the bytes following the header.
pub fn decode_payload<'a>(header: &PacketHeader, data: &'a [u8]) -> Result<&'a [u8]> {
    let size = header.data_size as usize;
    data.get(..size).ok_or_else(|| {
        IscpError::MalformedHeader(format!(
            "declared payload of {} bytes, only {} available",
            size,
            data.len()
        ))
    })
}

/// Decode a complete packet held in one buffer, e.g. a UDP datagram.
pub fn decode_packet(packet: &[u8]) -> Result<&[u8]> {
    let header = decode_header(packet)?;
    decode_payload(&header, &packet[HEADER_SIZE..])
}

/// Decode one packet from a stream buffer.
///
/// Returns `Ok(None)` if the buffer doesn't hold a complete packet yet.
/// On success, consumes the packet bytes from the buffer. A header declaring
/// more than `max_payload` bytes is rejected before anything is reserved.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let header = decode_header(&src[..HEADER_SIZE])?;
    let payload_len = header.data_size as usize;
    if payload_len > max_payload {
        return Err(IscpError::MalformedHeader(format!(
            "declared payload of {} bytes exceeds limit of {}",
            payload_len, max_payload
        )));
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Extract the wire command from an ISCP message payload.
///
/// Strips the `!<unit>` preamble and up to three trailing terminator bytes
/// (CR and/or LF, preceded by an optional EOF marker).
pub fn parse_message(payload: &[u8]) -> Result<String> {
    let valid_preamble = payload.len() >= 2 && payload[0] == b'!' && payload[1].is_ascii_digit();
    if !valid_preamble {
        return Err(IscpError::MalformedMessage(format!(
            "missing preamble: {:?}",
            String::from_utf8_lossy(payload)
        )));
    }

    let body = strip_terminators(&payload[2..]);
    Ok(String::from_utf8_lossy(body).into_owned())
}

/// Remove up to two trailing CR/LF bytes and a preceding EOF marker.
pub fn strip_terminators(payload: &[u8]) -> &[u8] {
    let mut end = payload.len();
    for _ in 0..2 {
        if end > 0 && matches!(payload[end - 1], b'\r' | b'\n') {
            end -= 1;
        }
    }
    if end > 0 && payload[end - 1] == EOF {
        end -= 1;
    }
    &payload[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_layout() {
        let packet = command_to_packet("PWR01").unwrap();
        assert_eq!(&packet[..4], b"ISCP");
        assert_eq!(&packet[4..8], &[0, 0, 0, 16]);
        assert_eq!(&packet[8..12], &[0, 0, 0, 8]);
        assert_eq!(packet[12], VERSION);
        assert_eq!(&packet[13..16], &[0, 0, 0]);
        assert_eq!(&packet[16..], b"!1PWR01\r");
    }

    #[test]
    fn test_preamble_not_doubled() {
        assert_eq!(command_to_message("!1MVLQSTN"), "!1MVLQSTN\r");
        assert_eq!(command_to_message("MVLQSTN"), "!1MVLQSTN\r");
    }

    #[test]
    fn test_round_trip() {
        for command in ["PWR01", "MVL32", "SLI2B", "NTCPLAY", "ZMT"] {
            let packet = command_to_packet(command).unwrap();
            let header = decode_header(&packet).unwrap();
            let payload = decode_payload(&header, &packet[HEADER_SIZE..]).unwrap();
            assert_eq!(parse_message(payload).unwrap(), command);
        }
    }

    #[test]
    fn test_bad_magic() {
        let mut packet = command_to_packet("PWR01").unwrap().to_vec();
        packet[0] = b'X';
        assert!(matches!(
            decode_header(&packet),
            Err(IscpError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_bad_header_size() {
        let mut packet = command_to_packet("PWR01").unwrap().to_vec();
        packet[7] = 20;
        assert!(matches!(
            decode_header(&packet),
            Err(IscpError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_short_payload() {
        let packet = command_to_packet("PWR01").unwrap();
        let header = decode_header(&packet).unwrap();
        assert!(decode_payload(&header, &packet[HEADER_SIZE..HEADER_SIZE + 3]).is_err());
    }

    #[test]
    fn test_decode_frame_partial() {
        let packet = command_to_packet("AMT01").unwrap();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&packet[..10]);
        assert!(decode_frame(&mut buf, MAX_PAYLOAD).unwrap().is_none());

        buf.extend_from_slice(&packet[10..20]);
        assert!(decode_frame(&mut buf, MAX_PAYLOAD).unwrap().is_none());

        buf.extend_from_slice(&packet[20..]);
        buf.extend_from_slice(&packet[..5]);
        let payload = decode_frame(&mut buf, MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(&payload[..], b"!1AMT01\r");
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_decode_frame_oversize_header() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32(HEADER_SIZE as u32);
        buf.put_u32(0xF000_0000);
        buf.put_u8(VERSION);
        buf.put_slice(&[0x00, 0x00, 0x00]);

        assert!(matches!(
            decode_frame(&mut buf, MAX_PAYLOAD),
            Err(IscpError::MalformedHeader(_))
        ));
        assert!(buf.capacity() < 1024);
    }

    #[test]
    fn test_decode_frame_at_limit() {
        let payload = vec![b'!'; 64];
        let mut buf = BytesMut::from(&encode_packet(&payload).unwrap()[..]);
        assert!(decode_frame(&mut buf, 63).is_err());

        let mut buf = BytesMut::from(&encode_packet(&payload).unwrap()[..]);
        assert_eq!(decode_frame(&mut buf, 64).unwrap().unwrap().len(), 64);
    }

    #[test]
    fn test_parse_message_terminators() {
        assert_eq!(parse_message(b"!1PWR01\x1a\r\n").unwrap(), "PWR01");
        assert_eq!(parse_message(b"!1PWR01\x1a").unwrap(), "PWR01");
        assert_eq!(parse_message(b"!1PWR01\r\n").unwrap(), "PWR01");
        assert_eq!(parse_message(b"!1PWR01\n").unwrap(), "PWR01");
    }

    #[test]
    fn test_parse_message_bad_preamble() {
        assert!(matches!(
            parse_message(b"?1PWR01\r"),
            Err(IscpError::MalformedMessage(_))
        ));
        assert!(matches!(
            parse_message(b"!"),
            Err(IscpError::MalformedMessage(_))
        ));
    }
}
