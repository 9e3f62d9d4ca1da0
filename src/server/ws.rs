//! RFC 6455 handshake and frame (de)serialization. Hand-rolled rather than
//! pulled in from a WebSocket crate: the server only ever needs to emit
//! one frame shape (binary, unmasked, server->client) and parse small
//! unmasked-by-client inbound frames, so a full client/extension-aware
//! implementation would be dead weight.

use base64::Engine;
use sha1::{Digest, Sha1};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;

/// Computes `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Extracts `Sec-WebSocket-Key` from a raw HTTP request head, and whether
/// the request carries the WebSocket upgrade token.
pub struct RequestHead {
    pub path: String,
    pub is_upgrade: bool,
    pub ws_key: Option<String>,
}

pub fn parse_request_head(raw: &str) -> Option<RequestHead> {
    let mut lines = raw.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let _method = parts.next()?;
    let path = parts.next()?.to_string();

    let mut is_upgrade = false;
    let mut ws_key = None;
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else { continue };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        match name.as_str() {
            "upgrade" if value.eq_ignore_ascii_case("websocket") => is_upgrade = true,
            "sec-websocket-key" => ws_key = Some(value.to_string()),
            _ => {}
        }
    }

    Some(RequestHead { path, is_upgrade, ws_key })
}

/// Builds the 101 Switching Protocols response for a successful handshake.
pub fn handshake_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
}

/// Encodes one server->client frame: FIN set, given opcode, unmasked,
/// RFC 6455 length encoding (inline / 16-bit extended / 64-bit extended).
pub fn encode_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    out.push(0x80 | (opcode & 0x0F));

    let len = payload.len();
    if len <= 125 {
        out.push(len as u8);
    } else if len <= 0xFFFF {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

#[derive(Debug, PartialEq, Eq)]
pub enum DecodedFrame {
    /// A text/binary frame whose unmasked payload is ready to use.
    Message(Vec<u8>),
    Close,
    /// Frame larger than this server accepts from a client (spec §9 open
    /// question); content is intentionally not decoded or partially used.
    TooLarge,
    /// Not enough bytes buffered yet to decode a full frame.
    Incomplete,
    /// Client frame sent unmasked, violating RFC 6455 §5.1. Consumed so
    /// the stream doesn't desync, but the peer is dropped over it.
    Invalid,
}

/// Decodes one client->server frame from the front of `buf`. Returns the
/// decoded frame and how many bytes of `buf` it consumed (0 if
/// `Incomplete`). Per spec §4.3, only frames with payload length <=125
/// are fully supported; longer frames are reported as `TooLarge` and
/// still consumed so the stream doesn't desync.
pub fn decode_frame(buf: &[u8]) -> (DecodedFrame, usize) {
    if buf.len() < 2 {
        return (DecodedFrame::Incomplete, 0);
    }
    let opcode = buf[0] & 0x0F;
    let masked = buf[1] & 0x80 != 0;
    let len_byte = buf[1] & 0x7F;

    let (payload_len, mut header_len) = match len_byte {
        126 => {
            if buf.len() < 4 {
                return (DecodedFrame::Incomplete, 0);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        }
        127 => {
            if buf.len() < 10 {
                return (DecodedFrame::Incomplete, 0);
            }
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(arr) as usize, 10)
        }
        n => (n as usize, 2),
    };

    let mask_key_len = if masked { 4 } else { 0 };
    let total_len = header_len + mask_key_len + payload_len;
    if buf.len() < total_len {
        return (DecodedFrame::Incomplete, 0);
    }

    if !masked {
        return (DecodedFrame::Invalid, total_len);
    }

    if opcode == OPCODE_CLOSE {
        return (DecodedFrame::Close, total_len);
    }

    if payload_len > 125 {
        return (DecodedFrame::TooLarge, total_len);
    }

    let mut payload = buf[header_len + mask_key_len..total_len].to_vec();
    if masked {
        let mask = [
            buf[header_len],
            buf[header_len + 1],
            buf[header_len + 2],
            buf[header_len + 3],
        ];
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= mask[i % 4];
        }
    }
    header_len = total_len;
    let _ = header_len;

    if opcode == OPCODE_TEXT || opcode == OPCODE_BINARY {
        (DecodedFrame::Message(payload), total_len)
    } else {
        // Ping/pong/continuation frames are consumed and ignored — this
        // server never fragments and never needs a liveness check beyond
        // TCP's own failure signaling.
        (DecodedFrame::Incomplete, total_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_worked_example() {
        // The example from RFC 6455 §1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn parse_head_extracts_upgrade_and_key() {
        let raw = "GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let head = parse_request_head(raw).unwrap();
        assert!(head.is_upgrade);
        assert_eq!(head.ws_key.as_deref(), Some("dGhlIHNhbXBsZSBub25jZQ=="));
        assert_eq!(head.path, "/");
    }

    #[test]
    fn encode_frame_uses_inline_length_under_126() {
        let frame = encode_frame(OPCODE_BINARY, &[1, 2, 3]);
        assert_eq!(frame[0], 0x82);
        assert_eq!(frame[1], 3);
        assert_eq!(&frame[2..], &[1, 2, 3]);
    }

    #[test]
    fn encode_frame_uses_16bit_extended_length() {
        let payload = vec![0u8; 200];
        let frame = encode_frame(OPCODE_BINARY, &payload);
        assert_eq!(frame[1], 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]) as usize, 200);
    }

    #[test]
    fn decode_frame_unmasks_client_payload() {
        let mask = [0x01, 0x02, 0x03, 0x04];
        let payload = [0xAAu8, 0xBB, 0xCC];
        let mut masked = payload;
        for (i, b) in masked.iter_mut().enumerate() {
            *b ^= mask[i % 4];
        }
        let mut frame = vec![0x80 | OPCODE_BINARY, 0x80 | 3];
        frame.extend_from_slice(&mask);
        frame.extend_from_slice(&masked);

        let (decoded, consumed) = decode_frame(&frame);
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded, DecodedFrame::Message(payload.to_vec()));
    }

    #[test]
    fn decode_frame_flags_oversized_payload() {
        let mut frame = vec![0x80 | OPCODE_BINARY, 0x80 | 126];
        frame.extend_from_slice(&200u16.to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.extend_from_slice(&vec![0u8; 200]);
        let (decoded, consumed) = decode_frame(&frame);
        assert_eq!(decoded, DecodedFrame::TooLarge);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn decode_frame_reports_incomplete_on_partial_header() {
        let (decoded, consumed) = decode_frame(&[0x82]);
        assert_eq!(decoded, DecodedFrame::Incomplete);
        assert_eq!(consumed, 0);
    }

    #[test]
    fn decode_frame_rejects_unmasked_client_frame() {
        let frame = encode_frame(OPCODE_BINARY, &[1, 2, 3]);
        let (decoded, consumed) = decode_frame(&frame);
        assert_eq!(decoded, DecodedFrame::Invalid);
        assert_eq!(consumed, frame.len());
    }
}
