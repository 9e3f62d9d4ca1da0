//! Broadcast HTTP/WebSocket server (spec §4.3). One non-blocking listener
//! plus a flat list of peer connections; driven entirely from the
//! pipeline worker's tick rather than owning a thread or task of its own,
//! so accept/read/write all happen on the same thread that produces
//! frames (spec §5.1).

pub mod assets;
pub mod ws;

use crate::error::ServerError;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};

/// One inbound message a peer has sent after completing its handshake,
/// handed back to the caller (the pipeline worker) for interpretation
/// into HID commands — the server itself has no opinion on payload shape.
pub struct InboundMessage {
    pub peer_addr: String,
    pub payload: Vec<u8>,
}

enum PeerState {
    /// Accumulating the HTTP request until a full header block with
    /// `Sec-WebSocket-Key` arrives.
    Handshaking,
    Open,
}

/// Above this many buffered-but-unsent bytes, a peer is considered too
/// slow to keep up and is dropped rather than left to grow its backlog
/// without bound (roughly eight 720p-ish access units' worth).
const MAX_PENDING_WRITE_BYTES: usize = 4 * 1024 * 1024;

struct Peer {
    socket: TcpStream,
    addr: String,
    state: PeerState,
    read_buf: Vec<u8>,
    /// Bytes already queued for this peer that a prior short write didn't
    /// accept, kept in order and retried on the next `broadcast` tick.
    write_buf: Vec<u8>,
}

impl Peer {
    fn new(socket: TcpStream, addr: String) -> Self {
        Self {
            socket,
            addr,
            state: PeerState::Handshaking,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
        }
    }
}

/// Owns the listening socket and every connected peer. `poll_accept`,
/// `poll_inbound`, and `broadcast` are each called once per pipeline tick;
/// none of them block.
pub struct BroadcastServer {
    listener: TcpListener,
    port: u16,
    peers: Vec<Peer>,
}

impl BroadcastServer {
    pub fn bind(port: u16) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port, peers: Vec::new() })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Accepts every connection currently pending without blocking.
    pub fn poll_accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((socket, addr)) => {
                    if let Err(e) = socket.set_nonblocking(true) {
                        tracing::debug!(target: "server", error = %e, "failed to set nonblocking, dropping connection");
                        continue;
                    }
                    tracing::debug!(target: "server", %addr, "accepted connection");
                    self.peers.push(Peer::new(socket, addr.to_string()));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(target: "server", error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Reads whatever is available from every peer, advancing handshakes
    /// and decoding WebSocket frames. Peers that error or close are
    /// dropped. Returns every fully-decoded inbound message across all
    /// peers this tick, in peer order.
    pub fn poll_inbound(&mut self) -> Vec<InboundMessage> {
        let mut messages = Vec::new();
        let mut dead = Vec::new();

        for (i, peer) in self.peers.iter_mut().enumerate() {
            let mut chunk = [0u8; 4096];
            loop {
                match peer.socket.read(&mut chunk) {
                    Ok(0) => {
                        dead.push(i);
                        break;
                    }
                    Ok(n) => peer.read_buf.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        tracing::debug!(target: "server", addr = %peer.addr, error = %e, "read error, dropping peer");
                        dead.push(i);
                        break;
                    }
                }
            }

            match peer.state {
                PeerState::Handshaking => {
                    if let Some(pos) = find_header_end(&peer.read_buf) {
                        let head_bytes = peer.read_buf[..pos].to_vec();
                        peer.read_buf.drain(..pos + 4);
                        let head_str = String::from_utf8_lossy(&head_bytes);
                        match ws::parse_request_head(&head_str) {
                            Some(head) if head.is_upgrade && head.ws_key.is_some() => {
                                let response = ws::handshake_response(&head.ws_key.unwrap());
                                if peer.socket.write_all(response.as_bytes()).is_err() {
                                    dead.push(i);
                                } else {
                                    peer.state = PeerState::Open;
                                }
                            }
                            Some(head) => {
                                let (content_type, body) = assets::response_for_path(&head.path);
                                let response = format!(
                                    "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                                    content_type,
                                    body.len()
                                );
                                let _ = peer.socket.write_all(response.as_bytes());
                                let _ = peer.socket.write_all(body);
                                dead.push(i);
                            }
                            None => {
                                let err = ServerError::BadHandshake;
                                tracing::debug!(target: "server", addr = %peer.addr, error = %err, "dropping peer");
                                dead.push(i);
                            }
                        }
                    }
                }
                PeerState::Open => {
                    loop {
                        let (frame, consumed) = ws::decode_frame(&peer.read_buf);
                        if consumed == 0 {
                            break;
                        }
                        peer.read_buf.drain(..consumed);
                        match frame {
                            ws::DecodedFrame::Message(payload) => {
                                messages.push(InboundMessage { peer_addr: peer.addr.clone(), payload });
                            }
                            ws::DecodedFrame::Close => {
                                dead.push(i);
                                break;
                            }
                            ws::DecodedFrame::TooLarge => {
                                // Spec §9 open question: oversized inbound frames are
                                // dropped, not treated as a protocol error.
                                tracing::debug!(target: "server", addr = %peer.addr, "ignored oversized inbound frame");
                            }
                            ws::DecodedFrame::Incomplete => {}
                            ws::DecodedFrame::Invalid => {
                                let err = ServerError::BadFrame;
                                tracing::debug!(target: "server", addr = %peer.addr, error = %err, "dropping peer");
                                dead.push(i);
                                break;
                            }
                        }
                    }
                }
            }
        }

        dead.sort_unstable();
        dead.dedup();
        for i in dead.into_iter().rev() {
            self.peers.swap_remove(i);
        }

        messages
    }

    /// Encodes `payload` as one binary WebSocket frame and queues it for
    /// every open peer, then flushes each peer's queue as far as its
    /// socket accepts right now. A short write cannot be treated as
    /// success: once a WebSocket frame has started going out, the rest of
    /// it must follow in order or every later frame misparses from the
    /// peer's frame-boundary perspective. So unsent bytes stay buffered
    /// in `write_buf` and are retried on the next tick instead of being
    /// silently dropped mid-frame; a peer whose backlog grows past
    /// `MAX_PENDING_WRITE_BYTES` (can't drain as fast as frames arrive) or
    /// whose socket errors outright is removed.
    pub fn broadcast(&mut self, payload: &[u8]) {
        let frame = ws::encode_frame(ws::OPCODE_BINARY, payload);
        let mut dead = Vec::new();
        for (i, peer) in self.peers.iter_mut().enumerate() {
            if !matches!(peer.state, PeerState::Open) {
                continue;
            }
            peer.write_buf.extend_from_slice(&frame);
            if peer.write_buf.len() > MAX_PENDING_WRITE_BYTES {
                tracing::debug!(target: "server", addr = %peer.addr, "write backlog exceeded, dropping peer");
                dead.push(i);
                continue;
            }
            if !Self::flush_peer(peer) {
                dead.push(i);
            }
        }
        for i in dead.into_iter().rev() {
            self.peers.swap_remove(i);
        }
    }

    /// Writes as much of `peer.write_buf` as the socket accepts right now
    /// and drains exactly those bytes, leaving any remainder queued.
    /// Returns `false` if the peer's socket has failed outright and
    /// should be dropped.
    fn flush_peer(peer: &mut Peer) -> bool {
        while !peer.write_buf.is_empty() {
            match peer.socket.write(&peer.write_buf) {
                Ok(0) => return false,
                Ok(n) => {
                    peer.write_buf.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => return false,
            }
        }
        true
    }
}

/// Finds the `\r\n\r\n` terminator of an HTTP header block, returning the
/// index of its first byte.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    let needle = b"\r\n\r\n";
    buf.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_header_end_locates_terminator() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\ntrailing";
        let pos = find_header_end(buf).unwrap();
        assert_eq!(&buf[pos..pos + 4], b"\r\n\r\n");
    }

    #[test]
    fn find_header_end_none_when_incomplete() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n";
        assert!(find_header_end(buf).is_none());
    }

    #[test]
    fn bind_reports_actual_port_when_zero_requested() {
        let server = BroadcastServer::bind(0).unwrap();
        assert_ne!(server.port(), 0);
        assert_eq!(server.peer_count(), 0);
    }
}
