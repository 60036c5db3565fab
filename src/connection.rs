//! Per-client connection record and its state machine.
//!
//! A record is created by the acceptor right after `accept`, handed to the
//! connection handler, and dropped by that handler when the client leaves.
//! Dropping the record closes the socket.

use crate::id::ClientId;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the first message, which carries the display name.
    Handshaking,
    /// Receiving chat messages.
    Active,
    /// Leaving the pool and closing the socket.
    Closing,
    /// Handler finished.
    Terminated,
}

/// State owned by exactly one connection handler.
#[derive(Debug)]
pub struct ConnectionRecord<S = TcpStream> {
    /// Remote endpoint, captured at accept time.
    pub address: SocketAddr,
    pub stream: S,
    pub id: ClientId,
    /// Set once during the handshake; empty before that.
    pub display_name: String,
    state: ConnState,
}

impl<S> ConnectionRecord<S> {
    pub fn new(id: ClientId, address: SocketAddr, stream: S) -> Self {
        Self {
            address,
            stream,
            id,
            display_name: String::new(),
            state: ConnState::Handshaking,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Store the display name and start receiving messages.
    pub fn activate(&mut self, name: String) {
        debug_assert_eq!(self.state, ConnState::Handshaking);
        self.display_name = name;
        self.state = ConnState::Active;
    }

    /// Mark connection for closing. Valid from any live state.
    pub fn close(&mut self) {
        debug_assert_ne!(self.state, ConnState::Terminated);
        self.state = ConnState::Closing;
    }

    /// Final transition, taken after the pool slot has been released.
    pub fn terminate(&mut self) {
        debug_assert_eq!(self.state, ConnState::Closing);
        self.state = ConnState::Terminated;
    }
}

/// What a single receive produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Peer closed its end (zero-byte read).
    Closed,
    /// Client asked to leave.
    Exit,
    /// Data whose content is empty (it starts with a NUL byte). Ignored.
    Empty,
    /// Raw chat message with one trailing newline removed.
    Message(Bytes),
}

const EXIT_TOKEN: &[u8] = b"exit";

/// Classify the bytes of one receive.
///
/// There is no framing: whatever a single read returned is one message.
/// Its content ends at the first NUL byte, if any.
pub fn classify(received: &[u8]) -> Inbound {
    if received.is_empty() {
        return Inbound::Closed;
    }

    let content = until_nul(received);
    if content.starts_with(EXIT_TOKEN) {
        Inbound::Exit
    } else if content.is_empty() {
        Inbound::Empty
    } else {
        Inbound::Message(Bytes::copy_from_slice(strip_newline(content)))
    }
}

/// Display name carried by the handshake message.
pub fn display_name(received: &[u8]) -> String {
    String::from_utf8_lossy(strip_newline(until_nul(received))).into_owned()
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

fn strip_newline(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\n").unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ConnectionRecord<()> {
        ConnectionRecord::new(
            crate::id::IdAllocator::new(10).allocate().unwrap(),
            "127.0.0.1:5555".parse().unwrap(),
            (),
        )
    }

    #[test]
    fn test_connection_state_transitions() {
        let mut conn = record();
        assert_eq!(conn.state(), ConnState::Handshaking);
        assert!(conn.display_name.is_empty());

        conn.activate("alice".to_string());
        assert_eq!(conn.state(), ConnState::Active);
        assert_eq!(conn.display_name, "alice");

        conn.close();
        assert_eq!(conn.state(), ConnState::Closing);

        conn.terminate();
        assert_eq!(conn.state(), ConnState::Terminated);
    }

    #[test]
    fn test_close_during_handshake() {
        let mut conn = record();
        conn.close();
        assert_eq!(conn.state(), ConnState::Closing);
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(classify(b"hello\n"), Inbound::Message("hello".into()));
        assert_eq!(classify(b"hello"), Inbound::Message("hello".into()));
        // Only a single newline is stripped
        assert_eq!(classify(b"hi\n\n"), Inbound::Message("hi\n".into()));
        assert_eq!(classify(b"\n"), Inbound::Message(Bytes::new()));
    }

    #[test]
    fn test_classify_keeps_raw_bytes() {
        assert_eq!(
            classify(&[0x68, 0xff, 0xfe, b'\n']),
            Inbound::Message(Bytes::from_static(&[0x68, 0xff, 0xfe]))
        );
    }

    #[test]
    fn test_classify_nul_terminated() {
        assert_eq!(classify(b"\0"), Inbound::Empty);
        assert_eq!(classify(b"\0hello\n"), Inbound::Empty);
        assert_eq!(classify(&[0u8; 16]), Inbound::Empty);
        assert_eq!(classify(b"hi\n\0\0\0"), Inbound::Message("hi".into()));
        assert_eq!(classify(b"exit\0"), Inbound::Exit);
    }

    #[test]
    fn test_classify_exit() {
        assert_eq!(classify(b"exit"), Inbound::Exit);
        assert_eq!(classify(b"exit\n"), Inbound::Exit);
        assert_eq!(classify(b"exiting now"), Inbound::Exit);
        assert_eq!(classify(b" exit"), Inbound::Message(" exit".into()));
        assert_eq!(classify(b"EXIT"), Inbound::Message("EXIT".into()));
    }

    #[test]
    fn test_classify_closed() {
        assert_eq!(classify(b""), Inbound::Closed);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(b"bob\n"), "bob");
        assert_eq!(display_name(b"bob"), "bob");
        assert_eq!(display_name(&[0x62, 0xff]), "b\u{fffd}");
        assert_eq!(display_name(b"eve\n\0\0"), "eve");
    }
}
