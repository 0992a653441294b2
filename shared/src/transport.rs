//! Transport adapter contracts. The core never opens a socket itself; a
//! concrete transport (UDP, WebRTC, an in-process loopback for tests, ...)
//! implements one of these traits and is handed to a [`crate::Peer`].

use std::fmt::Debug;
use std::hash::Hash;

/// One event a server-side transport can report on a call to `poll`.
#[derive(Debug, Clone)]
pub enum TransportEvent<H> {
    Connected(H),
    Disconnected(H),
    Data(H, Vec<u8>),
}

/// A single outbound client's view of the wire: one implicit remote peer.
pub trait ClientTransport {
    /// Opens the underlying socket/channel. May yield; returns once the
    /// handle is bound (or binding failed).
    fn connect(&mut self, addr: &str, port: u16) -> Result<(), String>;

    fn send(&mut self, bytes: &[u8]) -> Result<(), String>;

    /// Drains whatever datagrams arrived since the last call. Never blocks.
    fn poll(&mut self) -> Vec<Vec<u8>>;

    fn close(&mut self);
}

/// A listening server's view of the wire: many remote peers, each identified
/// by an opaque, transport-chosen handle.
pub trait ServerTransport {
    type ConnectionHandle: Clone + Eq + Hash + Debug;

    fn listen(&mut self, addr: &str, port: u16) -> Result<(), String>;

    fn send_to(&mut self, handle: &Self::ConnectionHandle, bytes: &[u8]) -> Result<(), String>;

    /// Drains connection and data events since the last call. Never blocks.
    fn poll(&mut self) -> Vec<TransportEvent<Self::ConnectionHandle>>;

    fn close(&mut self);
}
