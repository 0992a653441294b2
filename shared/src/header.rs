//! The 4-bit header nibble every message starts with, and the send mode it
//! implies.

/// How a message is scheduled, acknowledged and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendMode {
    /// Fire-and-forget; no sequencing, no feedback.
    Unreliable,
    /// At-most-once delivery with delivered/lost feedback; never retransmitted.
    Notify,
    /// Retransmitted until acked; duplicates suppressed on arrival.
    Reliable,
}

/// The message kind carried in the low 4 bits of byte 0. Values 7 and above
/// (`Reliable` upward) are sequenced the same way `Reliable` is; the control
/// headers below it (`Ack` through `Disconnect`) are sent directly, outside
/// of any sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Header {
    Unreliable = 0,
    Ack = 1,
    Connect = 2,
    Reject = 3,
    Heartbeat = 4,
    Disconnect = 5,
    Notify = 6,
    Reliable = 7,
    Welcome = 8,
    ClientConnected = 9,
    ClientDisconnected = 10,
}

impl Header {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Unreliable,
            1 => Self::Ack,
            2 => Self::Connect,
            3 => Self::Reject,
            4 => Self::Heartbeat,
            5 => Self::Disconnect,
            6 => Self::Notify,
            7 => Self::Reliable,
            8 => Self::Welcome,
            9 => Self::ClientConnected,
            10 => Self::ClientDisconnected,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Send mode a user message carries this header under, if any. Control
    /// headers (ack/connect/reject/heartbeat/disconnect) aren't sequenced and
    /// have no send mode of their own.
    pub fn send_mode(self) -> Option<SendMode> {
        match self {
            Header::Unreliable => Some(SendMode::Unreliable),
            Header::Notify => Some(SendMode::Notify),
            Header::Reliable
            | Header::Welcome
            | Header::ClientConnected
            | Header::ClientDisconnected => Some(SendMode::Reliable),
            Header::Ack
            | Header::Connect
            | Header::Reject
            | Header::Heartbeat
            | Header::Disconnect => None,
        }
    }

    /// Total bits consumed by this header, including the leading nibble.
    pub fn header_bits(self) -> u32 {
        match self.send_mode() {
            Some(SendMode::Unreliable) => 4,
            Some(SendMode::Reliable) => 4 + 16,
            Some(SendMode::Notify) => 4 + 40,
            None => 4,
        }
    }
}
