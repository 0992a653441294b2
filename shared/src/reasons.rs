//! Reasons surfaced alongside disconnect/reject/connection-failure events.

/// Reason embedded in a `reject` frame. `NoConnection` (a client giving up
/// without ever hearing back) never rides the wire, so value 0 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectReason {
    AlreadyConnected = 1,
    ServerFull = 2,
    Rejected = 3,
    Custom = 4,
}

impl RejectReason {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::AlreadyConnected,
            2 => Self::ServerFull,
            3 => Self::Rejected,
            4 => Self::Custom,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Reason embedded in a `disconnect` frame, and the internal bookkeeping
/// reason passed to `local_disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DisconnectReason {
    NeverConnected = 0,
    ConnectionRejected = 1,
    TransportError = 2,
    TimedOut = 3,
    Kicked = 4,
    ServerStopped = 5,
    /// A voluntary, unspecified disconnect (e.g. the peer just hung up).
    Disconnected = 6,
    PoorConnection = 7,
}

impl DisconnectReason {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::NeverConnected,
            1 => Self::ConnectionRejected,
            2 => Self::TransportError,
            3 => Self::TimedOut,
            4 => Self::Kicked,
            5 => Self::ServerStopped,
            6 => Self::Disconnected,
            7 => Self::PoorConnection,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Why a client-side `connect()` attempt ultimately failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionFailedReason {
    NoConnection,
    Rejected(RejectReason),
}
