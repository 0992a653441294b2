//! Shared wire protocol, framing, sequencing and connection state machine
//! used by both the client and server drivers.

mod bitfield;
mod config;
mod connection;
mod error;
mod header;
mod message;
mod metrics;
mod pending;
mod reasons;
mod seq_id;
mod sequencer;
mod timed_queue;
mod transport;

pub use bitfield::{Bitfield256, DynamicBitfield};
pub use config::{ConnectionConfig, PeerConfig, QualityThresholds};
pub use connection::{Connection, ConnectionMetrics, ConnectionState};
pub use error::{NetError, NetResult};
pub use header::{Header, SendMode};
pub use message::{Message, SEQ_ID_BIT_OFFSET};
pub use metrics::{NotifyLossWindow, RollingStat};
pub use pending::PendingMessage;
pub use reasons::{ConnectionFailedReason, DisconnectReason, RejectReason};
pub use seq_id::{gap, SeqId};
pub use sequencer::{AckOutcome, NotifyEvent, NotifySequencer, ReliableSequencer};
pub use timed_queue::TimedEventQueue;
pub use transport::{ClientTransport, ServerTransport, TransportEvent};

pub use riptide_serde as serde;
