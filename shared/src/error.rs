use riptide_serde::SerdeErr;
use thiserror::Error;

/// Top-level failure modes surfaced to callers of the connection, peer,
/// server and client layers.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("malformed message: {0}")]
    Serde(#[from] SerdeErr),
    #[error("received message with unknown header byte {0:#04x}")]
    UnknownHeader(u8),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("operation attempted in connection state {0:?}")]
    WrongState(crate::connection::ConnectionState),
    #[error("no connection exists for the given peer handle")]
    NoSuchConnection,
}

pub type NetResult<T> = Result<T, NetError>;
