//! Per-boundary error enums (§7). Network errors are recoverable and
//! confined to the affected connection; storage errors that break an
//! invariant are fatal, because safety of consensus can't be guaranteed
//! once the durable record is suspect.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("unknown peer: not a federation member")]
    UnknownPeer,

    #[error("dial failed: {0}")]
    DialFailure(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("send on closed connection")]
    SendOnClosedConnection,

    #[error("decoding error: {0}")]
    DecodingError(String),
}

#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage corruption: {0}")]
    StorageCorruption(String),

    #[error("network error: {0}")]
    Net(#[from] NetError),

    #[error("storage error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
