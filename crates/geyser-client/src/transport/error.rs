//! Transport layer errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Echo of a cancellation the client itself requested
    #[error("Cancelled on client")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(String),
}

impl TransportError {
    /// True for the error a stream reports after the client cancelled it
    pub fn is_client_cancellation(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}
