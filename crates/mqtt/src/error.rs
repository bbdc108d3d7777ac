//! Error type for link operations.
//!
//! Everything the crate does returns `Result<T, TransferError>`. Connection
//! failures observed by the kernel are not errors of this kind: they are
//! reported as [`LinkEvent`](crate::event::LinkEvent)s so the owner of the
//! session can decide whether to retry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Endpoint metadata is malformed (bad QoS, empty topic).
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Client could not be constructed (TLS files, options).
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// The request queue rejected a publish/subscribe/disconnect.
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// The request queue stayed full for longer than the request timeout.
    #[error("Request to '{topic}' timed out after {timeout_ms} ms")]
    RequestTimeout { topic: String, timeout_ms: u64 },

    /// The connection kernel has stopped; the link can no longer be driven.
    #[error("Connection kernel is not running")]
    KernelStopped,

    #[error("Client connection error: {0}")]
    ClientConnection(Box<rumqttc::ConnectionError>),

    /// File I/O, typically while loading TLS material.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}
