use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    /// The audio sink refused a buffer (decode error, quota, closed sink).
    #[error("Audio sink rejected data: {0}")]
    SinkRejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn is_network_error(&self) -> bool {
        matches!(self, BridgeError::Network(_))
    }

    pub fn is_sink_rejection(&self) -> bool {
        matches!(self, BridgeError::SinkRejected(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
