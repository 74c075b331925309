use thiserror::Error;

/// A send or read request that fails basic validation. Never persisted,
/// reported only to the originating connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Receiver ID is required")]
    MissingReceiver,

    #[error("Partner ID is required")]
    MissingPartner,

    #[error("Message too long: {len} bytes (max {max})")]
    MessageTooLong { len: usize, max: usize },
}

/// A live-transport frame that could not be decoded into a client event.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}
