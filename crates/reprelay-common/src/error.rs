use thiserror::Error;

/// A session's channel refused a message.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("session channel closed")]
    Closed,
}

/// A capability operation (contains / request / remove) could not be answered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("host not connected")]
    HostUnavailable,
    #[error("host reported failure: {0}")]
    Host(String),
    #[error("host link dropped before replying")]
    ReplyDropped,
}
