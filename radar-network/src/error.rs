//! Network error types

use thiserror::Error;

pub type NetworkResult<T> = Result<T, NetworkError>;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Peer connection error: {0}")]
    Connection(String),

    #[error("Message encoding error: {0}")]
    Encoding(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Network timeout")]
    Timeout,

    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No live connections to send on")]
    NoConnections,

    #[error("Channel stopped")]
    ChannelStopped,

    #[error("Service stopped")]
    ServiceStopped,

    #[error("A subscription is already pending")]
    AlreadySubscribed,
}

impl NetworkError {
    /// Whether the source that produced this error will never deliver again.
    ///
    /// Subscription loops stop re-arming once they see one of these.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            NetworkError::ChannelStopped
                | NetworkError::ServiceStopped
                | NetworkError::AlreadySubscribed
        )
    }
}

/// Why an event source shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A single peer channel closed
    ChannelClosed,
    /// The whole pool was stopped
    ServiceStopped,
}

impl From<StopReason> for NetworkError {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::ChannelClosed => NetworkError::ChannelStopped,
            StopReason::ServiceStopped => NetworkError::ServiceStopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(NetworkError::ChannelStopped.is_connection_fatal());
        assert!(NetworkError::ServiceStopped.is_connection_fatal());
        assert!(NetworkError::AlreadySubscribed.is_connection_fatal());

        assert!(!NetworkError::Timeout.is_connection_fatal());
        assert!(!NetworkError::NoConnections.is_connection_fatal());
        assert!(!NetworkError::Connection("refused".into()).is_connection_fatal());
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert!(matches!(
            NetworkError::from(StopReason::ChannelClosed),
            NetworkError::ChannelStopped
        ));
        assert!(matches!(
            NetworkError::from(StopReason::ServiceStopped),
            NetworkError::ServiceStopped
        ));
    }
}
