//! Error types for the instrument layer.
//!
//! Two levels are distinguished:
//!
//! - **`TransportError`**: failures of the underlying connection (opening a
//!   resource, I/O, timeouts, the VISA library itself). These are produced by
//!   [`Transport`](crate::transport::Transport) implementations and never
//!   recovered locally.
//! - **`InstrumentError`**: failures of an instrument wrapper operation. An
//!   out-of-range channel, an unparseable measurement reply, or an invalid
//!   argument are reported here; transport failures are wrapped unchanged via
//!   `#[from]` so the `?` operator works across both layers.
//!
//! A source command issued on a channel without a configured limit is NOT an
//! error. It is a soft rejection reported through
//! [`SourceOutcome`](crate::interlock::SourceOutcome).

use thiserror::Error;

/// Convenience alias for results of instrument operations.
pub type InstrumentResult<T> = std::result::Result<T, InstrumentError>;

/// Connection-level failures.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The resource could not be opened
    #[error("Failed to open resource '{resource}': {reason}")]
    Connection {
        /// Resource string that was opened
        resource: String,
        /// Reason reported by the backend
        reason: String,
    },

    /// Underlying read or write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No reply to the given command
    #[error("Timed out waiting for reply to '{0}'")]
    Timeout(String),

    /// Error from the VISA library
    #[error("VISA error: {0}")]
    Visa(String),

    /// Session was already closed
    #[error("Resource '{0}' is closed")]
    Closed(String),

    /// Backend compiled out
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

/// Failures of an instrument wrapper operation.
#[derive(Error, Debug)]
pub enum InstrumentError {
    /// Channel outside `1..=channel_count`
    #[error("Invalid channel {channel}: instrument has channels 1..={channel_count}")]
    InvalidChannel {
        /// Requested channel
        channel: u8,
        /// Channels the instrument has
        channel_count: u8,
    },

    /// Argument rejected before anything was sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Reply could not be parsed as a number
    #[error("Reply '{response}' to '{command}' is not a number")]
    InvalidResponse {
        /// Query that was sent
        command: String,
        /// Raw reply
        response: String,
    },

    /// Transport failure, passed through unchanged
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_channel_display() {
        let err = InstrumentError::InvalidChannel {
            channel: 4,
            channel_count: 3,
        };
        assert_eq!(
            err.to_string(),
            "Invalid channel 4: instrument has channels 1..=3"
        );
    }

    #[test]
    fn test_transport_error_wraps() {
        let err: InstrumentError = TransportError::Timeout("*IDN?".into()).into();
        assert!(matches!(err, InstrumentError::Transport(_)));
        assert!(err.to_string().contains("*IDN?"));
    }
}
