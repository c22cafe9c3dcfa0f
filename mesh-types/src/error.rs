//! Error types for relaymesh wire handling.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization of the envelope failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// The envelope carried a type this client does not know
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The envelope type was known but its data did not match
    #[error("invalid payload for {msg_type}: {source}")]
    InvalidPayload {
        /// The envelope type whose payload failed to decode.
        msg_type: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::UnknownType("mesh_update".into());
        assert_eq!(err.to_string(), "unknown message type: mesh_update");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
