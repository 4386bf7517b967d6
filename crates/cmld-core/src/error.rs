//! Error types for cmld.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! export failures are all captured here.

/// The error type for all cmld operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port, USB CDC link).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (undecodable log frame, unexpected reply).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a response from the device.
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed to a device command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A status query came back with a value that does not parse.
    ///
    /// Distinct from [`Error::Timeout`]: the device did answer, but the
    /// answer was not the one the query asked for. This usually means the
    /// command/response pairing slipped on the shared stream.
    #[error("malformed reply to {query}: {reply:?}")]
    MalformedReply {
        /// The query that was issued (e.g. `"MEMSIZE?"`).
        query: String,
        /// The body text that came back.
        reply: String,
    },

    /// The serial guard could not be acquired in time.
    #[error("serial port busy")]
    Busy,

    /// The operation was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// No connection to the device has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the device was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_malformed_reply() {
        let e = Error::MalformedReply {
            query: "MEMSIZE?".into(),
            reply: "ISO14443A_SNIFF".into(),
        };
        assert_eq!(
            e.to_string(),
            "malformed reply to MEMSIZE?: \"ISO14443A_SNIFF\""
        );
    }

    #[test]
    fn error_display_busy_and_cancelled() {
        assert_eq!(Error::Busy.to_string(), "serial port busy");
        assert_eq!(Error::Cancelled.to_string(), "operation cancelled");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only fs");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("read-only fs"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
