//! Error types for the GLP2 stack.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. The first six variants form the closed
//! protocol taxonomy surfaced to the test workflow; the remaining variants
//! cover connection lifecycle and physical transport failures.

/// The error type for all GLP2 operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No transport is open, or the transport was closed while the request
    /// was queued or in flight.
    #[error("no connection to tester")]
    NoConnection,

    /// A parameter name or value was rejected before any bytes were sent.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A reply could not be parsed or had the wrong structure.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A checksum did not match, or the tester answered with NAK.
    ///
    /// `expected` is the locally computed checksum, `received` the value
    /// found on the wire (or `NAK`), and `frame` a printable view of the
    /// offending bytes.
    #[error("invalid checksum: expected {expected}, received {received} in {frame}")]
    InvalidChecksum {
        expected: String,
        received: String,
        frame: String,
    },

    /// The tester answered with BEL: a test is running or a black-box test
    /// is pending.
    #[error("tester is busy")]
    BusyTester,

    /// No complete reply arrived within the response timeout.
    #[error("timeout waiting for response")]
    ResponseTimeout,

    /// The tester integration is disabled by configuration or licence.
    #[error("tester integration is disabled")]
    Disabled,

    /// No serial port matched the configured descriptor pattern.
    #[error("no serial port matching {0:?} found")]
    PortNotFound(String),

    /// Enumerating serial ports failed.
    #[error("listing serial ports failed: {0}")]
    PortListing(String),

    /// The tester kept reporting a fault while stale results were drained.
    #[error("tester stuck with fault status {0}")]
    StuckTester(u32),

    /// A transport-level error (serial port open/configure failures).
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection to the tester was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable upper-case code the workflow layer can present or map.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NoConnection => "NO_CONNECTION",
            Error::InvalidParameters(_) => "INVALID_PARAMETERS",
            Error::InvalidResponse(_) => "INVALID_RESPONSE",
            Error::InvalidChecksum { .. } => "INVALID_CHECKSUM",
            Error::BusyTester => "BUSY_TESTER",
            Error::ResponseTimeout => "RESPONSE_TIMEOUT",
            Error::Disabled => "DISABLED",
            Error::PortNotFound(_) => "PORT_NOT_FOUND",
            Error::PortListing(_) => "PORT_LISTING_FAILED",
            Error::StuckTester(_) => "STUCK_TESTER",
            Error::Transport(_) => "TRANSPORT",
            Error::ConnectionLost => "CONNECTION_LOST",
            Error::Io(_) => "IO",
        }
    }

    /// Whether this error means the link itself is gone (as opposed to a
    /// single exchange failing).
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Error::NoConnection | Error::ConnectionLost | Error::Io(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
