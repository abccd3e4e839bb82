//! Error types for the controller runtime.

use trellis_shared::{CodecError, DatapathId};

use crate::handshake::HandshakeState;

/// The result type used throughout trellis.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by an application handler or timer callback.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of an application handler or timer callback.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Errors that can occur while running the controller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A connection did not complete the Hello/Echo/Features exchange.
    #[error("handshake failed in state {state:?}: {reason}")]
    HandshakeFailure {
        /// The state the handshake was in when it failed.
        state: HandshakeState,
        reason: String,
    },

    /// An established switch connection reached end-of-stream or was reset.
    #[error("connection to switch {datapath_id:#018x} lost: {reason}")]
    ConnectionLost {
        datapath_id: DatapathId,
        reason: String,
    },

    /// A switch sent a message the controller cannot route.
    #[error("protocol violation from {}: {reason}", fmt_dpid(.datapath_id))]
    ProtocolViolation {
        datapath_id: Option<DatapathId>,
        reason: String,
    },

    /// A message could not be delivered to a switch.
    #[error("failed to send to switch {datapath_id:#018x}: {reason}")]
    SendFailure {
        datapath_id: DatapathId,
        reason: String,
    },

    /// An application handler or timer callback returned an error or panicked.
    #[error("handler `{event}` failed: {reason}")]
    HandlerFault { event: String, reason: String },

    /// A message builder was called without a mandatory option.
    #[error("missing mandatory option `{0}`")]
    MissingOption(&'static str),

    /// Invalid configuration or declaration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The controller was asked to run a second time.
    #[error("controller is already running or has already run")]
    AlreadyRunning,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_dpid(datapath_id: &Option<DatapathId>) -> String {
    match datapath_id {
        Some(id) => format!("switch {id:#018x}"),
        None => "unidentified switch".to_owned(),
    }
}

impl Error {
    /// Classify a codec failure on an established connection.
    ///
    /// A peer going away (or an I/O failure on the socket) is a lost connection;
    /// bytes that cannot be understood are a protocol violation.
    pub(crate) fn from_codec(datapath_id: DatapathId, err: CodecError) -> Self {
        match err {
            CodecError::Disconnected
            | CodecError::Truncated { .. }
            | CodecError::Io(_) => Self::ConnectionLost {
                datapath_id,
                reason: err.to_string(),
            },
            CodecError::UnsupportedVersion(_)
            | CodecError::InvalidLength(_)
            | CodecError::Malformed { .. }
            | CodecError::Oversized { .. } => Self::ProtocolViolation {
                datapath_id: Some(datapath_id),
                reason: err.to_string(),
            },
        }
    }
}
