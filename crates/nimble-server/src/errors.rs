//! Error types for the delivery core.
//!
//! API calls on an [`Agent`](crate::agent::Agent) return [`AgentError`]
//! synchronously. Failures inside the writer loop are never returned to a
//! caller; they are logged and surface as a
//! [`WriterExit`](crate::writer::WriterExit) reason.

use nimble_core::CodecError;
use thiserror::Error;

/// Errors returned by the agent/session API.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent is closed; nothing more can be sent.
    #[error("broken low-level pipe")]
    BrokenPipe,
    /// The outbound queue is at capacity; the caller should back off.
    #[error("session send buffer exceed")]
    BufferExceed,
    /// A response was addressed to message id 0.
    #[error("invalid correlation id: response message id must be positive")]
    InvalidCorrelationId,
    /// `close` was called on an agent that is already closed.
    #[error("close closed session")]
    AlreadyClosed,
    /// User id 0 is reserved for unbound sessions.
    #[error("illegal uid: {0}")]
    IllegalUid(u64),
    /// A JSON payload could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Closing the underlying transport failed.
    #[error("{0}")]
    Transport(#[from] TransportError),
}

/// Physical transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level I/O failure.
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// WebSocket protocol or send failure.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Rejection raised by a pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The stage refused to transform the payload.
    #[error("pipeline stage '{stage}' rejected payload: {reason}")]
    Rejected {
        /// Stage name.
        stage: String,
        /// Why the payload was refused.
        reason: String,
    },
}

impl PipelineError {
    /// Build a rejection for the named stage.
    pub fn rejected(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while handling inbound traffic.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The client sent something the server will not process.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Replying through the agent failed.
    #[error("{0}")]
    Agent(#[from] AgentError),
    /// An inbound packet or message could not be decoded.
    #[error("{0}")]
    Codec(#[from] CodecError),
    /// Application handler failure.
    #[error("handler failed: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Short label used in metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Agent(_) => "agent",
            Self::Codec(_) => "codec",
            Self::Internal(_) => "internal",
        }
    }
}

/// Group membership errors.
#[derive(Debug, Error)]
pub enum GroupError {
    /// A session with the same id is already a member.
    #[error("session {0} already exists in group")]
    SessionDuplication(u64),
}

/// Server startup errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Listener I/O failure after binding.
    #[error("listener i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Pre-encoding fixed packets failed.
    #[error("{0}")]
    Codec(#[from] CodecError),
    /// Handshake payload serialization failed.
    #[error("failed to encode handshake payload: {0}")]
    Json(#[from] serde_json::Error),
    /// `listen` was called more than once.
    #[error("server is already listening")]
    AlreadyListening,
}
