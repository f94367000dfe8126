use lodestone_protocol_core::{FrameError, StateError};
use lodestone_types::TextComponent;
use thiserror::Error;

/// Connection-level failures. Every variant terminates the session; the
/// recoverable conditions (unknown packet ids, handler bugs) never reach
/// this type.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
    #[error("read timed out")]
    Timeout,
    #[error("connection closed by peer")]
    Closed,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("disconnected by server: {}", reason.to_plain())]
    Disconnected { reason: TextComponent },
}
