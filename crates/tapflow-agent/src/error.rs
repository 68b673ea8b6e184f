//! Channel-level errors.
//!
//! These stay inside the agent crate: proxy operations translate every one of
//! them into the capability interface's in-band failure value, so a remote
//! call never throws across the proxy boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("channel closed by peer")]
    ChannelClosed,

    #[error("socket: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame is not a wire message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message did not serialize to a JSON object")]
    NotAnObject,

    #[error("handshake got no response")]
    Handshake,
}
