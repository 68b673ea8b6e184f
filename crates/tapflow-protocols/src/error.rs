//! Error types shared across capability boundaries.

use thiserror::Error;

/// Failure of a capability invocation (custom callback, remote call).
///
/// These never cross the graph-walk loop: the engine converts them into the
/// stage's normal miss/failure return at the boundary.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The named callback/object is not registered.
    #[error("not registered: {0}")]
    NotRegistered(String),

    /// The operation is only valid on a local object.
    #[error("operation not supported on a remote object: {0}")]
    RemoteUnsupported(&'static str),

    /// The remote round-trip produced no result (timeout, channel closed).
    #[error("no result from remote call: {0}")]
    NoResult(&'static str),

    /// Callback reported a failure of its own.
    #[error("callback failed: {0}")]
    Callback(String),
}
