//! Session-layer error types.
//!
//! Protocol-level failures (malformed packets, policy violations, transport
//! hiccups) are not errors here — they are state-machine transitions that
//! answer the client with terminate stanzas or recover locally. `CoreError`
//! covers genuine contract violations between the embedding driver and this
//! crate.

use thiserror::Error;

/// Result type for session-layer operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur at the session-layer API boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A session-creation request arrived without a request id.
    #[error("session-creation request is missing a rid")]
    MissingRid,

    /// `create` was called with a request that is not a session-creation
    /// request.
    #[error("not a session-creation request")]
    NotACreationRequest,
}
