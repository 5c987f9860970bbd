//! Transport collaborator contract.

use bosh_types::BodyElement;
use thiserror::Error;

/// Errors a transport handle can report when writing a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer went away before the response could be written.
    #[error("connection closed by peer")]
    Closed,

    /// Any other write failure, described by the transport.
    #[error("i/o failure: {0}")]
    Io(String),
}

/// One outstanding HTTP response.
///
/// The HTTP front end hands the session layer a boxed handle per inbound
/// request; the session layer writes at most one wrapper to it. Serialization
/// of the wrapper to the wire is the transport's job — the session layer
/// never sees XML text.
///
/// Send failures are recovered inside the session layer (retry on another
/// held connection, or re-queue); they are never surfaced to the client.
pub trait ResponseHandle {
    /// Serializes and writes `body` as this request's response.
    fn send(&mut self, body: &BodyElement) -> Result<(), TransportError>;
}
