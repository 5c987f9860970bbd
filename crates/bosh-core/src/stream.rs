//! Stream registry collaborator contract.
//!
//! A session only keeps non-owning [`StreamId`] back-references to the
//! logical XMPP streams multiplexed over it. Everything the session layer
//! needs to know or do about a stream goes through [`StreamRegistry`], which
//! the XMPP-facing layer implements.

use bosh_types::{BodyElement, BodyRequest, Sid, StreamId, StreamName, TerminateCondition};

/// Addressing metadata for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Wire name carried in the `stream` attribute.
    pub name: StreamName,
    /// Domain the stream connects to.
    pub to: Option<String>,
    /// The client's negotiated address, when known.
    pub from: Option<String>,
}

/// The XMPP-facing layer's view of the streams behind BOSH sessions.
///
/// The classification predicates have XEP-0124/0206-shaped defaults so simple
/// embedders need not override them.
pub trait StreamRegistry {
    /// Extracts the stream name a request addresses, if any.
    fn name_in(&self, request: &BodyRequest) -> Option<StreamName> {
        request.stream()
    }

    /// Resolves a stream name to a live stream.
    fn by_name(&self, name: &StreamName) -> Option<StreamId>;

    /// Addressing metadata for a live stream.
    fn info(&self, id: StreamId) -> Option<StreamInfo>;

    /// Creates a stream for `session` as described by `request` and returns
    /// its id.
    fn add(&mut self, session: Sid, request: &BodyRequest) -> StreamId;

    /// Handles an XMPP stream restart on a live stream.
    fn restart(&mut self, id: StreamId, request: &BodyRequest);

    /// Tears a stream down.
    fn terminate(&mut self, id: StreamId, condition: Option<&TerminateCondition>);

    /// True when `request` asks for a stream restart.
    fn is_restart(&self, request: &BodyRequest) -> bool {
        request.restart_requested()
    }

    /// True when `request` opens an additional stream on an existing session
    /// (an in-session request naming a new target domain).
    fn is_stream_add(&self, request: &BodyRequest) -> bool {
        request.sid().is_some() && request.to().is_some() && !request.restart_requested()
    }

    /// True when `request` asks to terminate a stream or the whole session.
    fn is_terminate(&self, request: &BodyRequest) -> bool {
        request.is_terminate()
    }

    /// The terminate stanza answering a request that named an unknown stream.
    fn invalid_stream_terminate(&self, name: &StreamName) -> BodyElement {
        BodyElement::terminate(Some(&TerminateCondition::ItemNotFound))
            .with_attr("stream", name)
            .with_attr("message", "Invalid stream name")
    }
}
