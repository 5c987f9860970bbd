//! Typed sink for session and stream lifecycle events.

use bosh_types::{BodyElement, Rid, Sid, StreamId};
use bytes::Bytes;

/// Receives delivery and lifecycle notifications from the session layer.
///
/// One method per event kind keeps the contract checkable at compile time.
/// Implementations that prefer a message-passing shape can forward each call
/// into a channel of their own tagged type.
pub trait EventSink {
    /// Payload stanzas accepted from the client, scoped to `stream`.
    fn on_nodes(&mut self, sid: Sid, stream: StreamId, nodes: &[Bytes]);

    /// A stream was torn down.
    fn on_stream_terminate(&mut self, sid: Sid, stream: StreamId);

    /// The client acknowledged receipt of the response sent for `rid`.
    fn on_response_acknowledged(&mut self, sid: Sid, rid: Rid);

    /// A response could not be delivered before its session went away.
    fn on_no_client(&mut self, sid: Sid, response: &BodyElement);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_nodes(&mut self, _sid: Sid, _stream: StreamId, _nodes: &[Bytes]) {}
    fn on_stream_terminate(&mut self, _sid: Sid, _stream: StreamId) {}
    fn on_response_acknowledged(&mut self, _sid: Sid, _rid: Rid) {}
    fn on_no_client(&mut self, _sid: Sid, _response: &BodyElement) {}
}
