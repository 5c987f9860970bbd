//! Inbound BOSH requests.

use std::collections::BTreeMap;
use std::fmt::Display;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Rid, Sid, StreamName, TerminateCondition};

/// A parsed inbound `<body/>` request: the wrapper's attributes plus the
/// opaque payload stanzas it carried.
///
/// The HTTP/XML front end builds one of these per request; the session layer
/// reads it through the typed accessors below and occasionally rewrites it
/// in place (a malformed restart or an over-cap stream-add is converted into
/// a session-terminate before dispatch continues).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BodyRequest {
    attrs: BTreeMap<String, String>,
    children: Vec<Bytes>,
}

impl BodyRequest {
    /// Creates an empty request. Attributes are added with
    /// [`with_attr`](Self::with_attr) / [`set_attr`](Self::set_attr).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) a wrapper attribute.
    pub fn set_attr(&mut self, name: &str, value: impl Display) {
        self.attrs.insert(name.to_string(), value.to_string());
    }

    /// Builder form of [`set_attr`](Self::set_attr).
    pub fn with_attr(mut self, name: &str, value: impl Display) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Removes a wrapper attribute.
    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.remove(name);
    }

    /// Looks up a raw attribute value.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Number of attributes on the wrapper. Bounded by the session layer as
    /// an anti-abuse measure.
    pub fn attr_count(&self) -> usize {
        self.attrs.len()
    }

    /// Appends a payload stanza.
    pub fn push_child(&mut self, child: Bytes) {
        self.children.push(child);
    }

    /// The payload stanzas carried by this request.
    pub fn children(&self) -> &[Bytes] {
        &self.children
    }

    /// Takes the payload stanzas, leaving the request empty.
    pub fn take_children(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.children)
    }

    // ------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------

    /// The session this request addresses, when present and well-formed.
    pub fn sid(&self) -> Option<Sid> {
        self.attr("sid").and_then(Sid::parse)
    }

    /// The request identifier, when present and numeric.
    pub fn rid(&self) -> Option<Rid> {
        self.parse_u64("rid").map(Rid::new)
    }

    /// The acknowledgement value, when present and numeric.
    pub fn ack(&self) -> Option<Rid> {
        self.parse_u64("ack").map(Rid::new)
    }

    /// True when the wrapper carries an `ack` attribute at all. On a
    /// session-creation request this opts the session into the ack
    /// sub-protocol.
    pub fn requests_ack(&self) -> bool {
        self.attrs.contains_key("ack")
    }

    /// Requested long-poll timeout, in seconds.
    pub fn wait(&self) -> Option<u64> {
        self.parse_u64("wait")
    }

    /// Requested number of concurrently held connections.
    pub fn hold(&self) -> Option<u64> {
        self.parse_u64("hold")
    }

    /// Requested inactivity timeout, in seconds (an extension attribute).
    pub fn inactivity(&self) -> Option<u64> {
        self.parse_u64("inactivity")
    }

    /// The stream this request addresses, when named explicitly.
    pub fn stream(&self) -> Option<StreamName> {
        self.attr("stream").map(StreamName::from)
    }

    /// The `to` address (target domain).
    pub fn to(&self) -> Option<&str> {
        self.attr("to")
    }

    /// Client content-type to mimic in responses.
    pub fn content(&self) -> Option<&str> {
        self.attr("content")
    }

    /// The `route` extension attribute.
    pub fn route(&self) -> Option<&str> {
        self.attr("route")
    }

    /// The `ua` (user-agent) extension attribute.
    pub fn ua(&self) -> Option<&str> {
        self.attr("ua")
    }

    /// The BOSH protocol version the client speaks.
    pub fn ver(&self) -> Option<&str> {
        self.attr("ver")
    }

    /// True when the request declares the XMPP-over-BOSH extension namespace
    /// (the `xmpp:version` attribute of XEP-0206). Required on
    /// session-creation requests.
    pub fn declares_xbosh(&self) -> bool {
        self.attrs.contains_key("xmpp:version")
    }

    /// True when this is a stream-restart request (XEP-0206 `xmpp:restart`).
    pub fn restart_requested(&self) -> bool {
        matches!(self.attr("xmpp:restart"), Some("true" | "1"))
    }

    /// True when the wrapper is typed as a terminate request.
    pub fn is_terminate(&self) -> bool {
        self.attr("type") == Some("terminate")
    }

    /// The termination condition named by the client, if any.
    pub fn condition(&self) -> Option<TerminateCondition> {
        self.attr("condition").map(TerminateCondition::from_attr)
    }

    // ------------------------------------------------------------------
    // In-place conversions
    // ------------------------------------------------------------------

    /// Rewrites this request into a session-terminate.
    ///
    /// Dispatch uses this to downgrade a request that cannot be honored (a
    /// restart against a vanished stream, a stream-add past the cap) so the
    /// rest of the pipeline tears the session down uniformly.
    pub fn make_terminate(&mut self, condition: Option<TerminateCondition>) {
        self.set_attr("type", "terminate");
        self.remove_attr("stream");
        match condition {
            Some(condition) => self.set_attr("condition", condition.as_str()),
            None => self.remove_attr("condition"),
        }
    }

    fn parse_u64(&self, name: &str) -> Option<u64> {
        self.attr(name).and_then(|value| value.parse().ok())
    }
}
