//! # bosh-types: Core types for the BOSH session layer
//!
//! This crate contains shared types used across the BOSH server:
//! - Entity IDs ([`Rid`], [`Sid`], [`StreamId`], [`StreamName`])
//! - The `<body/>` wrapper element ([`BodyElement`])
//! - Inbound requests ([`BodyRequest`])
//! - Termination reasons ([`TerminateCondition`])
//! - Protocol namespace constants ([`BOSH_XMLNS`], [`XBOSH_XMLNS`])
//!
//! Payload stanzas carried inside a `<body/>` wrapper are opaque to this
//! layer and represented as [`bytes::Bytes`]; parsing them is the
//! XMPP-facing layer's concern.

mod body;
mod ids;
mod request;

pub use body::{BodyElement, TerminateCondition};
pub use ids::{Rid, Sid, StreamId, StreamName};
pub use request::BodyRequest;

/// XML namespace of the BOSH `<body/>` wrapper element.
pub const BOSH_XMLNS: &str = "http://jabber.org/protocol/httpbind";

/// XML namespace of the XMPP-over-BOSH extension (XEP-0206).
pub const XBOSH_XMLNS: &str = "urn:xmpp:xbosh";
