//! The `<body/>` wrapper element and termination conditions.

use std::collections::BTreeMap;
use std::fmt::Display;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{BOSH_XMLNS, Rid};

// ============================================================================
// TerminateCondition
// ============================================================================

/// Reason carried in a terminate stanza's `condition` attribute.
///
/// The server itself only ever generates `ItemNotFound` and `PolicyViolation`;
/// `Other` carries conditions passed through from client terminate requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminateCondition {
    /// The request referenced a session, RID, or stream the server does not
    /// know about.
    ItemNotFound,
    /// The client exceeded a negotiated or configured resource bound.
    PolicyViolation,
    /// Any other condition string, preserved verbatim.
    Other(String),
}

impl TerminateCondition {
    /// Parses a condition from its wire form.
    pub fn from_attr(value: &str) -> Self {
        match value {
            "item-not-found" => Self::ItemNotFound,
            "policy-violation" => Self::PolicyViolation,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire form of this condition.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ItemNotFound => "item-not-found",
            Self::PolicyViolation => "policy-violation",
            Self::Other(value) => value,
        }
    }
}

impl Display for TerminateCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// BodyElement
// ============================================================================

/// An outgoing `<body/>` wrapper: attributes plus opaque payload stanzas.
///
/// This is a pure data constructor; serialization to the wire is the
/// transport's concern. Attribute order is canonical (sorted), which makes
/// wrapper equality — the merge criterion for queued responses — a plain
/// map comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyElement {
    attrs: BTreeMap<String, String>,
    children: Vec<Bytes>,
}

impl BodyElement {
    /// An empty `<body/>` carrying only the BOSH namespace.
    ///
    /// Used as the placeholder response for expired waits, released extra
    /// connections, and drained slots at termination.
    pub fn empty() -> Self {
        let mut attrs = BTreeMap::new();
        attrs.insert("xmlns".to_string(), BOSH_XMLNS.to_string());
        Self {
            attrs,
            children: Vec::new(),
        }
    }

    /// A terminate stanza, optionally carrying a condition.
    pub fn terminate(condition: Option<&TerminateCondition>) -> Self {
        let mut body = Self::empty();
        body.set_attr("type", "terminate");
        if let Some(condition) = condition {
            body.set_attr("condition", condition.as_str());
        }
        body
    }

    /// Sets (or replaces) an attribute.
    pub fn set_attr(&mut self, name: &str, value: impl Display) {
        self.attrs.insert(name.to_string(), value.to_string());
    }

    /// Builder form of [`set_attr`](Self::set_attr).
    pub fn with_attr(mut self, name: &str, value: impl Display) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Looks up an attribute value.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Stamps the acknowledgement attribute onto this wrapper.
    pub fn set_ack(&mut self, rid: Rid) {
        self.set_attr("ack", rid);
    }

    /// Appends a payload stanza.
    pub fn push_child(&mut self, child: Bytes) {
        self.children.push(child);
    }

    /// The payload stanzas carried by this wrapper, in send order.
    pub fn children(&self) -> &[Bytes] {
        &self.children
    }

    /// True when this wrapper is a terminate stanza.
    pub fn is_terminate(&self) -> bool {
        self.attr("type") == Some("terminate")
    }

    /// True when two responses share a structurally identical wrapper and may
    /// therefore be merged into one.
    pub fn same_wrapper(&self, other: &Self) -> bool {
        self.attrs == other.attrs
    }

    /// Merges another response into this one by appending its payload,
    /// preserving the order children were produced in.
    ///
    /// Callers must have established [`same_wrapper`](Self::same_wrapper).
    pub fn merge(&mut self, other: Self) {
        self.children.extend(other.children);
    }
}

// ============================================================================
// Tests
// ============================================================================
