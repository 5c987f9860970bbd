//! Entity identifiers for the BOSH session layer.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Rid
// ============================================================================

/// A client-assigned request identifier.
///
/// Every HTTP request within a session carries a RID, and the client must
/// increment it by exactly one per request. The server processes requests in
/// strict RID order, buffering any that arrive early.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Rid(u64);

impl Rid {
    /// Creates a RID from its wire value.
    pub fn new(rid: u64) -> Self {
        Self(rid)
    }

    /// The RID one past this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// The RID one before this one (saturating at zero).
    pub fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// This RID advanced by `n` (saturating).
    ///
    /// Used for window arithmetic, where comparisons are phrased additively
    /// to avoid unsigned underflow.
    pub fn advanced_by(self, n: u64) -> Self {
        Self(self.0.saturating_add(n))
    }
}

impl Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Rid {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Rid> for u64 {
    fn from(rid: Rid) -> Self {
        rid.0
    }
}

// ============================================================================
// Sid
// ============================================================================

/// A server-assigned session identifier.
///
/// Generated once at session creation, immutable for the session's lifetime,
/// and the primary key in the session registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sid(Uuid);

impl Sid {
    /// Generates a fresh random session identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a SID from its wire form.
    ///
    /// Returns `None` for anything that is not a well-formed UUID; callers
    /// treat such requests as referencing no session at all.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Display for Sid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// StreamId / StreamName
// ============================================================================

/// Identifier for a logical XMPP stream multiplexed within a session.
///
/// Assigned by the stream registry collaborator; the session layer only keeps
/// non-owning back-references.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct StreamId(u64);

impl StreamId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

impl From<u64> for StreamId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<StreamId> for u64 {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

/// Wire name of a stream, as carried in the `stream` attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
