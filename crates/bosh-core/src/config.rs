//! Server-side configuration for the BOSH session layer.

use serde::{Deserialize, Serialize};

/// Hard cap on the number of attributes accepted on a `<body/>` wrapper.
///
/// An anti-abuse bound: a request carrying this many attributes or more is
/// rejected as invalid before any session state changes.
pub const BODY_ATTR_LIMIT: usize = 21;

/// Grace added to the negotiated inactivity timeout before a session is
/// reaped, so a client polling right at the limit is not cut off.
pub const INACTIVITY_GRACE_SECS: u64 = 10;

/// Multiplier on the RID window bounding the unacked-response backlog. A
/// client that lets more than `window * ACK_BACKLOG_FACTOR` responses go
/// unacknowledged has its ack sub-protocol disabled.
pub const ACK_BACKLOG_FACTOR: u64 = 4;

/// Tunable limits for sessions and their negotiated parameters.
///
/// Embedders typically deserialize this from their own configuration file;
/// every clamping rule applied to client-requested values lives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoshConfig {
    /// Hard per-session cap on concurrently held connections. The negotiated
    /// `hold` is clamped to this, and a client holding strictly more than
    /// this many connections commits a policy violation.
    pub max_held_connections: usize,

    /// Cap on logical streams multiplexed within one session.
    pub max_streams_per_session: usize,

    /// Tolerated RID distance on either side of the last processed request.
    pub window: u64,

    /// Inactivity timeout used when the client does not request one, seconds.
    pub default_inactivity_secs: u64,

    /// Lower bound on the negotiated inactivity timeout, seconds.
    pub min_inactivity_secs: u64,

    /// Upper bound on the negotiated inactivity timeout, seconds.
    pub max_inactivity_secs: u64,
}

impl Default for BoshConfig {
    fn default() -> Self {
        Self {
            max_held_connections: 2,
            max_streams_per_session: 8,
            window: 2,
            default_inactivity_secs: 70,
            min_inactivity_secs: 10,
            max_inactivity_secs: 3600,
        }
    }
}

impl BoshConfig {
    /// Configuration for testing (small limits, permissive inactivity).
    pub fn testing() -> Self {
        Self {
            max_held_connections: 2,
            max_streams_per_session: 2,
            window: 2,
            default_inactivity_secs: 60,
            min_inactivity_secs: 1,
            max_inactivity_secs: 120,
        }
    }

    /// Negotiates the inactivity timeout: the client's request clamped
    /// between the configured bounds, or the default when absent (a zero
    /// request reads as absent).
    pub fn clamp_inactivity(&self, requested: Option<u64>) -> u64 {
        requested
            .filter(|secs| *secs > 0)
            .map_or(self.default_inactivity_secs, |secs| {
                secs.clamp(self.min_inactivity_secs, self.max_inactivity_secs)
            })
    }

    /// Negotiates the long-poll timeout: a missing, zero, or
    /// longer-than-inactivity `wait` falls back to 80% of the inactivity
    /// timeout.
    pub fn clamp_wait(&self, requested: Option<u64>, inactivity_secs: u64) -> u64 {
        let wait = requested.unwrap_or(0);
        if wait == 0 || wait > inactivity_secs {
            inactivity_secs * 8 / 10
        } else {
            wait
        }
    }

    /// Negotiates `hold`: at least one, at most the per-session connection
    /// cap.
    pub fn clamp_hold(&self, requested: Option<u64>) -> usize {
        let hold = requested.unwrap_or(1).max(1) as usize;
        hold.min(self.max_held_connections)
    }

    /// Size at which the unacked-response backlog marks the client as
    /// non-compliant.
    pub fn ack_backlog_limit(&self) -> usize {
        self.window.saturating_mul(ACK_BACKLOG_FACTOR) as usize
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(None, 70; "absent takes default")]
    #[test_case(Some(0), 70; "zero takes default")]
    #[test_case(Some(5), 10; "below minimum is raised")]
    #[test_case(Some(120), 120; "in range passes through")]
    #[test_case(Some(9000), 3600; "above maximum is lowered")]
    fn inactivity_clamping(requested: Option<u64>, expected: u64) {
        assert_eq!(BoshConfig::default().clamp_inactivity(requested), expected);
    }

    #[test_case(None, 60, 48; "absent wait falls back")]
    #[test_case(Some(0), 60, 48; "zero wait falls back")]
    #[test_case(Some(61), 60, 48; "wait above inactivity falls back")]
    #[test_case(Some(30), 60, 30; "sane wait passes through")]
    fn wait_clamping(requested: Option<u64>, inactivity: u64, expected: u64) {
        assert_eq!(BoshConfig::default().clamp_wait(requested, inactivity), expected);
    }

    #[test_case(None, 1; "absent hold is one")]
    #[test_case(Some(0), 1; "zero hold is one")]
    #[test_case(Some(1), 1; "one passes through")]
    #[test_case(Some(9), 2; "hold is capped")]
    fn hold_clamping(requested: Option<u64>, expected: usize) {
        assert_eq!(BoshConfig::default().clamp_hold(requested), expected);
    }

    #[test]
    fn ack_backlog_scales_with_window() {
        let config = BoshConfig { window: 3, ..BoshConfig::default() };
        assert_eq!(config.ack_backlog_limit(), 12);
    }
}
