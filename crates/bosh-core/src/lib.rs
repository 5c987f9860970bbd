//! # bosh-core: BOSH session state machine and registry
//!
//! This crate implements the server side of BOSH (XMPP over HTTP
//! long-polling, XEP-0124/0206): per-session RID windowing and reordering,
//! held-connection management, outgoing-response queuing and merging, the
//! optional acknowledgement sub-protocol, inactivity lifecycle, and
//! stream-termination cascades.
//!
//! ## Architecture
//!
//! The core performs no I/O and owns no threads. A driver feeds it requests
//! and advances time; collaborators are object-safe traits.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          bosh-core                           │
//! │  ┌────────────────┐    ┌──────────┐     ┌────────────────┐   │
//! │  │ SessionRegistry│ →  │ Session  │  →  │ held slots /   │   │
//! │  │ (sid map,      │    │ (rid     │     │ pending queue  │   │
//! │  │  timers, flush)│    │  machine)│     │ (long-polls)   │   │
//! │  └────────────────┘    └──────────┘     └────────────────┘   │
//! │          ↑ requests / tick        ↓ events / sends           │
//! └──────────┼────────────────────────┼──────────────────────────┘
//!    HTTP front end          StreamRegistry / EventSink /
//!    (out of crate)          ResponseHandle (out of crate)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use bosh_core::{BoshConfig, SessionRegistry};
//!
//! let mut registry = SessionRegistry::new(BoshConfig::default());
//! // per inbound HTTP request:
//! registry.handle_request(request, handle, &mut streams, &mut sink, now)?;
//! // once per scheduling turn (and whenever next_deadline() elapses):
//! registry.tick(now, &mut streams, &mut sink);
//! ```
//!
//! The driver serializes all calls; sessions are never touched concurrently.

pub mod config;
mod error;
pub mod events;
mod held;
mod registry;
mod session;
pub mod stream;
pub mod timer;
mod transport;

pub use config::{ACK_BACKLOG_FACTOR, BODY_ATTR_LIMIT, BoshConfig, INACTIVITY_GRACE_SECS};
pub use error::{CoreError, CoreResult};
pub use events::{EventSink, NullSink};
pub use held::{HeldConnection, HeldQueue, PendingResponse, UnackedResponse};
pub use registry::{RequestOutcome, SessionRegistry};
pub use session::{Session, SessionCx};
pub use stream::{StreamInfo, StreamRegistry};
pub use timer::{TimerId, TimerKind, TimerWheel};
pub use transport::{ResponseHandle, TransportError};
