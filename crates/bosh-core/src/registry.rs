//! Session registry: creation, lookup, timer delivery, and reaping.
//!
//! The registry is the single owner of everything shared across sessions —
//! the SID map, the timer wheel, the deferred-flush task queue, the
//! termination-condition cache, and the session counters. The embedding
//! driver feeds it inbound requests via [`SessionRegistry::handle_request`]
//! and advances time via [`SessionRegistry::tick`]; nothing in here runs off
//! a callback.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use bosh_types::{BodyElement, BodyRequest, Sid, StreamId, TerminateCondition};

use crate::config::BoshConfig;
use crate::error::{CoreError, CoreResult};
use crate::events::EventSink;
use crate::session::{Session, SessionCx};
use crate::stream::StreamRegistry;
use crate::timer::{TimerKind, TimerWheel};
use crate::transport::ResponseHandle;

/// What became of an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new session was created.
    Created(Sid),
    /// The request was admitted against a live session.
    Admitted(Sid),
    /// The request was admitted and its processing terminated the session
    /// (client terminate, policy violation, or a terminate conversion).
    Terminated(Sid),
    /// The request failed validation and tore its session down.
    Invalid(Sid),
    /// The request referenced no live session and was answered with a
    /// terminate stanza.
    SessionGone,
}

/// Cached outcome of a dead session, kept briefly so stray late requests get
/// a specific rejection instead of a generic one.
#[derive(Debug, Clone)]
struct CachedTermination {
    condition: Option<TerminateCondition>,
    expires_at: Instant,
}

/// Creates, looks up, and destroys sessions by SID.
pub struct SessionRegistry {
    config: BoshConfig,
    sessions: HashMap<Sid, Session>,
    terminated: HashMap<Sid, CachedTermination>,
    timers: TimerWheel,
    flush_queue: VecDeque<Sid>,
    /// Live session count. Drops on reap.
    active: usize,
    /// Sessions ever created. Never decremented.
    total: u64,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(config: BoshConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            terminated: HashMap::new(),
            timers: TimerWheel::new(),
            flush_queue: VecDeque::new(),
            active: 0,
            total: 0,
        }
    }

    pub fn config(&self) -> &BoshConfig {
        &self.config
    }

    /// Number of live sessions.
    pub fn active_sessions(&self) -> usize {
        self.active
    }

    /// Number of sessions ever created.
    pub fn total_sessions(&self) -> u64 {
        self.total
    }

    /// Returns the live session for `sid`, if any.
    pub fn lookup(&self, sid: Sid) -> Option<&Session> {
        self.sessions.get(&sid)
    }

    /// Cached termination condition for a dead session, while unexpired.
    /// `Some(None)` means the session closed without naming a condition.
    pub fn cached_condition(&self, sid: Sid, now: Instant) -> Option<Option<TerminateCondition>> {
        self.terminated
            .get(&sid)
            .filter(|cached| cached.expires_at > now)
            .map(|cached| cached.condition.clone())
    }

    /// True iff `request` asks for a new session: no SID, but `to`, `wait`,
    /// `hold`, and the XMPP-over-BOSH namespace declaration.
    pub fn is_session_creation_request(&self, request: &BodyRequest) -> bool {
        request.sid().is_none()
            && request.to().is_some()
            && request.wait().is_some()
            && request.hold().is_some()
            && request.declares_xbosh()
    }

    /// Single entry point for inbound requests: branches creation vs.
    /// existing-session handling, answers requests for dead sessions, and
    /// reaps sessions that close during admission.
    pub fn handle_request(
        &mut self,
        request: BodyRequest,
        handle: Box<dyn ResponseHandle>,
        streams: &mut dyn StreamRegistry,
        sink: &mut dyn EventSink,
        now: Instant,
    ) -> CoreResult<RequestOutcome> {
        if self.is_session_creation_request(&request) {
            let sid = self.create(request, handle, streams, sink, now)?;
            return Ok(RequestOutcome::Created(sid));
        }

        let Some(sid) = request.sid() else {
            self.reject_dead_session(None, handle, now);
            return Ok(RequestOutcome::SessionGone);
        };
        if !self.sessions.contains_key(&sid) {
            self.reject_dead_session(Some(sid), handle, now);
            return Ok(RequestOutcome::SessionGone);
        }

        let mut valid = false;
        {
            let mut cx = SessionCx {
                config: &self.config,
                streams,
                sink,
                timers: &mut self.timers,
                flush_queue: &mut self.flush_queue,
                now,
            };
            if let Some(session) = self.sessions.get_mut(&sid) {
                if session.is_valid_packet(&request) {
                    valid = true;
                    session.reset_inactivity_timer(&mut cx);
                    session.admit(request, handle, &mut cx);
                } else {
                    session.reject_invalid_packet(&request, handle, &mut cx);
                }
            }
        }

        let reaped = self.reap(sid, now);
        Ok(match (valid, reaped) {
            (false, _) => RequestOutcome::Invalid(sid),
            (true, true) => RequestOutcome::Terminated(sid),
            (true, false) => RequestOutcome::Admitted(sid),
        })
    }

    /// Creates a session from a creation request: arms its inactivity timer,
    /// holds the initiating connection, processes the request, and enqueues
    /// the creation response.
    pub fn create(
        &mut self,
        request: BodyRequest,
        handle: Box<dyn ResponseHandle>,
        streams: &mut dyn StreamRegistry,
        sink: &mut dyn EventSink,
        now: Instant,
    ) -> CoreResult<Sid> {
        if !self.is_session_creation_request(&request) {
            return Err(CoreError::NotACreationRequest);
        }
        let session = Session::new(&request, &self.config)?;
        let sid = session.sid();
        info!(
            sid = %sid,
            wait = session.wait(),
            hold = session.hold(),
            inactivity = session.inactivity(),
            ack = session.ack_enabled(),
            "session created"
        );
        self.sessions.insert(sid, session);
        self.active += 1;
        self.total += 1;

        let mut cx = SessionCx {
            config: &self.config,
            streams,
            sink,
            timers: &mut self.timers,
            flush_queue: &mut self.flush_queue,
            now,
        };
        if let Some(session) = self.sessions.get_mut(&sid) {
            session.reset_inactivity_timer(&mut cx);
            session.admit(request, handle, &mut cx);
            session.send_creation_response(&mut cx);
        }

        self.reap(sid, now);
        Ok(sid)
    }

    /// Queues an outgoing response for `sid` — the XMPP-facing layer's send
    /// path. Returns false when the session is unknown.
    pub fn enqueue_response(
        &mut self,
        sid: Sid,
        body: BodyElement,
        stream: Option<StreamId>,
        streams: &mut dyn StreamRegistry,
        sink: &mut dyn EventSink,
        now: Instant,
    ) -> bool {
        let mut cx = SessionCx {
            config: &self.config,
            streams,
            sink,
            timers: &mut self.timers,
            flush_queue: &mut self.flush_queue,
            now,
        };
        match self.sessions.get_mut(&sid) {
            Some(session) => {
                session.enqueue_response(body, stream, &mut cx);
                true
            }
            None => false,
        }
    }

    /// Terminates a session from the server side (e.g. the XMPP backend went
    /// away), draining its held connections and caching the condition.
    pub fn terminate_session(
        &mut self,
        sid: Sid,
        condition: Option<TerminateCondition>,
        streams: &mut dyn StreamRegistry,
        sink: &mut dyn EventSink,
        now: Instant,
    ) -> bool {
        if !self.sessions.contains_key(&sid) {
            return false;
        }
        {
            let mut cx = SessionCx {
                config: &self.config,
                streams,
                sink,
                timers: &mut self.timers,
                flush_queue: &mut self.flush_queue,
                now,
            };
            if let Some(session) = self.sessions.get_mut(&sid) {
                session.handle_stream_terminate(None, &[], condition, &mut cx);
            }
        }
        self.reap(sid, now);
        true
    }

    /// One scheduling turn: fire due timers (validated against current
    /// membership), run deferred flush passes, and expire cached termination
    /// conditions.
    pub fn tick(&mut self, now: Instant, streams: &mut dyn StreamRegistry, sink: &mut dyn EventSink) {
        while let Some((timer, kind)) = self.timers.pop_due(now) {
            match kind {
                TimerKind::Inactivity { sid } => {
                    {
                        let mut cx = SessionCx {
                            config: &self.config,
                            streams: &mut *streams,
                            sink: &mut *sink,
                            timers: &mut self.timers,
                            flush_queue: &mut self.flush_queue,
                            now,
                        };
                        let Some(session) = self.sessions.get_mut(&sid) else {
                            // Session died between arming and firing.
                            continue;
                        };
                        if session.inactivity_timer_id() != Some(timer) {
                            // A newer timer superseded this one.
                            continue;
                        }
                        session.on_inactivity_timeout(&mut cx);
                    }
                    self.reap(sid, now);
                }
                TimerKind::Wait { sid, rid } => {
                    let mut cx = SessionCx {
                        config: &self.config,
                        streams: &mut *streams,
                        sink: &mut *sink,
                        timers: &mut self.timers,
                        flush_queue: &mut self.flush_queue,
                        now,
                    };
                    if let Some(session) = self.sessions.get_mut(&sid) {
                        session.on_wait_timeout(rid, &mut cx);
                    }
                }
            }
        }

        self.run_flush_queue(streams, sink, now);
        self.terminated.retain(|_, cached| cached.expires_at > now);
    }

    /// Earliest timer deadline, for sizing a poll timeout.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    fn run_flush_queue(
        &mut self,
        streams: &mut dyn StreamRegistry,
        sink: &mut dyn EventSink,
        now: Instant,
    ) {
        while let Some(sid) = self.flush_queue.pop_front() {
            let mut cx = SessionCx {
                config: &self.config,
                streams: &mut *streams,
                sink: &mut *sink,
                timers: &mut self.timers,
                flush_queue: &mut self.flush_queue,
                now,
            };
            if let Some(session) = self.sessions.get_mut(&sid) {
                session.flush_turn(&mut cx);
            }
        }
    }

    /// Answers a request for an unknown or dead session with a terminate
    /// stanza carrying the cached condition when one is still retained.
    fn reject_dead_session(&mut self, sid: Option<Sid>, mut handle: Box<dyn ResponseHandle>, now: Instant) {
        let cached = sid
            .and_then(|sid| self.terminated.get(&sid))
            .filter(|cached| cached.expires_at > now);
        let body = match cached {
            Some(cached) => {
                let condition = cached
                    .condition
                    .clone()
                    .unwrap_or(TerminateCondition::ItemNotFound);
                BodyElement::terminate(Some(&condition))
            }
            None => BodyElement::terminate(Some(&TerminateCondition::ItemNotFound))
                .with_attr("message", "Invalid session ID"),
        };
        debug!(sid = ?sid.map(|sid| sid.to_string()), "rejecting request for dead session");
        if let Err(err) = handle.send(&body) {
            debug!(%err, "failed to answer dead-session request");
        }
    }

    /// Removes a closed session, caching its termination condition for a
    /// window proportional to its negotiated wait. Returns true when a
    /// session was actually reaped.
    fn reap(&mut self, sid: Sid, now: Instant) -> bool {
        let Some(condition) = self.sessions.get(&sid).and_then(Session::termination) else {
            return false;
        };
        let Some(session) = self.sessions.remove(&sid) else {
            return false;
        };
        self.active = self.active.saturating_sub(1);
        self.terminated.insert(
            sid,
            CachedTermination {
                condition: condition.clone(),
                expires_at: now + Duration::from_secs(session.wait()),
            },
        );
        info!(
            sid = %sid,
            condition = ?condition.as_ref().map(TerminateCondition::as_str),
            active = self.active,
            "session terminated"
        );
        true
    }
}
