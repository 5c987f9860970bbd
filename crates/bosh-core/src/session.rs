//! The per-client BOSH session state machine.
//!
//! A session multiplexes one or more logical XMPP streams over a bounded set
//! of concurrently held HTTP request/response pairs. The client numbers its
//! requests with monotonically increasing RIDs; the session buffers whatever
//! arrives early, processes strictly in order, and keeps enough sent-response
//! state to survive broken connections when the ack sub-protocol is on.
//!
//! Everything here is driven from the registry's scheduling turn — requests,
//! timer deliveries, and deferred flush passes never run concurrently for one
//! session, and nothing blocks.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, warn};

use bosh_types::{
    BodyElement, BodyRequest, Rid, Sid, StreamId, TerminateCondition, XBOSH_XMLNS,
};

use crate::config::{ACK_BACKLOG_FACTOR, BODY_ATTR_LIMIT, BoshConfig, INACTIVITY_GRACE_SECS};
use crate::error::CoreError;
use crate::events::EventSink;
use crate::held::{HeldConnection, HeldQueue, PendingResponse, UnackedResponse};
use crate::stream::StreamRegistry;
use crate::timer::{TimerId, TimerKind, TimerWheel};
use crate::transport::ResponseHandle;

/// Collaborators and scheduling state threaded through every session
/// operation.
///
/// The registry assembles one per entry point from its own fields; sessions
/// never store references to their collaborators.
pub struct SessionCx<'a> {
    /// Server-wide limits, read-only.
    pub config: &'a BoshConfig,
    /// The XMPP-facing layer's stream registry.
    pub streams: &'a mut dyn StreamRegistry,
    /// Lifecycle and delivery event sink.
    pub sink: &'a mut dyn EventSink,
    /// The registry's timer wheel.
    pub timers: &'a mut TimerWheel,
    /// The registry's deferred-flush task queue; a session pushes its own SID
    /// at most once per turn.
    pub flush_queue: &'a mut VecDeque<Sid>,
    /// The current scheduling turn's notion of now.
    pub now: Instant,
}

/// Outcome of ack bookkeeping for the request being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckOutcome {
    /// Dispatch proceeds normally.
    Continue,
    /// Broken-connection recovery already answered the current connection;
    /// skip dispatch entirely.
    Handled,
}

/// Outcome of registering a held connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotOutcome {
    Added,
    /// The connection cap was exceeded and the session torn down.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    Live,
    Closed(Option<TerminateCondition>),
}

/// One BOSH session: RID tracking, held connections, response queues, ack
/// bookkeeping, and the stream back-references.
pub struct Session {
    sid: Sid,
    /// Highest RID fully processed. Advances by exactly one per request.
    rid: Rid,
    window: u64,
    wait: u64,
    hold: usize,
    inactivity: u64,
    content: String,
    route: Option<String>,
    ua: Option<String>,
    ver: Option<String>,
    ack: bool,
    /// Highest RID a response has been dispatched for.
    max_rid_sent: Rid,
    streams: Vec<StreamId>,
    held: HeldQueue,
    pending: VecDeque<PendingResponse>,
    unacked: BTreeMap<Rid, UnackedResponse>,
    queued: BTreeMap<Rid, BodyRequest>,
    inactivity_timer: Option<TimerId>,
    flush_scheduled: bool,
    state: SessionState,
}

impl Session {
    /// Builds a session from a creation request, negotiating every parameter
    /// against the server configuration.
    pub(crate) fn new(request: &BodyRequest, config: &BoshConfig) -> Result<Self, CoreError> {
        let Some(client_rid) = request.rid() else {
            return Err(CoreError::MissingRid);
        };
        let inactivity = config.clamp_inactivity(request.inactivity());
        let wait = config.clamp_wait(request.wait(), inactivity);
        let hold = config.clamp_hold(request.hold());
        // The creation request itself is processed through the normal loop,
        // so the processed-RID marker starts one behind it.
        let rid = client_rid.prev();

        Ok(Self {
            sid: Sid::generate(),
            rid,
            window: config.window,
            wait,
            hold,
            inactivity,
            content: request
                .content()
                .unwrap_or("text/xml; charset=utf-8")
                .to_string(),
            route: request.route().map(str::to_string),
            ua: request.ua().map(str::to_string),
            ver: request.ver().map(str::to_string),
            ack: request.requests_ack(),
            max_rid_sent: rid,
            streams: Vec::new(),
            held: HeldQueue::new(),
            pending: VecDeque::new(),
            unacked: BTreeMap::new(),
            queued: BTreeMap::new(),
            inactivity_timer: None,
            flush_scheduled: false,
            state: SessionState::Live,
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn sid(&self) -> Sid {
        self.sid
    }

    /// Highest RID fully processed.
    pub fn rid(&self) -> Rid {
        self.rid
    }

    /// Negotiated long-poll timeout, seconds.
    pub fn wait(&self) -> u64 {
        self.wait
    }

    /// Negotiated concurrently-held connection count.
    pub fn hold(&self) -> usize {
        self.hold
    }

    /// Negotiated inactivity timeout, seconds.
    pub fn inactivity(&self) -> u64 {
        self.inactivity
    }

    /// Whether the ack sub-protocol is active.
    pub fn ack_enabled(&self) -> bool {
        self.ack
    }

    /// The `route` extension attribute from the creation request, if any.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// The `ua` extension attribute from the creation request, if any.
    pub fn ua(&self) -> Option<&str> {
        self.ua.as_deref()
    }

    /// Streams currently multiplexed over this session.
    pub fn stream_ids(&self) -> &[StreamId] {
        &self.streams
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self.state, SessionState::Live)
    }

    /// The termination condition, once closed. `Some(None)` means the session
    /// closed without a condition.
    pub(crate) fn termination(&self) -> Option<Option<TerminateCondition>> {
        match &self.state {
            SessionState::Live => None,
            SessionState::Closed(condition) => Some(condition.clone()),
        }
    }

    pub(crate) fn inactivity_timer_id(&self) -> Option<TimerId> {
        self.inactivity_timer
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Checks a packet against this session's state: it must carry a SID and
    /// a RID, the RID must lie within the tolerated window on either side of
    /// the last processed one, and the attribute count must stay under the
    /// anti-abuse cap.
    pub fn is_valid_packet(&self, request: &BodyRequest) -> bool {
        let Some(rid) = request.rid() else {
            return false;
        };
        request.sid().is_some()
            && rid.advanced_by(self.window) >= self.rid
            && rid <= self.rid.advanced_by(self.window)
            && request.attr_count() < BODY_ATTR_LIMIT
    }

    /// Admits a validated request: parks it in RID order, holds its
    /// connection, and runs the ordered processing loop.
    pub(crate) fn admit(
        &mut self,
        request: BodyRequest,
        handle: Box<dyn ResponseHandle>,
        cx: &mut SessionCx<'_>,
    ) {
        let Some(rid) = request.rid() else {
            // Validated upstream; creation requests are checked in new().
            return;
        };
        self.queued.insert(rid, request);
        if self.add_held_connection(rid, handle, cx) == SlotOutcome::Rejected {
            return;
        }
        self.schedule_flush(cx);
        self.process_requests(cx);
    }

    /// Drains buffered requests in ascending RID order, processing only the
    /// exact successor of the last processed RID — never skipping.
    pub(crate) fn process_requests(&mut self, cx: &mut SessionCx<'_>) {
        loop {
            if self.is_closed() {
                return;
            }
            let next = self.rid.next();
            let Some(mut request) = self.queued.remove(&next) else {
                break;
            };
            self.rid = next;
            debug!(sid = %self.sid, rid = %self.rid, "processing request");
            if self.ack_bookkeeping(&mut request, cx) == AckOutcome::Handled {
                continue;
            }
            self.dispatch(request, cx);
        }
    }

    /// Rejects a malformed or out-of-window request: the session is torn down
    /// with `item-not-found` and the offending connection answered directly.
    pub(crate) fn reject_invalid_packet(
        &mut self,
        request: &BodyRequest,
        mut handle: Box<dyn ResponseHandle>,
        cx: &mut SessionCx<'_>,
    ) {
        warn!(sid = %self.sid, rid = ?request.rid(), "invalid packet");
        self.handle_stream_terminate(None, &[], Some(TerminateCondition::ItemNotFound), cx);

        let mut body = BodyElement::terminate(Some(&TerminateCondition::ItemNotFound));
        body.set_attr("message", "Invalid packet");
        if let Some(stream) = request.stream() {
            body.set_attr("stream", stream);
        }
        if let Err(err) = handle.send(&body) {
            debug!(sid = %self.sid, %err, "failed to answer invalid packet");
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Dispatches one accepted, in-order request. Its connection is already
    /// held as the slot for `self.rid`.
    fn dispatch(&mut self, mut request: BodyRequest, cx: &mut SessionCx<'_>) {
        // Resolve the target stream first. An unknown stream name aborts
        // dispatch, but the RID advance stands: earlier requests stay
        // implicitly acknowledged even on stream-name errors.
        let mut stream = None;
        if let Some(name) = cx.streams.name_in(&request) {
            match cx.streams.by_name(&name) {
                Some(id) => stream = Some(id),
                None => {
                    warn!(sid = %self.sid, stream = %name, "request for unknown stream");
                    let body = cx.streams.invalid_stream_terminate(&name);
                    if let Some(mut slot) = self.take_slot(self.rid, cx.timers) {
                        if let Err(err) = slot.handle.send(&body) {
                            debug!(sid = %self.sid, %err, "failed to answer unknown-stream request");
                        }
                    }
                    return;
                }
            }
        }
        if stream.is_none() {
            // A request may omit the stream name when only one exists.
            stream = self.only_stream();
        }

        let mut nodes = request.take_children();

        if cx.streams.is_restart(&request) {
            debug!(sid = %self.sid, "stream restart");
            match stream {
                // No stream left to restart: treat as a session terminate.
                None => request.make_terminate(None),
                Some(id) => cx.streams.restart(id, &request),
            }
            // Restart payloads are ignored by protocol.
            nodes.clear();
        } else if cx.streams.is_stream_add(&request) {
            if self.streams.len() >= cx.config.max_streams_per_session {
                warn!(sid = %self.sid, streams = self.streams.len(), "stream cap reached");
                request.make_terminate(Some(TerminateCondition::PolicyViolation));
            } else {
                let id = cx.streams.add(self.sid, &request);
                debug!(sid = %self.sid, stream = %id, "stream added");
                self.streams.push(id);
                stream = Some(id);
            }
        }

        if cx.streams.is_terminate(&request) {
            let condition = request.condition();
            self.handle_stream_terminate(stream, &nodes, condition, cx);
            // Nothing is delivered after a terminate signal; the enclosed
            // payload already went out with the stream teardown.
            nodes.clear();
        }

        if !nodes.is_empty() {
            self.emit_nodes(&nodes, stream, cx);
        }
    }

    /// When the session has exactly one stream, requests may omit the stream
    /// name and mean that one.
    fn only_stream(&self) -> Option<StreamId> {
        if self.streams.len() == 1 {
            self.streams.first().copied()
        } else {
            None
        }
    }

    /// Raises the delivery event, broadcast to every stream when no specific
    /// stream was resolved.
    fn emit_nodes(&self, nodes: &[Bytes], stream: Option<StreamId>, cx: &mut SessionCx<'_>) {
        match stream {
            Some(id) => cx.sink.on_nodes(self.sid, id, nodes),
            None => {
                for id in &self.streams {
                    cx.sink.on_nodes(self.sid, *id, nodes);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Acknowledgements
    // ------------------------------------------------------------------

    /// Runs the ack sub-protocol for the request being processed: backlog
    /// degradation, pruning, loss reporting, and broken-connection recovery.
    fn ack_bookkeeping(&mut self, request: &mut BodyRequest, cx: &mut SessionCx<'_>) -> AckOutcome {
        if !self.ack {
            return AckOutcome::Continue;
        }

        if self.unacked.len() > self.window.saturating_mul(ACK_BACKLOG_FACTOR) as usize {
            // The client never acks; degrade gracefully instead of failing.
            warn!(
                sid = %self.sid,
                backlog = self.unacked.len(),
                "client is not acknowledging responses; disabling acks"
            );
            self.ack = false;
            self.unacked.clear();
            return AckOutcome::Continue;
        }

        // A missing ack value means everything before this request was seen.
        let ack = request.ack().unwrap_or_else(|| self.rid.prev());

        let acked: Vec<Rid> = self.unacked.range(..=ack).map(|(rid, _)| *rid).collect();
        for rid in acked {
            self.unacked.remove(&rid);
            cx.sink.on_response_acknowledged(self.sid, rid);
        }

        if ack < self.max_rid_sent
            && let Some(missed) = self.unacked.get(&ack)
        {
            // The client is behind what we sent: warn it that a response may
            // have been lost, without discarding anything.
            let elapsed = cx.now.duration_since(missed.sent_at).as_millis();
            let report = BodyElement::empty()
                .with_attr("report", ack.next())
                .with_attr("time", elapsed);
            match self.streams.first().copied() {
                Some(stream) => self.pending.push_back(PendingResponse {
                    body: report,
                    stream: Some(stream),
                }),
                None => error!(sid = %self.sid, "no live stream to carry a loss report"),
            }
        }

        self.recover_broken_connections(request, cx)
    }

    /// Answers superseded buffered requests — client retransmissions after a
    /// broken connection — on the current connection.
    fn recover_broken_connections(
        &mut self,
        request: &mut BodyRequest,
        cx: &mut SessionCx<'_>,
    ) -> AckOutcome {
        let superseded: Vec<Rid> = self.queued.range(..=self.rid).map(|(rid, _)| *rid).collect();
        if superseded.is_empty() {
            return AckOutcome::Continue;
        }

        // The request being processed still owns a held slot; redelivery
        // consumes it lazily so the terminate-only path leaves it held.
        let mut current: Option<HeldConnection> = None;
        let mut outcome = AckOutcome::Continue;
        for rid in superseded {
            self.queued.remove(&rid);
            if let Some(body) = self.unacked.get(&rid).map(|unacked| unacked.body.clone()) {
                debug!(sid = %self.sid, rid = %rid, "re-sending unacknowledged response");
                self.direct_send(&mut current, &body, cx);
                outcome = AckOutcome::Handled;
            } else if rid.advanced_by(self.window.saturating_add(2)) >= self.rid {
                // Nothing was sent for this RID the first time around.
                debug!(sid = %self.sid, rid = %rid, "answering retransmission with an empty body");
                self.direct_send(&mut current, &BodyElement::empty(), cx);
                outcome = AckOutcome::Handled;
            } else {
                // Upstream RID validation should make this unreachable, but
                // the branch is known to be reached in the field; fail safe.
                error!(
                    sid = %self.sid,
                    rid = %rid,
                    "retransmitted rid below the resend window; terminating session"
                );
                request.make_terminate(Some(TerminateCondition::ItemNotFound));
            }
        }
        outcome
    }

    /// Sends on the current request's held slot, consuming it on first use.
    /// No ack stamping and no unacked recording: redelivery must be verbatim.
    fn direct_send(
        &mut self,
        current: &mut Option<HeldConnection>,
        body: &BodyElement,
        cx: &mut SessionCx<'_>,
    ) {
        if current.is_none() {
            *current = self.take_slot(self.rid, cx.timers);
        }
        match current {
            Some(slot) => {
                if let Err(err) = slot.handle.send(body) {
                    debug!(sid = %self.sid, rid = %slot.rid, %err, "direct send failed");
                }
            }
            None => debug!(sid = %self.sid, "no held connection for direct redelivery"),
        }
    }

    // ------------------------------------------------------------------
    // Held connections
    // ------------------------------------------------------------------

    /// Registers an inbound connection as a held slot, enforcing the
    /// per-session connection cap and arming the slot's wait timer.
    fn add_held_connection(
        &mut self,
        rid: Rid,
        mut handle: Box<dyn ResponseHandle>,
        cx: &mut SessionCx<'_>,
    ) -> SlotOutcome {
        if self.held.len() > cx.config.max_held_connections {
            let condition = TerminateCondition::PolicyViolation;
            warn!(sid = %self.sid, held = self.held.len(), "too many concurrent connections");
            if let Err(err) = handle.send(&BodyElement::terminate(Some(&condition))) {
                debug!(sid = %self.sid, %err, "failed to answer over-active connection");
            }
            for id in self.streams.clone() {
                cx.streams.terminate(id, Some(&condition));
            }
            self.terminate(Some(condition), cx);
            return SlotOutcome::Rejected;
        }

        let deadline = cx.now + Duration::from_secs(self.wait);
        let wait_timer = cx.timers.arm(deadline, TimerKind::Wait { sid: self.sid, rid });
        self.held.insert(HeldConnection {
            rid,
            handle,
            wait_timer,
        });
        debug!(sid = %self.sid, rid = %rid, held = self.held.len(), "holding connection");
        SlotOutcome::Added
    }

    /// Releases connections beyond the negotiated hold, oldest first.
    fn respond_to_extra_held_connections(&mut self, cx: &mut SessionCx<'_>) {
        while self.held.len() > self.hold {
            let Some(slot) = self.take_oldest_slot(cx.timers) else {
                break;
            };
            debug!(sid = %self.sid, rid = %slot.rid, "releasing extra held connection");
            let _ = self.send_on_slot(slot, BodyElement::empty(), cx);
        }
    }

    fn take_slot(&mut self, rid: Rid, timers: &mut TimerWheel) -> Option<HeldConnection> {
        let slot = self.held.remove_by_rid(rid)?;
        timers.cancel(slot.wait_timer);
        Some(slot)
    }

    fn take_oldest_slot(&mut self, timers: &mut TimerWheel) -> Option<HeldConnection> {
        let slot = self.held.pop_oldest()?;
        timers.cancel(slot.wait_timer);
        Some(slot)
    }

    /// Sends a wrapper on a consumed slot: stamps the ack attribute and
    /// records the response for redelivery when the ack sub-protocol is on.
    ///
    /// On failure the wrapper is handed back so the caller can retry or park
    /// it; the slot itself is spent either way.
    fn send_on_slot(
        &mut self,
        mut slot: HeldConnection,
        mut body: BodyElement,
        cx: &mut SessionCx<'_>,
    ) -> Result<(), BodyElement> {
        if self.ack {
            if slot.rid < self.rid {
                // Acknowledge the highest request processed so far.
                body.set_ack(self.rid);
            }
            self.unacked.insert(
                slot.rid,
                UnackedResponse {
                    body: body.clone(),
                    sent_at: cx.now,
                },
            );
            self.max_rid_sent = self.max_rid_sent.max(slot.rid);
        }
        match slot.handle.send(&body) {
            Ok(()) => {
                debug!(sid = %self.sid, rid = %slot.rid, "sent response");
                Ok(())
            }
            Err(err) => {
                debug!(sid = %self.sid, rid = %slot.rid, %err, "send failed");
                Err(body)
            }
        }
    }

    // ------------------------------------------------------------------
    // Outgoing responses
    // ------------------------------------------------------------------

    /// Queues an outgoing response for delivery, merging it into a pending
    /// response with a structurally identical wrapper when possible, and
    /// schedules a deferred flush pass.
    pub fn enqueue_response(
        &mut self,
        body: BodyElement,
        stream: Option<StreamId>,
        cx: &mut SessionCx<'_>,
    ) {
        self.merge_or_push(body, stream);
        self.schedule_flush(cx);
    }

    fn merge_or_push(&mut self, body: BodyElement, stream: Option<StreamId>) {
        if let Some(entry) = self
            .pending
            .iter_mut()
            .find(|entry| entry.body.same_wrapper(&body))
        {
            debug!(sid = %self.sid, "merging response into pending wrapper");
            entry.body.merge(body);
        } else {
            self.pending.push_back(PendingResponse { body, stream });
        }
    }

    /// Schedules at most one deferred flush pass per scheduling turn.
    fn schedule_flush(&mut self, cx: &mut SessionCx<'_>) {
        if !self.flush_scheduled {
            self.flush_scheduled = true;
            cx.flush_queue.push_back(self.sid);
        }
    }

    /// One deferred flush pass: send the oldest pending response on the
    /// oldest held connection, then either reschedule or trim extras.
    pub(crate) fn flush_turn(&mut self, cx: &mut SessionCx<'_>) {
        self.flush_scheduled = false;
        if self.is_closed() {
            return;
        }
        self.pop_and_send(cx);
        if self.pending.is_empty() || self.held.is_empty() {
            self.respond_to_extra_held_connections(cx);
        }
    }

    fn pop_and_send(&mut self, cx: &mut SessionCx<'_>) {
        if self.held.is_empty() {
            return;
        }
        let Some(entry) = self.pending.pop_front() else {
            return;
        };
        let Some(slot) = self.take_oldest_slot(cx.timers) else {
            self.pending.push_front(entry);
            return;
        };
        let stream = entry.stream;
        match self.send_on_slot(slot, entry.body, cx) {
            Ok(()) => {
                if !self.pending.is_empty() && !self.held.is_empty() {
                    self.schedule_flush(cx);
                }
            }
            Err(body) => {
                if self.held.is_empty() {
                    // Nothing left to try; park at the back. This can reorder
                    // relative to responses enqueued in the meantime — a
                    // documented trade-off of the queue discipline.
                    self.pending.push_back(PendingResponse { body, stream });
                } else {
                    // Retry on the next slot via the normal queue.
                    self.enqueue_response(body, stream, cx);
                }
            }
        }
    }

    /// Enqueues the session-creation response, seeding the negotiated
    /// parameters (and the first stream's addressing, when one exists).
    pub(crate) fn send_creation_response(&mut self, cx: &mut SessionCx<'_>) {
        if self.is_closed() {
            return;
        }
        let stream = self.streams.first().copied();
        let mut body = BodyElement::empty()
            .with_attr("sid", self.sid)
            .with_attr("wait", self.wait)
            .with_attr("hold", self.hold)
            .with_attr("inactivity", self.inactivity)
            .with_attr("polling", self.inactivity / 2)
            .with_attr("requests", self.window)
            .with_attr("window", self.window)
            .with_attr("content", &self.content)
            .with_attr("xmpp:restartlogic", "true")
            .with_attr("xmlns:xmpp", XBOSH_XMLNS);
        if let Some(ver) = &self.ver {
            body.set_attr("ver", ver);
        }
        if let Some(info) = stream.and_then(|id| cx.streams.info(id)) {
            body.set_attr("stream", &info.name);
            if let Some(to) = &info.to {
                body.set_attr("from", to);
            }
            if let Some(from) = &info.from {
                body.set_attr("to", from);
            }
        }
        self.enqueue_response(body, stream, cx);
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    /// Records a stream attached to this session. The XMPP-facing layer uses
    /// this for streams it creates outside request dispatch.
    pub fn add_stream(&mut self, id: StreamId) {
        if !self.streams.contains(&id) {
            self.streams.push(id);
        }
    }

    /// Drops a stream back-reference; returns how many remain. A session left
    /// with zero streams should be terminated by the caller.
    pub fn remove_stream(&mut self, id: StreamId) -> usize {
        self.streams.retain(|stream| *stream != id);
        self.streams.len()
    }

    // ------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------

    /// Handles a stream-terminate request (or the inactivity-driven
    /// equivalent): targets one stream, or all of them when none is named.
    pub(crate) fn handle_stream_terminate(
        &mut self,
        stream: Option<StreamId>,
        nodes: &[Bytes],
        condition: Option<TerminateCondition>,
        cx: &mut SessionCx<'_>,
    ) {
        let targets: Vec<StreamId> = match stream {
            Some(id) => vec![id],
            None => self.streams.clone(),
        };
        let terminating_all = targets.len() == self.streams.len();

        for id in targets {
            if !nodes.is_empty() {
                // Deliver the enclosed payload before tearing the stream down.
                cx.sink.on_nodes(self.sid, id, nodes);
            }
            if !terminating_all {
                // When every stream goes down together, one session-level
                // terminate response below replaces the per-stream ones.
                if let Some(info) = cx.streams.info(id) {
                    let body = BodyElement::terminate(condition.as_ref())
                        .with_attr("stream", &info.name);
                    self.enqueue_response(body, Some(id), cx);
                }
            }
            cx.streams.terminate(id, condition.as_ref());
            self.streams.retain(|stream| *stream != id);
            cx.sink.on_stream_terminate(self.sid, id);
        }

        if self.streams.is_empty() {
            let body = BodyElement::terminate(condition.as_ref());
            if let Some(slot) = self.take_oldest_slot(cx.timers) {
                let _ = self.send_on_slot(slot, body, cx);
            }
            self.terminate(condition, cx);
        }
    }

    /// Tears the session down: drains every held connection with an empty
    /// placeholder, cancels the inactivity timer, and marks the session for
    /// the registry to reap. Safe to call on an already-terminated session.
    pub(crate) fn terminate(
        &mut self,
        condition: Option<TerminateCondition>,
        cx: &mut SessionCx<'_>,
    ) {
        if self.is_closed() {
            return;
        }
        if !self.streams.is_empty() {
            debug!(sid = %self.sid, streams = self.streams.len(), "terminating session with live streams");
        }
        while let Some(slot) = self.take_oldest_slot(cx.timers) {
            let _ = self.send_on_slot(slot, BodyElement::empty(), cx);
        }
        self.unset_inactivity_timer(cx.timers);
        self.state = SessionState::Closed(condition);
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// (Re)arms the inactivity timer; called on every accepted request.
    pub(crate) fn reset_inactivity_timer(&mut self, cx: &mut SessionCx<'_>) {
        self.unset_inactivity_timer(cx.timers);
        let deadline = cx.now + Duration::from_secs(self.inactivity + INACTIVITY_GRACE_SECS);
        self.inactivity_timer = Some(
            cx.timers
                .arm(deadline, TimerKind::Inactivity { sid: self.sid }),
        );
    }

    fn unset_inactivity_timer(&mut self, timers: &mut TimerWheel) {
        if let Some(timer) = self.inactivity_timer.take() {
            timers.cancel(timer);
        }
    }

    /// The wait timer for the slot at `rid` expired: release it with an
    /// empty placeholder (still recorded for ack purposes).
    pub(crate) fn on_wait_timeout(&mut self, rid: Rid, cx: &mut SessionCx<'_>) {
        let Some(slot) = self.held.remove_by_rid(rid) else {
            return;
        };
        debug!(sid = %self.sid, rid = %rid, "wait expired; releasing connection");
        let _ = self.send_on_slot(slot, BodyElement::empty(), cx);
    }

    /// The session idled past its inactivity timeout: report undeliverable
    /// responses and behave as though the client terminated every stream.
    pub(crate) fn on_inactivity_timeout(&mut self, cx: &mut SessionCx<'_>) {
        debug!(sid = %self.sid, "inactivity timeout; terminating session");
        for entry in &self.pending {
            cx.sink.on_no_client(self.sid, &entry.body);
        }
        for unacked in self.unacked.values() {
            cx.sink.on_no_client(self.sid, &unacked.body);
        }
        self.inactivity_timer = None;
        self.handle_stream_terminate(None, &[], None, cx);
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn creation_request(rid: u64) -> BodyRequest {
        BodyRequest::new()
            .with_attr("rid", rid)
            .with_attr("wait", 60)
            .with_attr("hold", 1)
            .with_attr("to", "example.net")
            .with_attr("xmpp:version", "1.0")
    }

    fn session() -> Session {
        // rid starts at 9; window 2 tolerates 7..=11.
        Session::new(&creation_request(10), &BoshConfig::testing()).expect("session")
    }

    fn packet(rid: u64) -> BodyRequest {
        BodyRequest::new()
            .with_attr("sid", Sid::generate())
            .with_attr("rid", rid)
    }

    #[test]
    fn new_negotiates_against_config() {
        let config = BoshConfig::testing();
        let request = creation_request(2)
            .with_attr("wait", 600)
            .with_attr("hold", 9)
            .with_attr("inactivity", 30)
            .with_attr("ack", 1)
            .with_attr("route", "xmpp:host:5222");
        let session = Session::new(&request, &config).expect("session");

        assert_eq!(session.rid(), Rid::new(1));
        assert_eq!(session.inactivity(), 30);
        // 600 exceeds the inactivity timeout, so wait falls back to 80%.
        assert_eq!(session.wait(), 24);
        assert_eq!(session.hold(), 2);
        assert!(session.ack_enabled());
        assert_eq!(session.route(), Some("xmpp:host:5222"));
        assert!(!session.is_closed());
    }

    #[test]
    fn new_requires_a_rid() {
        let request = BodyRequest::new()
            .with_attr("wait", 60)
            .with_attr("hold", 1)
            .with_attr("to", "example.net");
        assert!(matches!(
            Session::new(&request, &BoshConfig::testing()),
            Err(CoreError::MissingRid)
        ));
    }

    #[test_case(6, false; "below window")]
    #[test_case(7, true; "window lower edge")]
    #[test_case(9, true; "current rid")]
    #[test_case(11, true; "window upper edge")]
    #[test_case(12, false; "above window")]
    fn packet_window_validation(rid: u64, valid: bool) {
        assert_eq!(session().is_valid_packet(&packet(rid)), valid);
    }

    #[test]
    fn packets_need_sid_and_rid() {
        let session = session();
        assert!(!session.is_valid_packet(&BodyRequest::new().with_attr("rid", 9)));
        assert!(!session.is_valid_packet(&BodyRequest::new().with_attr("sid", Sid::generate())));
    }

    #[test]
    fn attribute_bomb_is_invalid() {
        let session = session();
        let mut request = packet(9);
        for n in 0..BODY_ATTR_LIMIT {
            request.set_attr(&format!("x{n}"), n);
        }
        assert!(!session.is_valid_packet(&request));
    }

    #[test]
    fn only_stream_requires_exactly_one() {
        let mut session = session();
        assert_eq!(session.only_stream(), None);
        session.add_stream(StreamId::new(1));
        assert_eq!(session.only_stream(), Some(StreamId::new(1)));
        session.add_stream(StreamId::new(2));
        assert_eq!(session.only_stream(), None);
        assert_eq!(session.remove_stream(StreamId::new(1)), 1);
    }
}
