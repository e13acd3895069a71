// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The registration engine: owns the session table, the scheduler, the
//! transport and credential collaborators, and drives every state machine.
//!
//! All session state is mutated on the caller's thread; suspension points
//! are waiting for a response (`on_response`/`on_timeout`) and waiting for
//! timer expiry (`advance_clock`/`run_until_idle`). A session's in-flight
//! flag keeps a second REGISTER from starting before the first concludes.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mooring_auth::{ChallengeScope, CredentialStore, DigestResponder};
use mooring_core::{ContactHeader, Response, ViaHeader};
use smol_str::SmolStr;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, Scheduler};
use crate::controller::{
    self, apply_register_challenges, build_options, build_register, RegisterConfig,
};
use crate::error::RegError;
use crate::events::{RegistrationEvent, SessionEvent};
use crate::keepalive::ProbeOutcome;
use crate::nat::{self, NatBinding};
use crate::outbound::{decide, OutboundMode, OutboundState};
use crate::reconcile::{matches_binding, reconcile};
use crate::session::{
    ContactBinding, InFlight, RegisterKind, RegistrationSession, SessionId, SessionState,
};
use crate::transport::{Transport, TransportEvent, TxnId};

/// Timers owned by the engine's scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerEvent {
    Refresh(SessionId),
    Expiry(SessionId),
    Probe(SessionId),
}

/// Registration engine for one transport flow.
///
/// Sessions are created by [`register`](Self::register) and addressed by the
/// returned [`SessionId`]. Outcomes surface through
/// [`drain_events`](Self::drain_events).
pub struct RegistrarEngine {
    scheduler: Scheduler<TimerEvent>,
    transport: Box<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    responder: DigestResponder,
    sessions: HashMap<SessionId, RegistrationSession>,
    txn_routes: HashMap<TxnId, SessionId>,
    events: VecDeque<SessionEvent>,
    next_txn: u64,
    next_session: u64,
}

impl RegistrarEngine {
    pub fn new(
        transport: Box<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(clock),
            transport,
            credentials,
            responder: DigestResponder::new(),
            sessions: HashMap::new(),
            txn_routes: HashMap::new(),
            events: VecDeque::new(),
            next_txn: 0,
            next_session: 0,
        }
    }

    /// Creates a session for the configuration and issues the first REGISTER.
    pub fn register(&mut self, config: RegisterConfig) -> SessionId {
        self.next_session += 1;
        let id = SessionId(self.next_session);

        let session = RegistrationSession {
            id,
            aor: config.aor,
            registrar: config.registrar,
            transport: self.transport.kind(),
            state: SessionState::Unregistered,
            options: config.outbound,
            instance_id: config.instance_id,
            requested_expires: config.expires,
            call_id: controller::generate_call_id(),
            from_tag: controller::generate_tag(),
            cseq: 0,
            contacts: Vec::new(),
            current_contact: None,
            binding: None,
            nat_present: false,
            outbound: OutboundState::new(config.keepalive_interval),
            in_flight: None,
            cached_challenges: HashMap::new(),
            answered_nonces: HashMap::new(),
            contact_retry_done: false,
            pending_revalidate: false,
            pending_unregister: false,
            refresh_timer: None,
            expiry_timer: None,
            expiry_at: None,
            prober: Default::default(),
        };
        self.sessions.insert(id, session);

        info!(session = id.0, "starting registration");
        self.begin_attempt(id, SessionState::Registering);
        self.send_register(id, RegisterKind::Initial);
        id
    }

    /// Re-initiates a session that failed or was unregistered.
    pub fn reregister(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.state != SessionState::Unregistered {
            debug!(session = id.0, "reregister ignored: session not idle");
            return;
        }
        self.begin_attempt(id, SessionState::Registering);
        self.send_register(id, RegisterKind::Initial);
    }

    /// Unregisters the session (REGISTER with Expires: 0).
    ///
    /// A session already `Unregistered` is left alone: no network traffic,
    /// no error. While another cycle is in flight the request is queued and
    /// applied once that cycle concludes.
    pub fn unregister(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        match session.state {
            SessionState::Unregistered | SessionState::Unregistering => return,
            _ if session.register_in_flight() => {
                session.pending_unregister = true;
            }
            _ => {
                self.stop_timers_and_prober(id);
                self.begin_attempt(id, SessionState::Unregistering);
                self.send_register(id, RegisterKind::Unregister);
            }
        }
    }

    /// Destroys the session: cancels its timers and marks any in-flight
    /// request as ignorable on late arrival.
    pub fn destroy(&mut self, id: SessionId) {
        self.stop_timers_and_prober(id);
        if let Some(session) = self.sessions.remove(&id) {
            if let Some(in_flight) = session.in_flight {
                self.txn_routes.remove(&in_flight.txn);
            }
        }
        self.txn_routes.retain(|_, sid| *sid != id);
    }

    // ------------------------------------------------------------------
    // Inbound

    /// Feeds a response from the transport collaborator.
    pub fn on_response(&mut self, txn: TxnId, response: Response) {
        let Some(&id) = self.txn_routes.get(&txn) else {
            debug!(txn = txn.0, "response for unknown or cancelled transaction");
            return;
        };
        let Some(session) = self.sessions.get(&id) else {
            self.txn_routes.remove(&txn);
            return;
        };

        if session.prober.owns_txn(txn) {
            self.handle_probe_response(id, txn, response);
        } else if session.in_flight.as_ref().map(|f| f.txn) == Some(txn) {
            self.handle_register_response(id, txn, response);
        } else {
            debug!(txn = txn.0, "response does not match any outstanding request");
            self.txn_routes.remove(&txn);
        }
    }

    /// Feeds a request timeout from the transport collaborator.
    pub fn on_timeout(&mut self, txn: TxnId) {
        let Some(id) = self.txn_routes.remove(&txn) else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        if session.prober.owns_txn(txn) {
            warn!(session = id.0, "keepalive probe timed out");
            self.probe_failed(id);
            return;
        }

        if session.in_flight.as_ref().map(|f| f.txn) != Some(txn) {
            return;
        }
        let in_flight = session.in_flight.take().expect("checked above");
        let refreshing = self.is_refresh_style_failure(id, in_flight.kind);

        match in_flight.kind {
            RegisterKind::Unregister => self.finalize_unregistered(id),
            _ if refreshing => self.refresh_failed(id, None),
            _ => self.fail_session(
                id,
                RegError::TransportFailure {
                    detail: SmolStr::new("request timed out"),
                },
            ),
        }
    }

    /// Feeds a connection lifecycle event for connection-oriented transports.
    pub fn on_transport_event(&mut self, id: SessionId, event: TransportEvent) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        match event {
            TransportEvent::Reconnected { local_port } => {
                info!(
                    session = id.0,
                    local_port, "connection re-established; revalidating registration"
                );
                match session.state {
                    SessionState::Unregistered | SessionState::Unregistering => {}
                    _ if session.register_in_flight() => {
                        session.pending_revalidate = true;
                    }
                    SessionState::Registered => {
                        self.begin_attempt(id, SessionState::Registering);
                        self.send_register(id, RegisterKind::Corrective);
                    }
                    _ => {}
                }
            }
            TransportEvent::Closed => {
                if session.state != SessionState::Unregistered {
                    self.fail_session(
                        id,
                        RegError::TransportFailure {
                            detail: SmolStr::new("connection closed"),
                        },
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Time

    /// Advances a virtual clock by `by`, firing due timers in timestamp
    /// order. On a real clock backend this only drains already-due timers.
    pub fn advance_clock(&mut self, by: Duration) {
        let start = self.scheduler.now();
        let target = start + by;
        loop {
            match self.scheduler.next_deadline() {
                Some(deadline) if deadline <= target => {
                    let now = self.scheduler.now();
                    if deadline > now {
                        self.scheduler.clock().advance(deadline - now);
                    }
                    self.run_until_idle();
                }
                _ => break,
            }
        }
        let now = self.scheduler.now();
        if target > now {
            self.scheduler.clock().advance(target - now);
        }
    }

    /// Fires every timer due at the current time.
    pub fn run_until_idle(&mut self) {
        while let Some(event) = self.scheduler.pop_due() {
            self.handle_timer(event);
        }
    }

    /// Earliest pending timer deadline, for external drivers.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.scheduler.next_deadline()
    }

    /// Current engine time.
    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    // ------------------------------------------------------------------
    // Introspection

    /// Removes and returns every queued event.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub fn session_state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.get(&id).map(|s| s.state)
    }

    pub fn current_contact(&self, id: SessionId) -> Option<&ContactHeader> {
        self.sessions.get(&id)?.current_contact.as_ref()
    }

    pub fn contact_bindings(&self, id: SessionId) -> Option<&[ContactBinding]> {
        self.sessions.get(&id).map(|s| s.contacts.as_slice())
    }

    pub fn outbound_mode(&self, id: SessionId) -> Option<OutboundMode> {
        self.sessions.get(&id).map(|s| s.outbound.mode)
    }

    // ------------------------------------------------------------------
    // Internals

    fn emit(&mut self, id: SessionId, event: RegistrationEvent) {
        self.events.push_back(SessionEvent { session: id, event });
    }

    fn next_txn(&mut self) -> TxnId {
        self.next_txn += 1;
        TxnId(self.next_txn)
    }

    fn begin_attempt(&mut self, id: SessionId, state: SessionState) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.begin_attempt();
            session.state = state;
        }
    }

    /// Contacts a registration cycle should offer, given what we currently
    /// know about the NAT binding.
    fn contacts_for_cycle(&self, id: SessionId, kind: RegisterKind) -> Vec<ContactHeader> {
        let session = &self.sessions[&id];
        let local = self.transport.local_addr();

        match kind {
            RegisterKind::Unregister | RegisterKind::Refresh => {
                vec![session
                    .current_contact
                    .clone()
                    .unwrap_or_else(|| controller::direct_contact(session, local))]
            }
            RegisterKind::Initial | RegisterKind::Corrective => {
                let direct = controller::direct_contact(session, local);
                match (session.nat_present, session.binding) {
                    (true, Some(binding)) => {
                        let decision = decide(true, &session.options);
                        let observed = controller::nat_contact(session, &binding);
                        if decision.dual_contact {
                            vec![direct, observed]
                        } else if decision.corrected_contact {
                            vec![observed]
                        } else {
                            vec![direct]
                        }
                    }
                    _ => vec![direct],
                }
            }
        }
    }

    fn send_register(&mut self, id: SessionId, kind: RegisterKind) {
        if self.sessions[&id].register_in_flight() {
            error!(session = id.0, "refusing to start a second in-flight REGISTER");
            return;
        }

        let contacts = self.contacts_for_cycle(id, kind);
        let expires = match kind {
            RegisterKind::Unregister => 0,
            _ => self.sessions[&id].requested_expires,
        };
        let local = self.transport.local_addr();
        let credentials = self.credentials.clone();

        let session = self.sessions.get_mut(&id).expect("session exists");
        let (request, sent_via) = build_register(
            session,
            local,
            &contacts,
            expires,
            credentials.as_ref(),
            &mut self.responder,
        );

        let txn = self.next_txn();
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.in_flight = Some(InFlight {
            txn,
            kind,
            sent_via,
            offered: contacts,
        });

        self.txn_routes.insert(txn, id);
        info!(
            session = id.0,
            txn = txn.0,
            cseq = self.sessions[&id].cseq,
            kind = ?kind,
            expires,
            "sending REGISTER"
        );
        self.transport.send(txn, request);
    }

    fn send_probe(&mut self, id: SessionId) {
        let local = self.transport.local_addr();
        let credentials = self.credentials.clone();
        let session = self.sessions.get_mut(&id).expect("session exists");

        let (request, sent_via) =
            build_options(session, local, credentials.as_ref(), &mut self.responder);

        let txn = self.next_txn();
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.prober.begin_cycle(txn, sent_via);

        self.txn_routes.insert(txn, id);
        debug!(session = id.0, txn = txn.0, "sending OPTIONS keepalive probe");
        self.transport.send(txn, request);
    }

    fn handle_register_response(&mut self, id: SessionId, txn: TxnId, response: Response) {
        if response.start.is_provisional() {
            // 100 Trying: stay pending, no state change.
            debug!(session = id.0, code = response.code(), "provisional response");
            return;
        }
        self.txn_routes.remove(&txn);

        self.observe_via(id, &response);

        let session = self.sessions.get_mut(&id).expect("session exists");
        let Some(in_flight) = session.in_flight.take() else {
            return;
        };
        let code = response.code();
        info!(session = id.0, code, "REGISTER final response");

        if in_flight.kind == RegisterKind::Unregister {
            // Any response concludes an unregistration.
            self.finalize_unregistered(id);
            return;
        }

        match code {
            200 => self.handle_register_ok(id, in_flight, &response),
            401 | 407 => self.handle_register_challenge(id, in_flight, &response),
            400 => self.handle_contact_rejection(id, code),
            _ => self.handle_register_failure(id, in_flight, code, &response),
        }
    }

    /// Updates the session's NAT knowledge from a response's top Via.
    fn observe_via(&mut self, id: SessionId, response: &Response) {
        let Some(reflected) = response
            .headers
            .get("Via")
            .and_then(|v| ViaHeader::parse(v.as_str()))
        else {
            return;
        };
        let local = self.transport.local_addr();
        let connected = self.transport.connected_port();
        let observation = nat::observe(&reflected, local, connected);

        let session = self.sessions.get_mut(&id).expect("session exists");
        if session.binding != Some(observation.binding) {
            debug!(
                session = id.0,
                binding = %observation.binding,
                nat = observation.nat_present,
                "observed binding from Via"
            );
        }
        session.nat_present = observation.nat_present;
        session.binding = Some(observation.binding);
    }

    fn handle_register_ok(&mut self, id: SessionId, in_flight: InFlight, response: &Response) {
        let session = self.sessions.get_mut(&id).expect("session exists");

        // Correction: the server saw a binding none of our offered contacts
        // cover. Refresh cycles skip this under no-validate.
        let correction_allowed =
            in_flight.kind != RegisterKind::Refresh || session.options.validate;
        let covered = match session.binding {
            Some(binding) => in_flight
                .offered
                .iter()
                .any(|c| matches_binding(c, &binding)),
            None => true,
        };
        if session.nat_present && correction_allowed && !covered {
            info!(session = id.0, "NAT binding not covered by registration; correcting");
            session.state = SessionState::Registering;
            self.emit(id, RegistrationEvent::Progress { code: 100 });
            self.send_register(id, RegisterKind::Corrective);
            return;
        }

        // Finalize.
        let returned: Vec<ContactHeader> = response
            .headers
            .get_all("Contact")
            .flat_map(|v| ContactHeader::parse_list(v.as_str()))
            .collect();
        let decision = decide(session.nat_present, &session.options);
        let reconciled = match reconcile(
            returned,
            session.instance_id.as_deref(),
            &in_flight.offered,
            session.binding.as_ref(),
            decision.mode == OutboundMode::Active,
        ) {
            Ok(reconciled) => reconciled,
            Err(err) => {
                self.fail_session(id, err);
                return;
            }
        };

        let session = self.sessions.get_mut(&id).expect("session exists");
        let granted = reconciled
            .current
            .expires_param()
            .or_else(|| {
                response
                    .headers
                    .get("Expires")
                    .and_then(|v| v.as_str().parse().ok())
            })
            .unwrap_or(session.requested_expires);

        let binding = session.binding;
        let nat_present = session.nat_present;
        session.contacts = reconciled
            .all
            .iter()
            .map(|c| ContactBinding {
                instance_id: c.instance_id().map(SmolStr::new),
                nat_observed: nat_present
                    && binding.map(|b| matches_binding(c, &b)).unwrap_or(false),
                expires: c.expires_param().unwrap_or(granted),
                contact: c.clone(),
            })
            .collect();
        session.current_contact = Some(reconciled.current.clone());
        session.state = SessionState::Registered;
        session.outbound.mode = decision.mode;

        // Refresh before expiry; expiry itself is only armed if a refresh
        // later fails.
        if let Some(token) = session.refresh_timer.take() {
            self.scheduler.cancel(token);
        }
        if let Some(token) = session.expiry_timer.take() {
            self.scheduler.cancel(token);
        }
        let now = self.scheduler.now();
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.expiry_at = Some(now + Duration::from_secs(granted as u64));
        let refresh_after = Duration::from_secs((granted as u64).saturating_mul(9) / 10);
        let token = self.scheduler.schedule(refresh_after, TimerEvent::Refresh(id));
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.refresh_timer = Some(token);

        info!(
            session = id.0,
            contact = %reconciled.current,
            expires = granted,
            outbound = ?session.outbound.mode,
            "registered"
        );
        self.emit(
            id,
            RegistrationEvent::Registered {
                contact: reconciled.current,
                expires: granted,
            },
        );

        // Outbound: arm or disarm the prober.
        let session = self.sessions.get_mut(&id).expect("session exists");
        if decision.mode == OutboundMode::Active {
            let idle = session.prober.in_flight.is_none() && session.prober.timer.is_none();
            if idle {
                // Initial validation probe goes out immediately.
                self.send_probe(id);
            }
        } else if let Some(token) = session.prober.stop() {
            self.scheduler.cancel(token);
        }

        let session = self.sessions.get_mut(&id).expect("session exists");
        session.pending_revalidate = false;
        if session.pending_unregister {
            session.pending_unregister = false;
            self.unregister(id);
        }
    }

    fn handle_register_challenge(&mut self, id: SessionId, in_flight: InFlight, response: &Response) {
        let credentials = self.credentials.clone();
        let session = self.sessions.get_mut(&id).expect("session exists");
        let code = response.code();

        match apply_register_challenges(session, response, credentials.as_ref()) {
            Ok(()) => {
                session.state = SessionState::Challenged;
                self.emit(id, RegistrationEvent::Progress { code });
                // Resubmit with credentials applied; the attempt keeps its kind.
                let session = self.sessions.get_mut(&id).expect("session exists");
                session.state = match in_flight.kind {
                    RegisterKind::Refresh => SessionState::Refreshing,
                    _ => SessionState::Registering,
                };
                self.send_register(id, in_flight.kind);
            }
            Err(err) => {
                if self.is_refresh_style_failure(id, in_flight.kind) {
                    // Keep the last-known registration until expiry.
                    self.refresh_failed(id, Some(code));
                } else {
                    self.fail_session(id, err);
                }
            }
        }
    }

    fn handle_contact_rejection(&mut self, id: SessionId, code: u16) {
        let session = self.sessions.get_mut(&id).expect("session exists");
        if !session.contact_retry_done {
            session.contact_retry_done = true;
            session.state = SessionState::Registering;
            info!(session = id.0, code, "contact rejected; retrying with corrected contact");
            self.emit(id, RegistrationEvent::Progress { code: 100 });
            self.send_register(id, RegisterKind::Corrective);
        } else {
            self.fail_session(id, RegError::ContactRejected { code });
        }
    }

    fn handle_register_failure(
        &mut self,
        id: SessionId,
        in_flight: InFlight,
        code: u16,
        response: &Response,
    ) {
        if self.is_refresh_style_failure(id, in_flight.kind) {
            self.refresh_failed(id, Some(code));
            return;
        }
        let reason = response.start.reason.clone();
        self.fail_session(id, RegError::Rejected { code, reason });
    }

    /// A failure counts against the refresh (keep last-known registration)
    /// rather than the session when the session was registered before and
    /// the failing cycle is a refresh or a post-registration correction.
    fn is_refresh_style_failure(&self, id: SessionId, kind: RegisterKind) -> bool {
        let session = &self.sessions[&id];
        match kind {
            RegisterKind::Refresh => true,
            RegisterKind::Corrective => session.expiry_at.is_some(),
            _ => false,
        }
    }

    fn refresh_failed(&mut self, id: SessionId, code: Option<u16>) {
        warn!(session = id.0, ?code, "refresh failed; keeping registration until expiry");
        self.emit(id, RegistrationEvent::RefreshFailed { code });

        let now = self.scheduler.now();
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.state = SessionState::Registered;
        match session.expiry_at {
            Some(expiry_at) if expiry_at > now => {
                if session.expiry_timer.is_none() {
                    let token = self
                        .scheduler
                        .schedule(expiry_at - now, TimerEvent::Expiry(id));
                    let session = self.sessions.get_mut(&id).expect("session exists");
                    session.expiry_timer = Some(token);
                }
            }
            _ => self.expire_session(id),
        }
    }

    fn expire_session(&mut self, id: SessionId) {
        warn!(session = id.0, "registration expired");
        self.stop_timers_and_prober(id);
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.state = SessionState::Unregistered;
        session.contacts.clear();
        session.current_contact = None;
        session.expiry_at = None;
        self.emit(id, RegistrationEvent::Expired);
    }

    fn finalize_unregistered(&mut self, id: SessionId) {
        info!(session = id.0, "unregistered");
        self.stop_timers_and_prober(id);
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.state = SessionState::Unregistered;
        session.contacts.clear();
        session.current_contact = None;
        session.expiry_at = None;
        session.pending_unregister = false;
        session.pending_revalidate = false;
        self.emit(id, RegistrationEvent::Unregistered);
    }

    fn fail_session(&mut self, id: SessionId, error: RegError) {
        warn!(session = id.0, %error, "registration failed");
        self.stop_timers_and_prober(id);
        let session = self.sessions.get_mut(&id).expect("session exists");
        if let Some(in_flight) = session.in_flight.take() {
            self.txn_routes.remove(&in_flight.txn);
        }
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.state = SessionState::Unregistered;
        session.contacts.clear();
        session.current_contact = None;
        session.expiry_at = None;
        session.pending_revalidate = false;
        session.pending_unregister = false;
        self.emit(id, RegistrationEvent::Failed { error });
    }

    fn stop_timers_and_prober(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if let Some(token) = session.refresh_timer.take() {
            self.scheduler.cancel(token);
        }
        if let Some(token) = session.expiry_timer.take() {
            self.scheduler.cancel(token);
        }
        let probe_txn = session.prober.in_flight;
        if let Some(token) = session.prober.stop() {
            self.scheduler.cancel(token);
        }
        if let Some(txn) = probe_txn {
            self.txn_routes.remove(&txn);
        }
    }

    // ------------------------------------------------------------------
    // Probing

    fn handle_probe_response(&mut self, id: SessionId, txn: TxnId, response: Response) {
        if response.start.is_provisional() {
            return;
        }
        self.txn_routes.remove(&txn);

        let local = self.transport.local_addr();
        let connected = self.transport.connected_port();
        let session = self.sessions.get_mut(&id).expect("session exists");
        let previous = session.binding;

        let outcome =
            session
                .prober
                .classify_response(&response, local, connected, previous);

        match outcome {
            ProbeOutcome::Pending => {}
            ProbeOutcome::Complete { binding_changed } => {
                self.finish_probe_cycle(id, true);
                if let Some(binding) = binding_changed {
                    self.binding_changed(id, binding, local, connected);
                }
            }
            ProbeOutcome::Authenticate(challenges) => {
                self.authenticate_probe(id, response.code(), challenges);
            }
            ProbeOutcome::Failed => self.probe_failed(id),
        }
    }

    fn authenticate_probe(
        &mut self,
        id: SessionId,
        code: u16,
        challenges: Vec<mooring_auth::Challenge>,
    ) {
        let failed_scope = if code == 401 {
            ChallengeScope::Www
        } else {
            ChallengeScope::Proxy
        };
        let Some(challenge) = challenges.iter().find(|c| c.scope == failed_scope) else {
            self.probe_failed(id);
            return;
        };

        if self.credentials.lookup(challenge.realm.as_str()).is_none() {
            warn!(
                session = id.0,
                realm = challenge.realm.as_str(),
                "no credentials for probe challenge"
            );
            self.probe_failed(id);
            return;
        }

        let session = self.sessions.get_mut(&id).expect("session exists");
        session
            .prober
            .record_answered(failed_scope, challenge.nonce.clone());
        for challenge in &challenges {
            session
                .cached_challenges
                .insert(challenge.scope, challenge.clone());
        }

        // Resubmit the probe with authorization attached.
        let local = self.transport.local_addr();
        let credentials = self.credentials.clone();
        let session = self.sessions.get_mut(&id).expect("session exists");
        let (request, sent_via) =
            build_options(session, local, credentials.as_ref(), &mut self.responder);
        let txn = self.next_txn();
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.prober.resubmit(txn, sent_via);
        self.txn_routes.insert(txn, id);
        debug!(session = id.0, txn = txn.0, "resubmitting authenticated probe");
        self.transport.send(txn, request);
    }

    fn binding_changed(
        &mut self,
        id: SessionId,
        binding: NatBinding,
        local: SocketAddr,
        connected: Option<u16>,
    ) {
        let comparison_port = connected.unwrap_or_else(|| local.port());
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.binding = Some(binding);
        session.nat_present =
            binding.addr != local.ip() || binding.port != comparison_port;

        info!(session = id.0, binding = %binding, "NAT binding change detected by probe");
        self.emit(id, RegistrationEvent::BindingChanged { binding });

        let session = self.sessions.get_mut(&id).expect("session exists");
        if !session.options.validate {
            debug!(session = id.0, "no-validate set; not re-registering");
            return;
        }
        if session.register_in_flight() {
            // Coalesce: the in-flight cycle will pick up the new binding.
            session.pending_revalidate = true;
            return;
        }
        if session.state == SessionState::Registered {
            self.begin_attempt(id, SessionState::Registering);
            self.send_register(id, RegisterKind::Corrective);
        }
    }

    fn probe_failed(&mut self, id: SessionId) {
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.outbound.consecutive_failures += 1;
        let consecutive = session.outbound.consecutive_failures;
        warn!(
            session = id.0,
            consecutive, "keepalive probe failed; registration status unaffected"
        );
        self.emit(id, RegistrationEvent::ProbeFailed { consecutive });
        self.finish_probe_cycle(id, false);
    }

    /// Completes the current probe cycle and re-arms the interval timer
    /// relative to completion time.
    fn finish_probe_cycle(&mut self, id: SessionId, success: bool) {
        let now = self.scheduler.now();
        let session = self.sessions.get_mut(&id).expect("session exists");
        session.prober.finish_cycle();
        session.outbound.last_probe_at = Some(now);
        if success {
            session.outbound.consecutive_failures = 0;
        }

        if session.outbound.mode == OutboundMode::Active {
            let interval = session.outbound.keepalive_interval;
            let token = self.scheduler.schedule(interval, TimerEvent::Probe(id));
            let session = self.sessions.get_mut(&id).expect("session exists");
            session.prober.timer = Some(token);
        }
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Refresh(id) => {
                let Some(session) = self.sessions.get_mut(&id) else {
                    return;
                };
                session.refresh_timer = None;
                if session.state != SessionState::Registered || session.register_in_flight() {
                    return;
                }
                debug!(session = id.0, "refreshing registration before expiry");
                self.begin_attempt(id, SessionState::Refreshing);
                self.send_register(id, RegisterKind::Refresh);
            }
            TimerEvent::Expiry(id) => {
                let Some(session) = self.sessions.get_mut(&id) else {
                    return;
                };
                session.expiry_timer = None;
                if session.state == SessionState::Registered {
                    self.expire_session(id);
                }
            }
            TimerEvent::Probe(id) => {
                let Some(session) = self.sessions.get_mut(&id) else {
                    return;
                };
                session.prober.timer = None;
                if session.outbound.mode != OutboundMode::Active {
                    return;
                }
                if session.prober.in_flight.is_some() {
                    // At most one probe in flight.
                    return;
                }
                self.send_probe(id);
            }
        }
    }
}
