// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! OPTIONS keepalive probing.
//!
//! While outbound mode is Active, the prober periodically revalidates the NAT
//! binding by sending an OPTIONS request over the session's existing
//! connection and inspecting the reflected Via. A changed binding hands
//! exactly one re-registration trigger to the controller; the prober itself
//! never re-registers. Probe failures are non-fatal: they increment the
//! consecutive-failure count and leave the session's registration status
//! alone.
//!
//! State machine: `Idle → Probing → (Authenticating → Probing)? → Idle`.
//! The interval timer is re-armed relative to the previous probe's
//! completion, so scheduling jitter does not accumulate into drift.

use std::collections::HashMap;
use std::net::SocketAddr;

use mooring_auth::{Challenge, ChallengeScope};
use mooring_core::{Response, ViaHeader};
use smol_str::SmolStr;

use crate::clock::TimerToken;
use crate::nat::{self, NatBinding};
use crate::transport::TxnId;

/// Prober lifecycle for one probe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Probing,
    Authenticating,
}

/// What the engine should do with a probe response.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Provisional response; keep waiting.
    Pending,
    /// Probe cycle finished; `binding_changed` carries the new binding when
    /// it no longer matches the registered one.
    Complete { binding_changed: Option<NatBinding> },
    /// Resubmit the probe answering these challenges.
    Authenticate(Vec<Challenge>),
    /// Probe cycle failed (non-fatal).
    Failed,
}

/// Keepalive prober state, owned by the session.
#[derive(Debug, Default)]
pub struct Prober {
    pub state: ProbeState,
    pub timer: Option<TimerToken>,
    pub in_flight: Option<TxnId>,
    pub sent_via: Option<ViaHeader>,
    /// Nonces answered in the current probe cycle; a repeat on the same
    /// scope with an unchanged nonce fails the probe.
    pub answered_nonces: HashMap<ChallengeScope, SmolStr>,
}

impl Default for ProbeState {
    fn default() -> Self {
        ProbeState::Idle
    }
}

impl Prober {
    /// Marks a new probe cycle started with the given transaction.
    pub fn begin_cycle(&mut self, txn: TxnId, sent_via: ViaHeader) {
        self.state = ProbeState::Probing;
        self.in_flight = Some(txn);
        self.sent_via = Some(sent_via);
        self.answered_nonces.clear();
    }

    /// Marks the authenticated resubmission within the current cycle.
    pub fn resubmit(&mut self, txn: TxnId, sent_via: ViaHeader) {
        self.state = ProbeState::Probing;
        self.in_flight = Some(txn);
        self.sent_via = Some(sent_via);
    }

    /// True when the given transaction is this prober's outstanding probe.
    pub fn owns_txn(&self, txn: TxnId) -> bool {
        self.in_flight == Some(txn)
    }

    /// Classifies the response to the outstanding probe.
    ///
    /// `previous` is the binding recorded at registration time; `local` and
    /// `connected_port` feed the NAT detector exactly as for REGISTER
    /// responses.
    pub fn classify_response(
        &mut self,
        response: &Response,
        local: SocketAddr,
        connected_port: Option<u16>,
        previous: Option<NatBinding>,
    ) -> ProbeOutcome {
        if response.start.is_provisional() {
            return ProbeOutcome::Pending;
        }

        self.in_flight = None;

        match response.code() {
            200 => {
                let Some(reflected) = response
                    .headers
                    .get("Via")
                    .and_then(|v| ViaHeader::parse(v.as_str()))
                else {
                    // A 200 without a usable Via cannot revalidate anything.
                    return ProbeOutcome::Failed;
                };

                let observation = nat::observe(&reflected, local, connected_port);
                let changed = previous != Some(observation.binding);
                ProbeOutcome::Complete {
                    binding_changed: changed.then_some(observation.binding),
                }
            }
            401 | 407 => {
                let challenges = Challenge::from_response(response);
                let failed_scope = if response.code() == 401 {
                    ChallengeScope::Www
                } else {
                    ChallengeScope::Proxy
                };

                let Some(challenge) = challenges.iter().find(|c| c.scope == failed_scope) else {
                    return ProbeOutcome::Failed;
                };

                // Once per scope: an unchanged nonce after we already
                // answered means the credentials were not accepted.
                if self.answered_nonces.get(&failed_scope) == Some(&challenge.nonce) {
                    return ProbeOutcome::Failed;
                }

                self.state = ProbeState::Authenticating;
                ProbeOutcome::Authenticate(challenges)
            }
            _ => ProbeOutcome::Failed,
        }
    }

    /// Records that a challenge scope was answered with the given nonce.
    pub fn record_answered(&mut self, scope: ChallengeScope, nonce: SmolStr) {
        self.answered_nonces.insert(scope, nonce);
    }

    /// Finishes the current cycle, returning to Idle.
    pub fn finish_cycle(&mut self) {
        self.state = ProbeState::Idle;
        self.in_flight = None;
        self.sent_via = None;
        self.answered_nonces.clear();
    }

    /// Stops probing entirely. Idempotent; the engine cancels the returned
    /// timer token, and any outstanding probe becomes ignorable.
    pub fn stop(&mut self) -> Option<TimerToken> {
        self.finish_cycle();
        self.timer.take()
    }
}
