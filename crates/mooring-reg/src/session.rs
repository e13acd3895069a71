// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-identity registration session state.
//!
//! A session is created on the first registration request and owned
//! exclusively by the engine; the prober and detector only read it. The
//! contact set is replaced wholesale on a successful 200, never partially
//! mutated.

use std::collections::HashMap;
use std::time::Duration;

use mooring_auth::{Challenge, ChallengeScope};
use mooring_core::{ContactHeader, SipUri, ViaHeader};
use smol_str::SmolStr;

use crate::clock::TimerToken;
use crate::keepalive::Prober;
use crate::nat::NatBinding;
use crate::outbound::{OutboundOptions, OutboundState};
use crate::transport::{TransportKind, TxnId};

/// Engine-assigned session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Registration session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registering,
    Challenged,
    Registered,
    Refreshing,
    Unregistering,
}

/// One entry of the authoritative contact set returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactBinding {
    pub contact: ContactHeader,
    pub instance_id: Option<SmolStr>,
    /// True when this entry is the NAT-observed contact.
    pub nat_observed: bool,
    pub expires: u32,
}

/// Which registration cycle an in-flight REGISTER belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// First registration of the session.
    Initial,
    /// Re-REGISTER carrying corrected/dual contacts after a NAT observation
    /// or a contact rejection.
    Corrective,
    /// Scheduled refresh before expiry.
    Refresh,
    /// REGISTER with Expires: 0.
    Unregister,
}

/// The single REGISTER a session may have in flight.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub txn: TxnId,
    pub kind: RegisterKind,
    pub sent_via: ViaHeader,
    /// Contacts offered in this request, in header order.
    pub offered: Vec<ContactHeader>,
}

/// Per-identity aggregate consumed and produced by the engine components.
pub struct RegistrationSession {
    pub id: SessionId,
    pub aor: SipUri,
    pub registrar: SipUri,
    pub transport: TransportKind,
    pub state: SessionState,
    pub options: OutboundOptions,
    pub instance_id: Option<SmolStr>,
    pub requested_expires: u32,

    pub call_id: SmolStr,
    pub from_tag: SmolStr,
    pub cseq: u32,

    /// Authoritative contact set from the last 200.
    pub contacts: Vec<ContactBinding>,
    /// Canonical current contact selected by the reconciler.
    pub current_contact: Option<ContactHeader>,
    /// Last observed NAT binding.
    pub binding: Option<NatBinding>,
    pub nat_present: bool,
    pub outbound: OutboundState,

    pub in_flight: Option<InFlight>,

    /// Challenges answered so far, kept for re-attaching fresh authorization
    /// to subsequent requests.
    pub cached_challenges: HashMap<ChallengeScope, Challenge>,
    /// Nonces answered in the current attempt; an unchanged nonce repeating
    /// on the same scope is fatal.
    pub answered_nonces: HashMap<ChallengeScope, SmolStr>,
    /// One corrective retry per attempt after a contact rejection.
    pub contact_retry_done: bool,
    /// Coalesced binding-change trigger to apply once the in-flight cycle
    /// concludes.
    pub pending_revalidate: bool,
    /// Unregister requested while another cycle was in flight.
    pub pending_unregister: bool,

    pub refresh_timer: Option<TimerToken>,
    pub expiry_timer: Option<TimerToken>,
    /// Absolute deadline at which the last granted registration lapses.
    pub expiry_at: Option<Duration>,

    pub prober: Prober,
}

impl RegistrationSession {
    /// Allocates the next CSeq number.
    pub fn next_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    /// Starts a fresh attempt: challenge-failure and contact-retry budgets
    /// reset. Corrective continuations within an attempt do not reset them.
    pub fn begin_attempt(&mut self) {
        self.answered_nonces.clear();
        self.contact_retry_done = false;
    }

    /// True when a REGISTER (of any kind) is in flight.
    pub fn register_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }
}

