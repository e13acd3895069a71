// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP client registration and NAT-traversal ("outbound") engine.
//!
//! The engine issues REGISTER requests, resolves Digest challenges, detects
//! NAT rebinding from reflected Via parameters, maintains the binding with
//! periodic OPTIONS keepalive probes, reconciles the server's authoritative
//! contact list, and drives corrective re-registration.
//!
//! # Architecture
//!
//! - [`RegistrarEngine`] owns the session table, the deterministic
//!   [`Scheduler`](clock::Scheduler), and the [`Transport`] and
//!   [`CredentialStore`](mooring_auth::CredentialStore) collaborators.
//! - State machines are synchronous: responses and timer expiries go in,
//!   sends and [`SessionEvent`]s come out. Nothing blocks.
//! - Time is injected: [`SystemClock`](clock::SystemClock) in production
//!   (pumped by [`runtime::drive`]), [`VirtualClock`](clock::VirtualClock)
//!   in tests, advanced explicitly with
//!   [`advance_clock`](RegistrarEngine::advance_clock).
//!
//! # Example
//!
//! ```no_run
//! use mooring_auth::{Credentials, MemoryCredentialStore};
//! use mooring_core::SipUri;
//! use mooring_reg::clock::SystemClock;
//! use mooring_reg::{RegisterConfig, RegistrarEngine};
//! use std::sync::Arc;
//!
//! # fn transport() -> Box<dyn mooring_reg::Transport> { unimplemented!() }
//! let store = Arc::new(MemoryCredentialStore::new());
//! store.add(Credentials::new("example.com", "alice", "secret"));
//!
//! let mut engine = RegistrarEngine::new(
//!     transport(),
//!     store,
//!     Arc::new(SystemClock::new()),
//! );
//!
//! let config = RegisterConfig::new(
//!     SipUri::parse("sip:alice@example.com").unwrap(),
//!     SipUri::parse("sip:registrar.example.com").unwrap(),
//! )
//! .with_outbound("no-validate");
//!
//! let session = engine.register(config);
//! // ... feed responses via engine.on_response, drain engine.drain_events()
//! # let _ = session;
//! ```

pub mod clock;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod keepalive;
pub mod nat;
pub mod outbound;
pub mod reconcile;
pub mod runtime;
pub mod session;
pub mod transport;

pub use controller::RegisterConfig;
pub use engine::RegistrarEngine;
pub use error::RegError;
pub use events::{RegistrationEvent, SessionEvent};
pub use nat::{BindingObservation, NatBinding};
pub use outbound::{OutboundMode, OutboundOptions, OutboundState};
pub use session::{ContactBinding, RegistrationSession, SessionId, SessionState};
pub use transport::{Transport, TransportEvent, TransportKind, TxnId};
