// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Test harness for the registration engine.
//!
//! Provides a scripted mock transport, response builders that mirror a
//! registrar's behavior (including a NAT that rewrites the reflected Via),
//! and a per-test [`TestContext`] owning the engine, transport handle,
//! virtual clock, and credential store. Contexts are created and dropped per
//! test; nothing here is process-wide.
//!
//! # Example
//! ```
//! use mooring_core::{Method, SipUri};
//! use mooring_reg::RegisterConfig;
//! use mooring_reg::TransportKind;
//! use mooring_testkit::TestContext;
//!
//! let mut ctx = TestContext::new(TransportKind::Udp);
//! let config = RegisterConfig::new(
//!     SipUri::parse("sip:alice@example.com").unwrap(),
//!     SipUri::parse("sip:registrar.example.com").unwrap(),
//! );
//! let session = ctx.engine.register(config);
//! let register = ctx.expect_request(Method::Register);
//! let ok = ctx.ok_for_register(&register, None);
//! ctx.engine.on_response(register.txn, ok);
//! # let _ = session;
//! ```

mod builders;
mod context;
mod transport;

pub use builders::{
    challenge_for, contact_values, natted_via, ok_for_options, ok_for_register, respond_to,
    set_via,
};
pub use context::{TestContext, LOCAL_ADDR};
pub use transport::{MockTransport, SentRequest, TransportHandle};
