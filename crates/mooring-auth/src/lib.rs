// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client-side SIP Digest authentication (RFC 7616/7617).
//!
//! This crate answers 401/407 challenges for the registration engine:
//! - **Challenge parsing** from `WWW-Authenticate` / `Proxy-Authenticate`
//!   header values, with WWW and Proxy scopes tracked separately
//! - **Credential lookup** keyed by realm through a pluggable store
//! - **Authorization computation** for MD5 and SHA-256, qop=auth and the
//!   legacy no-qop form, with nonce-count tracking per responder
//!
//! # Example
//!
//! ```
//! use mooring_auth::{Challenge, ChallengeScope, Credentials, DigestResponder};
//! use mooring_core::Method;
//!
//! let challenge = Challenge::parse(
//!     ChallengeScope::Www,
//!     "Digest realm=\"example.com\", nonce=\"abc123\", qop=\"auth\"",
//! ).unwrap();
//!
//! let creds = Credentials::new("example.com", "alice", "secret");
//! let mut responder = DigestResponder::new();
//! let header = responder.authorization_for(
//!     &creds, &challenge, &Method::Register, "sip:example.com",
//! );
//! assert!(header.starts_with("Digest username=\"alice\""));
//! ```

pub mod challenge;
pub mod credentials;
pub mod digest;

pub use challenge::{Challenge, ChallengeScope, DigestAlgorithm, Qop};
pub use credentials::{CredentialStore, Credentials, MemoryCredentialStore};
pub use digest::DigestResponder;
