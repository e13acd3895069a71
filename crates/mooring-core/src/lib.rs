// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP message types for the mooring registration engine.
//!
//! This crate provides the value types the engine inspects and produces:
//! - **Messages**: [`Request`], [`Response`] with order-preserving [`Headers`]
//! - **URIs**: [`SipUri`] (sip/sips)
//! - **Typed header values**: [`ViaHeader`] (with `received`/`rport` access),
//!   [`ContactHeader`] / [`NameAddr`] (with contact-list parsing)
//! - **Methods**: [`Method`] (REGISTER, OPTIONS, extension tokens)
//!
//! It is deliberately not a general SIP parser: wire framing belongs to the
//! transport collaborator. Only the header *values* the registration engine
//! consumes get typed parsers here. Strings use [`SmolStr`](smol_str::SmolStr)
//! and bodies use [`Bytes`](bytes::Bytes), following the zero-copy-friendly
//! conventions of the rest of our stack.

pub mod contact;
pub mod headers;
pub mod method;
pub mod msg;
pub mod name_addr;
pub mod uri;
pub mod via;

pub use contact::ContactHeader;
pub use headers::{Header, Headers};
pub use method::Method;
pub use msg::{MessageError, Request, RequestLine, Response, StatusLine};
pub use name_addr::NameAddr;
pub use uri::SipUri;
pub use via::ViaHeader;
