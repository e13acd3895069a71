// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Registration request construction and challenge resolution.
//!
//! The engine decides *when* to send; this module decides *what* goes on the
//! wire: REGISTER/OPTIONS assembly, contact construction, and the Digest
//! answer cycle with its one-retry-per-scope cap.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use mooring_auth::{Challenge, ChallengeScope, CredentialStore, DigestResponder};
use mooring_core::{
    ContactHeader, Headers, Method, NameAddr, Request, RequestLine, Response, SipUri, ViaHeader,
};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use smol_str::SmolStr;
use tracing::warn;

use crate::error::RegError;
use crate::nat::NatBinding;
use crate::outbound::{OutboundOptions, DEFAULT_KEEPALIVE_INTERVAL};
use crate::session::RegistrationSession;

const USER_AGENT: &str = "mooring/0.1.0";

/// Configuration for one registration session.
///
/// Everything except the AOR and registrar has a documented default.
#[derive(Debug, Clone)]
pub struct RegisterConfig {
    /// Address of record being registered.
    pub aor: SipUri,
    /// Registrar the REGISTER is sent to.
    pub registrar: SipUri,
    /// Requested registration lifetime in seconds (default 3600).
    pub expires: u32,
    /// Outbound behavior tokens (default: keepalive and validation enabled).
    pub outbound: OutboundOptions,
    /// Optional `+sip.instance` identifier attached to our contacts.
    pub instance_id: Option<SmolStr>,
    /// Interval between keepalive probes (default 120 s).
    pub keepalive_interval: Duration,
}

impl RegisterConfig {
    /// Builds a configuration from URI strings, for assembly surfaces that
    /// start from text (CLI, config files).
    pub fn parse(aor: &str, registrar: &str) -> Result<Self> {
        let aor = SipUri::parse(aor).ok_or_else(|| anyhow!("invalid AOR URI: {}", aor))?;
        let registrar =
            SipUri::parse(registrar).ok_or_else(|| anyhow!("invalid registrar URI: {}", registrar))?;
        Ok(Self::new(aor, registrar))
    }

    pub fn new(aor: SipUri, registrar: SipUri) -> Self {
        Self {
            aor,
            registrar,
            expires: 3600,
            outbound: OutboundOptions::default(),
            instance_id: None,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }

    /// Sets the requested registration lifetime in seconds.
    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    /// Parses and applies an outbound token string such as
    /// `"no-options-keepalive, no-validate"`.
    pub fn with_outbound(mut self, tokens: &str) -> Self {
        self.outbound = OutboundOptions::parse(tokens);
        self
    }

    /// Sets the instance identifier advertised in our contacts.
    pub fn with_instance_id(mut self, instance: &str) -> Self {
        self.instance_id = Some(SmolStr::new(instance));
        self
    }

    /// Overrides the keepalive probe interval.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }
}

/// Generates a Via branch parameter with the RFC 3261 magic cookie.
pub fn generate_branch() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("z9hG4bK{}", suffix)
}

/// Generates a From tag.
pub fn generate_tag() -> SmolStr {
    let tag: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    SmolStr::new(tag)
}

/// Generates a Call-ID.
pub fn generate_call_id() -> SmolStr {
    let id: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    SmolStr::new(format!("{}@mooring", id))
}

/// Builds the direct contact advertising our locally bound address.
pub fn direct_contact(session: &RegistrationSession, local: SocketAddr) -> ContactHeader {
    contact_for_addr(session, local.ip(), local.port())
}

/// Builds the NAT-observed contact advertising the server-visible binding.
pub fn nat_contact(session: &RegistrationSession, binding: &NatBinding) -> ContactHeader {
    contact_for_addr(session, binding.addr, binding.port)
}

fn contact_for_addr(
    session: &RegistrationSession,
    addr: std::net::IpAddr,
    port: u16,
) -> ContactHeader {
    let host = match addr {
        std::net::IpAddr::V6(v6) => SmolStr::new(format!("[{}]", v6)),
        std::net::IpAddr::V4(v4) => SmolStr::new(v4.to_string()),
    };

    let mut uri = SipUri::new(host);
    uri.user = session.aor.user.clone();
    uri.port = Some(port);
    if session.transport.is_reliable() {
        uri.params.insert(
            SmolStr::new("transport"),
            Some(SmolStr::new(session.transport.as_str())),
        );
    }

    let mut name_addr = NameAddr::from_uri(uri);
    if let Some(instance) = &session.instance_id {
        name_addr.params.insert(
            SmolStr::new("+sip.instance"),
            Some(instance.clone()),
        );
    }
    ContactHeader(name_addr)
}

/// Assembles a REGISTER for the session, attaching fresh authorization for
/// every cached challenge scope.
///
/// Returns the request and the Via we sent, which the NAT detector compares
/// against the reflection in the response.
pub fn build_register(
    session: &mut RegistrationSession,
    local: SocketAddr,
    contacts: &[ContactHeader],
    expires: u32,
    store: &dyn CredentialStore,
    responder: &mut DigestResponder,
) -> (Request, ViaHeader) {
    let cseq = session.next_cseq();
    let via = build_via(session, local);
    let mut headers = base_headers(session, &via, cseq, Method::Register);

    for contact in contacts {
        headers.push(SmolStr::new("Contact"), SmolStr::new(contact.to_string()));
    }
    headers.push(SmolStr::new("Expires"), SmolStr::new(expires.to_string()));

    attach_authorization(session, &mut headers, Method::Register, store, responder);
    finish_headers(&mut headers);

    let request = Request::new(
        RequestLine::new(Method::Register, session.registrar.clone()),
        headers,
        Bytes::new(),
    );
    (request, via)
}

/// Assembles an OPTIONS keepalive probe for the session.
pub fn build_options(
    session: &mut RegistrationSession,
    local: SocketAddr,
    store: &dyn CredentialStore,
    responder: &mut DigestResponder,
) -> (Request, ViaHeader) {
    let cseq = session.next_cseq();
    let via = build_via(session, local);
    let mut headers = base_headers(session, &via, cseq, Method::Options);

    attach_authorization(session, &mut headers, Method::Options, store, responder);
    finish_headers(&mut headers);

    let request = Request::new(
        RequestLine::new(Method::Options, session.registrar.clone()),
        headers,
        Bytes::new(),
    );
    (request, via)
}

fn build_via(session: &RegistrationSession, local: SocketAddr) -> ViaHeader {
    let mut via = ViaHeader::new(
        session.transport.via_transport(),
        local.to_string(),
    );
    let branch = generate_branch();
    via.set_param("branch", Some(branch.as_str()));
    // Solicit received/rport reflection (RFC 3581).
    via.set_param("rport", None);
    via
}

fn base_headers(
    session: &RegistrationSession,
    via: &ViaHeader,
    cseq: u32,
    method: Method,
) -> Headers {
    let mut headers = Headers::new();
    headers.push(SmolStr::new("Via"), SmolStr::new(via.to_string()));
    headers.push(SmolStr::new("Max-Forwards"), SmolStr::new("70"));
    headers.push(
        SmolStr::new("From"),
        SmolStr::new(format!("<{}>;tag={}", session.aor, session.from_tag)),
    );
    headers.push(SmolStr::new("To"), SmolStr::new(format!("<{}>", session.aor)));
    headers.push(SmolStr::new("Call-ID"), session.call_id.clone());
    headers.push(
        SmolStr::new("CSeq"),
        SmolStr::new(format!("{} {}", cseq, method.as_str())),
    );
    headers
}

fn finish_headers(headers: &mut Headers) {
    headers.push(SmolStr::new("User-Agent"), SmolStr::new(USER_AGENT));
    headers.push(SmolStr::new("Content-Length"), SmolStr::new("0"));
}

/// Recomputes and attaches Authorization/Proxy-Authorization for every cached
/// challenge, WWW scope first for deterministic header order.
fn attach_authorization(
    session: &RegistrationSession,
    headers: &mut Headers,
    method: Method,
    store: &dyn CredentialStore,
    responder: &mut DigestResponder,
) {
    let uri = session.registrar.to_string();
    for scope in [ChallengeScope::Www, ChallengeScope::Proxy] {
        let Some(challenge) = session.cached_challenges.get(&scope) else {
            continue;
        };
        let Some(creds) = store.lookup(challenge.realm.as_str()) else {
            warn!(
                realm = challenge.realm.as_str(),
                "credentials for cached challenge vanished from the store"
            );
            continue;
        };
        let value = responder.authorization_for(&creds, challenge, &method, &uri);
        headers.push(
            SmolStr::new(scope.authorization_header()),
            SmolStr::new(value),
        );
    }
}

/// Applies a 401/407 REGISTER response to the session's challenge state.
///
/// The scope matching the status code is the one that failed: repeating
/// with an unchanged nonce after we already answered it is fatal. A
/// challenge for the other scope included in the same response merely
/// refreshes the cached nonce.
pub fn apply_register_challenges(
    session: &mut RegistrationSession,
    response: &Response,
    store: &dyn CredentialStore,
) -> Result<(), RegError> {
    let failed_scope = if response.code() == 401 {
        ChallengeScope::Www
    } else {
        ChallengeScope::Proxy
    };

    let challenges = Challenge::from_response(response);
    let Some(failed) = challenges.iter().find(|c| c.scope == failed_scope) else {
        return Err(RegError::ProtocolViolation {
            detail: SmolStr::new("challenge status without a Digest challenge header"),
        });
    };

    if session.answered_nonces.get(&failed_scope) == Some(&failed.nonce) {
        return Err(RegError::ChallengeExhausted {
            scope: failed_scope,
            realm: failed.realm.clone(),
        });
    }

    if store.lookup(failed.realm.as_str()).is_none() {
        return Err(RegError::ChallengeExhausted {
            scope: failed_scope,
            realm: failed.realm.clone(),
        });
    }

    session
        .answered_nonces
        .insert(failed_scope, failed.nonce.clone());
    session.cached_challenges.insert(failed_scope, failed.clone());

    // The other scope, when present, just keeps our cached answer current.
    for challenge in challenges.iter().filter(|c| c.scope != failed_scope) {
        let stale = session
            .cached_challenges
            .get(&challenge.scope)
            .map(|cached| cached.nonce != challenge.nonce)
            .unwrap_or(true);
        if stale {
            session
                .cached_challenges
                .insert(challenge.scope, challenge.clone());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keepalive::Prober;
    use crate::outbound::OutboundState;
    use crate::session::{SessionId, SessionState};
    use crate::transport::TransportKind;
    use mooring_auth::{Credentials, MemoryCredentialStore};
    use std::collections::HashMap;

    fn sample_session(transport: TransportKind) -> RegistrationSession {
        RegistrationSession {
            id: SessionId(1),
            aor: SipUri::parse("sip:alice@example.com").unwrap(),
            registrar: SipUri::parse("sip:example.com").unwrap(),
            transport,
            state: SessionState::Unregistered,
            options: OutboundOptions::default(),
            instance_id: None,
            requested_expires: 3600,
            call_id: generate_call_id(),
            from_tag: generate_tag(),
            cseq: 0,
            contacts: Vec::new(),
            current_contact: None,
            binding: None,
            nat_present: false,
            outbound: OutboundState::new(DEFAULT_KEEPALIVE_INTERVAL),
            in_flight: None,
            cached_challenges: HashMap::new(),
            answered_nonces: HashMap::new(),
            contact_retry_done: false,
            pending_revalidate: false,
            pending_unregister: false,
            refresh_timer: None,
            expiry_timer: None,
            expiry_at: None,
            prober: Prober::default(),
        }
    }

    fn local() -> SocketAddr {
        "10.0.0.2:5060".parse().unwrap()
    }

    #[test]
    fn register_carries_contact_expires_and_cseq() {
        let mut session = sample_session(TransportKind::Udp);
        let store = MemoryCredentialStore::new();
        let mut responder = DigestResponder::new();
        let contacts = vec![direct_contact(&session, local())];

        let (request, via) = build_register(
            &mut session,
            local(),
            &contacts,
            3600,
            &store,
            &mut responder,
        );

        assert_eq!(request.method(), &Method::Register);
        assert_eq!(request.headers.get("CSeq").unwrap().as_str(), "1 REGISTER");
        assert_eq!(request.headers.get("Expires").unwrap().as_str(), "3600");
        assert_eq!(
            request.headers.get("Contact").unwrap().as_str(),
            "<sip:alice@10.0.0.2:5060>"
        );
        assert!(via.param("rport").is_some());
        assert!(via
            .param("branch")
            .and_then(|b| b.as_deref())
            .unwrap()
            .starts_with("z9hG4bK"));

        // Second build increments CSeq.
        let (request, _) = build_register(
            &mut session,
            local(),
            &contacts,
            3600,
            &store,
            &mut responder,
        );
        assert_eq!(request.headers.get("CSeq").unwrap().as_str(), "2 REGISTER");
    }

    #[test]
    fn reliable_transport_contact_carries_transport_param() {
        let session = sample_session(TransportKind::Tcp);
        let contact = direct_contact(&session, local());
        assert_eq!(contact.uri().transport_param(), Some("tcp"));
        assert!(contact.to_string().contains("transport=tcp"));
    }

    #[test]
    fn cached_challenges_produce_both_authorization_headers() {
        let mut session = sample_session(TransportKind::Udp);
        session.cached_challenges.insert(
            ChallengeScope::Www,
            Challenge::parse(
                ChallengeScope::Www,
                "Digest realm=\"inner\", nonce=\"n1\"",
            )
            .unwrap(),
        );
        session.cached_challenges.insert(
            ChallengeScope::Proxy,
            Challenge::parse(
                ChallengeScope::Proxy,
                "Digest realm=\"outer\", nonce=\"n2\"",
            )
            .unwrap(),
        );

        let store = MemoryCredentialStore::with(vec![
            Credentials::new("inner", "alice", "secret"),
            Credentials::new("outer", "alice", "secret"),
        ]);
        let mut responder = DigestResponder::new();
        let contacts = vec![direct_contact(&session, local())];

        let (request, _) = build_register(
            &mut session,
            local(),
            &contacts,
            3600,
            &store,
            &mut responder,
        );

        assert!(request.headers.get("Authorization").is_some());
        assert!(request.headers.get("Proxy-Authorization").is_some());
    }

    #[test]
    fn unchanged_nonce_after_answer_is_exhausted() {
        let mut session = sample_session(TransportKind::Udp);
        let store =
            MemoryCredentialStore::with(vec![Credentials::new("example.com", "alice", "pw")]);

        let mut headers = Headers::new();
        headers.push(
            SmolStr::new("WWW-Authenticate"),
            SmolStr::new("Digest realm=\"example.com\", nonce=\"n1\""),
        );
        let response = Response::new(
            mooring_core::StatusLine::new(401, "Unauthorized").unwrap(),
            headers,
            Bytes::new(),
        );

        assert!(apply_register_challenges(&mut session, &response, &store).is_ok());

        let err = apply_register_challenges(&mut session, &response, &store).unwrap_err();
        assert!(matches!(err, RegError::ChallengeExhausted { .. }));
    }

    #[test]
    fn missing_credentials_are_exhausted_immediately() {
        let mut session = sample_session(TransportKind::Udp);
        let store = MemoryCredentialStore::new();

        let mut headers = Headers::new();
        headers.push(
            SmolStr::new("Proxy-Authenticate"),
            SmolStr::new("Digest realm=\"unknown\", nonce=\"n1\""),
        );
        let response = Response::new(
            mooring_core::StatusLine::new(407, "Proxy Authentication Required").unwrap(),
            headers,
            Bytes::new(),
        );

        let err = apply_register_challenges(&mut session, &response, &store).unwrap_err();
        assert!(matches!(
            err,
            RegError::ChallengeExhausted {
                scope: ChallengeScope::Proxy,
                ..
            }
        ));
    }
}
