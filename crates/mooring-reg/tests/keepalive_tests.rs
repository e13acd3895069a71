// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Keepalive probing: binding revalidation, probe authentication, and the
//! no-keepalive refresh-driven detection path.

use mooring_core::{Method, SipUri};
use mooring_reg::{
    OutboundMode, RegisterConfig, RegistrationEvent, SessionId, SessionState, TransportKind,
};
use mooring_testkit::{
    challenge_for, natted_via, ok_for_options, ok_for_register, TestContext,
};

fn config() -> RegisterConfig {
    RegisterConfig::new(
        SipUri::parse("sip:alice@example.com").unwrap(),
        SipUri::parse("sip:registrar.example.com").unwrap(),
    )
}

/// Drives an authenticated registration through a NAT: 401 with a rewritten
/// Via, then a 200 for the corrected dual-contact resubmission. Mirrors the
/// fixture every probing scenario starts from.
fn register_natted(ctx: &mut TestContext) -> SessionId {
    ctx.add_credentials("example.com", "alice", "secret");
    let id = ctx.engine.register(config());

    let first = ctx.expect_request(Method::Register);
    let via = natted_via(&first, "4.255.255.9", Some(9));
    ctx.respond(
        &first,
        challenge_for(&first, 401, "example.com", "n1", Some(&via)),
    );

    let second = ctx.expect_request(Method::Register);
    assert!(second.header("Authorization").is_some());
    let via = natted_via(&second, "4.255.255.9", Some(9));
    let ok = ok_for_register(&second, Some(&via), &[]);
    ctx.respond(&second, ok);

    assert_eq!(ctx.engine.session_state(id), Some(SessionState::Registered));
    assert_eq!(ctx.engine.outbound_mode(id), Some(OutboundMode::Active));
    ctx.events();
    id
}

#[test]
fn probe_authenticates_and_unchanged_binding_stays_quiet() {
    let mut ctx = TestContext::new(TransportKind::Udp);
    ctx.add_credentials("proxy.example.com", "alice", "secret");
    let id = register_natted(&mut ctx);

    // Outbound activation sends the initial validation probe immediately.
    let probe = ctx.expect_request(Method::Options);
    let via = natted_via(&probe, "4.255.255.9", Some(9));
    ctx.respond(
        &probe,
        challenge_for(&probe, 407, "proxy.example.com", "pn1", Some(&via)),
    );

    // The probe is resubmitted with Proxy-Authorization, once.
    let probe = ctx.expect_request(Method::Options);
    assert!(probe.header("Proxy-Authorization").is_some());
    let via = natted_via(&probe, "4.255.255.9", Some(9));
    ctx.respond(&probe, ok_for_options(&probe, Some(&via)));

    // Unchanged binding: no re-registration, session untouched.
    ctx.expect_no_request();
    assert_eq!(ctx.engine.session_state(id), Some(SessionState::Registered));
    assert!(ctx.events().is_empty());
}

#[test]
fn three_unchanged_probes_produce_zero_reregistrations() {
    let mut ctx = TestContext::new(TransportKind::Udp);
    let id = register_natted(&mut ctx);

    for _ in 0..3 {
        let probe = ctx.expect_request(Method::Options);
        let via = natted_via(&probe, "4.255.255.9", Some(9));
        ctx.respond(&probe, ok_for_options(&probe, Some(&via)));
        ctx.expect_no_request();
        // Next probe fires one keepalive interval after completion.
        ctx.advance_secs(120);
    }

    assert_eq!(ctx.engine.session_state(id), Some(SessionState::Registered));
    let events = ctx.events();
    assert!(events.is_empty(), "unexpected events: {:?}", events);
}

#[test]
fn changed_binding_probe_triggers_exactly_one_reregister() {
    let mut ctx = TestContext::new(TransportKind::Udp);
    let id = register_natted(&mut ctx);

    // First probe: binding unchanged.
    let probe = ctx.expect_request(Method::Options);
    let via = natted_via(&probe, "4.255.255.9", Some(9));
    ctx.respond(&probe, ok_for_options(&probe, Some(&via)));
    ctx.expect_no_request();

    // Second probe: the NAT rebound to a new public address.
    ctx.advance_secs(120);
    let probe = ctx.expect_request(Method::Options);
    let via = natted_via(&probe, "4.255.255.10", Some(9));
    ctx.respond(&probe, ok_for_options(&probe, Some(&via)));

    let events = ctx.events();
    assert!(events
        .iter()
        .any(|e| matches!(e.event, RegistrationEvent::BindingChanged { .. })));

    // Exactly one corrective re-REGISTER, already authenticated, offering
    // the new binding.
    let register = ctx.expect_request(Method::Register);
    assert!(register.header("Authorization").is_some());
    assert!(register
        .contacts()
        .iter()
        .any(|c| c.uri().host.as_str() == "4.255.255.10"));
    ctx.expect_no_request();

    let via = natted_via(&register, "4.255.255.10", Some(9));
    let ok = ok_for_register(&register, Some(&via), &[]);
    ctx.respond(&register, ok);

    assert_eq!(ctx.engine.session_state(id), Some(SessionState::Registered));
    let current = ctx.engine.current_contact(id).unwrap();
    assert_eq!(current.uri().host.as_str(), "4.255.255.10");

    // The contact set has exactly one entry matching the new binding.
    let matching = ctx
        .engine
        .contact_bindings(id)
        .unwrap()
        .iter()
        .filter(|b| b.contact.uri().host.as_str() == "4.255.255.10")
        .count();
    assert_eq!(matching, 1);
}

#[test]
fn failed_probe_is_nonfatal_and_probing_continues() {
    let mut ctx = TestContext::new(TransportKind::Udp);
    let id = register_natted(&mut ctx);

    let probe = ctx.expect_request(Method::Options);
    ctx.timeout(&probe);

    let events = ctx.events();
    assert!(events
        .iter()
        .any(|e| matches!(e.event, RegistrationEvent::ProbeFailed { consecutive: 1 })));
    assert_eq!(ctx.engine.session_state(id), Some(SessionState::Registered));

    // Probing resumes on the next interval.
    ctx.advance_secs(120);
    let probe = ctx.expect_request(Method::Options);
    let via = natted_via(&probe, "4.255.255.9", Some(9));
    ctx.respond(&probe, ok_for_options(&probe, Some(&via)));
    assert_eq!(ctx.engine.session_state(id), Some(SessionState::Registered));
}

#[test]
fn no_options_keepalive_disables_probing_but_corrects_contact() {
    let mut ctx = TestContext::new(TransportKind::Udp);
    ctx.add_credentials("example.com", "alice", "secret");
    let id = ctx
        .engine
        .register(config().with_outbound("no-options-keepalive"));

    let first = ctx.expect_request(Method::Register);
    let via = natted_via(&first, "4.255.255.9", Some(9));
    ctx.respond(
        &first,
        challenge_for(&first, 401, "example.com", "n1", Some(&via)),
    );

    // With probing disabled a single corrected contact is registered.
    let second = ctx.expect_request(Method::Register);
    let contacts = second.contacts();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].uri().host.as_str(), "4.255.255.9");

    let via = natted_via(&second, "4.255.255.9", Some(9));
    let ok = ok_for_register(&second, Some(&via), &[]);
    ctx.respond(&second, ok);

    assert_eq!(ctx.engine.session_state(id), Some(SessionState::Registered));
    assert_eq!(ctx.engine.outbound_mode(id), Some(OutboundMode::Disabled));

    // No probes, ever.
    ctx.advance_secs(600);
    ctx.expect_no_request();
}

#[test]
fn refresh_detects_binding_change_without_probes() {
    let mut ctx = TestContext::new(TransportKind::Udp);
    ctx.add_credentials("example.com", "alice", "secret");
    let id = ctx
        .engine
        .register(config().with_outbound("no-options-keepalive"));

    let first = ctx.expect_request(Method::Register);
    let via = natted_via(&first, "4.255.255.9", Some(9));
    ctx.respond(
        &first,
        challenge_for(&first, 401, "example.com", "n1", Some(&via)),
    );
    let second = ctx.expect_request(Method::Register);
    let via = natted_via(&second, "4.255.255.9", Some(9));
    let ok = ok_for_register(&second, Some(&via), &[]);
    ctx.respond(&second, ok);
    ctx.events();

    // At refresh time the NAT has rebound; the refresh response's Via shows
    // the new source address.
    ctx.advance_secs(3600);
    let refresh = ctx.expect_request(Method::Register);
    assert!(refresh.header("Authorization").is_some());
    let via = natted_via(&refresh, "4.255.255.10", Some(9));
    let ok = ok_for_register(&refresh, Some(&via), &[]);
    ctx.respond(&refresh, ok);

    // One corrective cycle with the new contact.
    let corrective = ctx.expect_request(Method::Register);
    let contacts = corrective.contacts();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].uri().host.as_str(), "4.255.255.10");

    let via = natted_via(&corrective, "4.255.255.10", Some(9));
    let ok = ok_for_register(&corrective, Some(&via), &[]);
    ctx.respond(&corrective, ok);

    assert_eq!(ctx.engine.session_state(id), Some(SessionState::Registered));
    let current = ctx.engine.current_contact(id).unwrap();
    assert_eq!(current.uri().host.as_str(), "4.255.255.10");
}

#[test]
fn no_validate_ignores_probe_detected_changes() {
    let mut ctx = TestContext::new(TransportKind::Udp);
    ctx.add_credentials("example.com", "alice", "secret");
    let id = ctx.engine.register(config().with_outbound("no-validate"));

    let first = ctx.expect_request(Method::Register);
    let via = natted_via(&first, "4.255.255.9", Some(9));
    ctx.respond(
        &first,
        challenge_for(&first, 401, "example.com", "n1", Some(&via)),
    );
    let second = ctx.expect_request(Method::Register);
    let via = natted_via(&second, "4.255.255.9", Some(9));
    let ok = ok_for_register(&second, Some(&via), &[]);
    ctx.respond(&second, ok);
    ctx.events();

    // Keepalive still runs (only validation is off) and notices the change,
    // but no re-registration follows.
    let probe = ctx.expect_request(Method::Options);
    let via = natted_via(&probe, "4.255.255.10", Some(9));
    ctx.respond(&probe, ok_for_options(&probe, Some(&via)));

    let events = ctx.events();
    assert!(events
        .iter()
        .any(|e| matches!(e.event, RegistrationEvent::BindingChanged { .. })));
    ctx.expect_no_request();
    assert_eq!(ctx.engine.session_state(id), Some(SessionState::Registered));
}
