// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

/// Example demonstrating a registration through a NAT.
///
/// This example drives the engine against the testkit's scripted transport:
/// 1. Send the initial REGISTER with the direct contact
/// 2. Receive a 200 whose Via reveals the rewritten source address
/// 3. Re-REGISTER with both the direct and the NAT-observed contact
/// 4. Watch outbound keepalive probing start
use mooring_core::{Method, SipUri};
use mooring_reg::{RegisterConfig, TransportKind};
use mooring_testkit::{natted_via, ok_for_register, TestContext};

fn main() {
    tracing_subscriber::fmt::init();

    let mut ctx = TestContext::new(TransportKind::Udp);
    let config = RegisterConfig::new(
        SipUri::parse("sip:alice@example.com").expect("valid AOR"),
        SipUri::parse("sip:registrar.example.com").expect("valid registrar"),
    );
    let session = ctx.engine.register(config);

    // The first REGISTER carries the contact we believe in.
    let first = ctx.expect_request(Method::Register);
    println!("--- initial REGISTER ---");
    println!("Contact: {}", first.header("Contact").unwrap());

    // The registrar reflects the source address it actually saw.
    let via = natted_via(&first, "4.255.255.9", Some(9));
    println!("\nserver reflects: {}", via);
    let ok = ok_for_register(&first, Some(&via), &[]);
    ctx.respond(&first, ok);

    // The engine corrects the registration with a dual contact.
    let second = ctx.expect_request(Method::Register);
    println!("\n--- corrective REGISTER ---");
    for contact in second.contacts() {
        println!("Contact: {}", contact);
    }

    let via = natted_via(&second, "4.255.255.9", Some(9));
    let ok = ok_for_register(&second, Some(&via), &[]);
    ctx.respond(&second, ok);

    println!("\n--- registered ---");
    println!(
        "current contact: {}",
        ctx.engine.current_contact(session).unwrap()
    );
    println!("outbound mode: {:?}", ctx.engine.outbound_mode(session).unwrap());

    // Outbound is active, so the binding is validated immediately.
    let probe = ctx.expect_request(Method::Options);
    println!("keepalive probe sent: CSeq {}", probe.header("CSeq").unwrap());

    for event in ctx.events() {
        println!("event: {:?}", event.event);
    }
}
