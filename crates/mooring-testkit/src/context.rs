use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mooring_auth::{Credentials, MemoryCredentialStore};
use mooring_core::{Method, Response, ViaHeader};
use mooring_reg::clock::VirtualClock;
use mooring_reg::{RegistrarEngine, SessionEvent, TransportKind};

use crate::builders;
use crate::transport::{MockTransport, SentRequest, TransportHandle};

/// Default local address the engine binds in tests.
pub const LOCAL_ADDR: &str = "10.0.0.2:5060";

/// Per-test context owning the engine and every collaborator.
///
/// One context per test; dropping it drops everything. No global state.
pub struct TestContext {
    pub engine: RegistrarEngine,
    pub transport: TransportHandle,
    pub clock: Arc<VirtualClock>,
    pub credentials: Arc<MemoryCredentialStore>,
}

impl TestContext {
    pub fn new(kind: TransportKind) -> Self {
        let local: SocketAddr = LOCAL_ADDR.parse().unwrap();
        let (transport, handle) = MockTransport::new(kind, local);
        let clock = Arc::new(VirtualClock::new());
        let credentials = Arc::new(MemoryCredentialStore::new());

        let engine = RegistrarEngine::new(
            Box::new(transport),
            credentials.clone(),
            clock.clone(),
        );

        Self {
            engine,
            transport: handle,
            clock,
            credentials,
        }
    }

    /// Adds credentials for a realm.
    pub fn add_credentials(&self, realm: &str, username: &str, secret: &str) {
        self.credentials
            .add(Credentials::new(realm, username, secret));
    }

    /// Advances the virtual clock, firing due timers in order.
    pub fn advance(&mut self, duration: Duration) {
        self.engine.advance_clock(duration);
    }

    /// Advances the virtual clock by whole seconds.
    pub fn advance_secs(&mut self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Pops the next captured request, asserting its method.
    ///
    /// Panics when nothing was sent or the method differs; the panic message
    /// names what was expected, which keeps scenario failures readable.
    pub fn expect_request(&mut self, method: Method) -> SentRequest {
        let sent = self
            .transport
            .next_sent()
            .unwrap_or_else(|| panic!("expected a {} request, nothing was sent", method));
        assert_eq!(
            sent.method(),
            &method,
            "expected a {} request, got {}",
            method,
            sent.method()
        );
        sent
    }

    /// Asserts the engine has sent nothing (else).
    pub fn expect_no_request(&mut self) {
        if let Some(sent) = self.transport.next_sent() {
            panic!("expected no request, but {} was sent", sent.method());
        }
    }

    /// Injects a response for the given captured request.
    pub fn respond(&mut self, sent: &SentRequest, response: Response) {
        self.transport.answered();
        self.engine.on_response(sent.txn, response);
    }

    /// Times out the given captured request.
    pub fn timeout(&mut self, sent: &SentRequest) {
        self.transport.answered();
        self.engine.on_timeout(sent.txn);
    }

    /// Answers a REGISTER with 200 OK echoing its contacts, optionally
    /// through a NAT that rewrites the reflected Via.
    pub fn ok_for_register(&self, sent: &SentRequest, natted: Option<&ViaHeader>) -> Response {
        builders::ok_for_register(sent, natted, &[])
    }

    /// Drains engine events accumulated so far.
    pub fn events(&mut self) -> Vec<SessionEvent> {
        self.engine.drain_events()
    }
}
