use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mooring_core::{ContactHeader, Method, Request, ViaHeader};
use mooring_reg::{Transport, TransportKind, TxnId};

/// A request captured by the mock transport.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub txn: TxnId,
    pub request: Request,
}

impl SentRequest {
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// The Via the engine sent, parsed.
    pub fn via(&self) -> ViaHeader {
        ViaHeader::parse(
            self.request
                .headers
                .get("Via")
                .expect("request carries a Via")
                .as_str(),
        )
        .expect("request Via parses")
    }

    /// All Contact entries of the request, in header order.
    pub fn contacts(&self) -> Vec<ContactHeader> {
        self.request
            .headers
            .get_all("Contact")
            .flat_map(|v| ContactHeader::parse_list(v.as_str()))
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(name).map(|v| v.as_str())
    }
}

struct Inner {
    kind: TransportKind,
    local: SocketAddr,
    connected_port: Option<u16>,
    sent: VecDeque<SentRequest>,
    outstanding: usize,
    shutdowns: Vec<Duration>,
}

/// Scripted transport: records everything the engine sends, answers nothing
/// by itself. Tests pull requests off the queue and inject responses through
/// the engine.
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

/// Cloneable test-side handle onto the mock transport's state.
#[derive(Clone)]
pub struct TransportHandle {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub fn new(kind: TransportKind, local: SocketAddr) -> (Self, TransportHandle) {
        // Connection-oriented transports get a distinct ephemeral source
        // port, like a real outgoing connection would.
        let connected_port = kind.is_reliable().then_some(49152);
        let inner = Arc::new(Mutex::new(Inner {
            kind,
            local,
            connected_port,
            sent: VecDeque::new(),
            outstanding: 0,
            shutdowns: Vec::new(),
        }));
        (
            Self {
                inner: inner.clone(),
            },
            TransportHandle { inner },
        )
    }
}

impl Transport for MockTransport {
    fn send(&mut self, txn: TxnId, request: Request) {
        let mut inner = self.inner.lock().unwrap();
        inner.outstanding += 1;
        inner.sent.push_back(SentRequest { txn, request });
    }

    fn kind(&self) -> TransportKind {
        self.inner.lock().unwrap().kind
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.lock().unwrap().local
    }

    fn connected_port(&self) -> Option<u16> {
        self.inner.lock().unwrap().connected_port
    }

    fn shutdown(&mut self, linger: Duration) {
        self.inner.lock().unwrap().shutdowns.push(linger);
    }
}

impl TransportHandle {
    /// Pops the oldest captured request.
    pub fn next_sent(&self) -> Option<SentRequest> {
        self.inner.lock().unwrap().sent.pop_front()
    }

    /// Number of captured requests not yet pulled by the test.
    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().sent.len()
    }

    /// Number of requests sent since the last counter reset, answered or not.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().unwrap().outstanding
    }

    /// Marks one outstanding request as answered.
    pub fn answered(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.outstanding = inner.outstanding.saturating_sub(1);
    }

    /// Simulates the connection being torn down and re-established on a new
    /// ephemeral port.
    pub fn reconnect(&self, new_port: u16) {
        self.inner.lock().unwrap().connected_port = Some(new_port);
    }

    /// Linger durations from shutdown calls, for assertions.
    pub fn shutdowns(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().shutdowns.clone()
    }
}
