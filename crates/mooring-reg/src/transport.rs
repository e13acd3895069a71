use std::net::SocketAddr;
use std::time::Duration;

use mooring_core::Request;

/// Indicates which transport carries the registration traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Udp,
    Tcp,
    Tls,
}

impl TransportKind {
    /// Returns the lowercase transport string for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tls",
        }
    }

    /// Returns the Via header transport parameter value per RFC 3261.
    pub fn via_transport(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
        }
    }

    /// Parses a transport string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Some(TransportKind::Udp),
            "tcp" => Some(TransportKind::Tcp),
            "tls" => Some(TransportKind::Tls),
            _ => None,
        }
    }

    /// Returns true if this is a connection-oriented transport (TCP or TLS).
    pub fn is_reliable(self) -> bool {
        matches!(self, TransportKind::Tcp | TransportKind::Tls)
    }
}

/// Correlates an outgoing request with the response or timeout event that
/// eventually answers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(pub u64);

/// The message transport collaborator.
///
/// The engine hands requests to `send` and receives the outcome through
/// [`RegistrarEngine::on_response`](crate::RegistrarEngine::on_response) /
/// [`RegistrarEngine::on_timeout`](crate::RegistrarEngine::on_timeout);
/// framing, retransmission, and socket management live behind this trait.
pub trait Transport: Send {
    /// Queues a request for transmission, correlated by `txn`.
    fn send(&mut self, txn: TxnId, request: Request);

    /// Transport kind in use for this registration.
    fn kind(&self) -> TransportKind;

    /// The locally bound address.
    fn local_addr(&self) -> SocketAddr;

    /// For connection-oriented transports, the connection's actual local
    /// port. This is the port the server sees, which is not the bound port.
    fn connected_port(&self) -> Option<u16>;

    /// Closes the transport, lingering up to the given duration so queued
    /// messages drain.
    fn shutdown(&mut self, linger: Duration);
}

/// Connection lifecycle notifications from a connection-oriented transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection dropped and was re-established; the new connection has
    /// a new local port and therefore (behind a NAT) a new binding.
    Reconnected { local_port: u16 },
    /// The connection dropped and could not be re-established.
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_classification() {
        assert!(!TransportKind::Udp.is_reliable());
        assert!(TransportKind::Tcp.is_reliable());
        assert!(TransportKind::Tls.is_reliable());
    }

    #[test]
    fn parse_accepts_via_tokens() {
        assert_eq!(TransportKind::parse("UDP"), Some(TransportKind::Udp));
        assert_eq!(TransportKind::parse("tcp"), Some(TransportKind::Tcp));
        assert_eq!(TransportKind::parse("sctp"), None);
    }
}
