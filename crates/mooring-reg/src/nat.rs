// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! NAT binding detection from reflected Via parameters.
//!
//! A server that supports rport/received reflection (RFC 3581) echoes our Via
//! with the source address it actually saw. Comparing that against the address
//! we bound locally tells us whether a NAT sits in between, and what the
//! public ("NAT-observed") binding is.

use std::net::{IpAddr, SocketAddr};

use mooring_core::ViaHeader;

/// The public address the server observed our traffic originating from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NatBinding {
    pub addr: IpAddr,
    pub port: u16,
}

impl std::fmt::Display for NatBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.addr {
            IpAddr::V6(v6) => write!(f, "[{}]:{}", v6, self.port),
            IpAddr::V4(v4) => write!(f, "{}:{}", v4, self.port),
        }
    }
}

/// Result of inspecting one reflected Via.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingObservation {
    /// True when the server saw a different source address than we bound.
    pub nat_present: bool,
    /// The address the server saw (falls back to the local address for
    /// components the server did not reflect).
    pub binding: NatBinding,
}

/// Computes the apparent public binding from a response's top Via.
///
/// `local` is the locally bound address. For connection-oriented transports
/// `connected_port` must carry the connection's actual local port, since that
/// (not the bound listening port) is what the peer observes.
///
/// Pure function of its inputs; the reflected Via is the one the server sent
/// back carrying `received=` / `rport=`.
pub fn observe(
    reflected: &ViaHeader,
    local: SocketAddr,
    connected_port: Option<u16>,
) -> BindingObservation {
    let comparison_port = connected_port.unwrap_or_else(|| local.port());

    let observed_addr = reflected
        .received()
        .and_then(|r| r.parse::<IpAddr>().ok())
        .unwrap_or_else(|| local.ip());

    let observed_port = reflected.rport().unwrap_or(comparison_port);

    BindingObservation {
        nat_present: observed_addr != local.ip() || observed_port != comparison_port,
        binding: NatBinding {
            addr: observed_addr,
            port: observed_port,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> SocketAddr {
        "10.0.0.2:5060".parse().unwrap()
    }

    fn via(value: &str) -> ViaHeader {
        ViaHeader::parse(value).unwrap()
    }

    #[test]
    fn unreflected_via_means_no_nat() {
        let reflected = via("SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKa");
        let obs = observe(&reflected, local(), None);
        assert!(!obs.nat_present);
        assert_eq!(obs.binding.to_string(), "10.0.0.2:5060");
    }

    #[test]
    fn received_mismatch_detects_nat() {
        let reflected =
            via("SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKa;received=4.255.255.9;rport=9");
        let obs = observe(&reflected, local(), None);
        assert!(obs.nat_present);
        assert_eq!(obs.binding.to_string(), "4.255.255.9:9");
    }

    #[test]
    fn rport_mismatch_alone_detects_nat() {
        let reflected = via("SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKa;rport=9");
        let obs = observe(&reflected, local(), None);
        assert!(obs.nat_present);
        assert_eq!(obs.binding.addr, local().ip());
        assert_eq!(obs.binding.port, 9);
    }

    #[test]
    fn matching_received_is_not_nat() {
        let reflected = via("SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKa;received=10.0.0.2");
        let obs = observe(&reflected, local(), None);
        assert!(!obs.nat_present);
    }

    #[test]
    fn tcp_compares_against_the_connection_port() {
        // Over TCP the peer sees the connection's ephemeral source port, so
        // an echoed rport equal to that port is not a NAT signal.
        let reflected =
            via("SIP/2.0/TCP 10.0.0.2:5060;branch=z9hG4bKa;received=10.0.0.2;rport=49152");
        let obs = observe(&reflected, local(), Some(49152));
        assert!(!obs.nat_present);

        // A rewritten source address still is.
        let reflected =
            via("SIP/2.0/TCP 10.0.0.2:5060;branch=z9hG4bKa;received=4.255.255.9;rport=49152");
        let obs = observe(&reflected, local(), Some(49152));
        assert!(obs.nat_present);
        assert_eq!(obs.binding.to_string(), "4.255.255.9:49152");
    }
}
