// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

/// Parsed representation of a SIP URI (RFC 3261 §19), trimmed to the parts a
/// registration engine routes and compares on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    pub sips: bool,
    pub user: Option<SmolStr>,
    pub host: SmolStr,
    pub port: Option<u16>,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
}

impl SipUri {
    /// Constructs a `sip:` URI with the given host and default settings.
    pub fn new(host: SmolStr) -> Self {
        Self {
            sips: false,
            user: None,
            host,
            port: None,
            params: BTreeMap::new(),
        }
    }

    /// Attempts to parse a SIP or SIPS URI from the provided string.
    pub fn parse(input: &str) -> Option<Self> {
        let (scheme, rest) = input.trim().split_once(':')?;
        let sips = scheme.eq_ignore_ascii_case("sips");
        if !sips && !scheme.eq_ignore_ascii_case("sip") {
            return None;
        }

        // Headers (?key=value) never matter to registration targets.
        let addr_part = rest.split_once('?').map(|(a, _)| a).unwrap_or(rest);

        let mut params = BTreeMap::new();
        let mut addr_iter = addr_part.split(';');
        let base = addr_iter.next()?.trim();
        for param in addr_iter {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            if let Some((k, v)) = param.split_once('=') {
                params.insert(
                    SmolStr::new(k.trim().to_ascii_lowercase()),
                    Some(SmolStr::new(v.trim().to_owned())),
                );
            } else {
                params.insert(SmolStr::new(param.to_ascii_lowercase()), None);
            }
        }

        let (user, host_port) = match base.split_once('@') {
            Some((user, host)) => (Some(SmolStr::new(user.trim().to_owned())), host.trim()),
            None => (None, base.trim()),
        };

        if host_port.is_empty() {
            return None;
        }

        // IPv6 literals keep their brackets in `host`.
        let (host, port) = if let Some(rest) = host_port.strip_prefix('[') {
            let (inner, after) = rest.split_once(']')?;
            let port = match after.strip_prefix(':') {
                Some(p) => Some(p.parse().ok()?),
                None => None,
            };
            (SmolStr::new(format!("[{}]", inner)), port)
        } else {
            match host_port.rsplit_once(':') {
                Some((h, p)) => (SmolStr::new(h.to_owned()), Some(p.parse().ok()?)),
                None => (SmolStr::new(host_port.to_owned()), None),
            }
        };

        Some(Self {
            sips,
            user,
            host,
            port,
            params,
        })
    }

    /// Looks up a URI parameter ignoring ASCII case.
    pub fn param(&self, name: &str) -> Option<&Option<SmolStr>> {
        self.params.get(&SmolStr::new(name.to_ascii_lowercase()))
    }

    /// Returns the transport parameter value, when present.
    pub fn transport_param(&self) -> Option<&str> {
        match self.param("transport") {
            Some(Some(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Returns the port, defaulting to 5060 (5061 for sips).
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(if self.sips { 5061 } else { 5060 })
    }

    /// Compares user, host, and port, ignoring parameters.
    pub fn addr_eq(&self, other: &SipUri) -> bool {
        self.user == other.user
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.port_or_default() == other.port_or_default()
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", if self.sips { "sips" } else { "sip" })?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (k, v) in &self.params {
            match v {
                Some(v) => write!(f, ";{}={}", k, v)?,
                None => write!(f, ";{}", k)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_host_port() {
        let uri = SipUri::parse("sip:alice@example.com:5070").unwrap();
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.host.as_str(), "example.com");
        assert_eq!(uri.port, Some(5070));
        assert!(!uri.sips);
    }

    #[test]
    fn parses_params() {
        let uri = SipUri::parse("sip:alice@10.0.0.2:5060;transport=tcp;ob").unwrap();
        assert_eq!(uri.transport_param(), Some("tcp"));
        assert!(uri.param("ob").is_some());
        assert!(uri.param("missing").is_none());
    }

    #[test]
    fn parses_ipv6_literal() {
        let uri = SipUri::parse("sip:[2001:db8::1]:5080").unwrap();
        assert_eq!(uri.host.as_str(), "[2001:db8::1]");
        assert_eq!(uri.port, Some(5080));
    }

    #[test]
    fn rejects_non_sip_schemes() {
        assert!(SipUri::parse("tel:+15551234567").is_none());
        assert!(SipUri::parse("http://example.com").is_none());
    }

    #[test]
    fn default_ports() {
        assert_eq!(SipUri::parse("sip:example.com").unwrap().port_or_default(), 5060);
        assert_eq!(SipUri::parse("sips:example.com").unwrap().port_or_default(), 5061);
    }

    #[test]
    fn display_round_trip() {
        let uri = SipUri::parse("sip:alice@example.com:5070;transport=tcp").unwrap();
        assert_eq!(uri.to_string(), "sip:alice@example.com:5070;transport=tcp");
    }

    #[test]
    fn addr_eq_ignores_params_and_case() {
        let a = SipUri::parse("sip:alice@Example.COM;transport=tcp").unwrap();
        let b = SipUri::parse("sip:alice@example.com:5060").unwrap();
        assert!(a.addr_eq(&b));
    }
}
