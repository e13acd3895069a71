use std::collections::BTreeMap;

use smol_str::SmolStr;

/// Parsed representation of a Via header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaHeader {
    pub transport: SmolStr,
    pub sent_by: SmolStr,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
}

impl ViaHeader {
    /// Builds a Via value for the given transport token and sent-by address.
    pub fn new(transport: impl Into<SmolStr>, sent_by: impl Into<SmolStr>) -> Self {
        Self {
            transport: transport.into(),
            sent_by: sent_by.into(),
            params: BTreeMap::new(),
        }
    }

    /// Parses a single Via value, e.g.
    /// `SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKx;received=4.255.255.9;rport=9`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let mut parts = input.splitn(2, char::is_whitespace);
        let protocol = parts.next()?;
        let rest = parts.next()?.trim();

        // sent-protocol is SIP/2.0/<transport>
        let transport = protocol.rsplit('/').next()?.trim();
        if transport.is_empty() {
            return None;
        }

        let mut segments = rest.split(';');
        let sent_by = segments.next()?.trim();
        if sent_by.is_empty() {
            return None;
        }

        let mut params = BTreeMap::new();
        for param in segments {
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

        Some(Self {
            transport: SmolStr::new(transport.to_ascii_uppercase()),
            sent_by: SmolStr::new(sent_by.to_owned()),
            params,
        })
    }

    /// Returns the transport token (e.g. UDP/TCP/TLS) associated with this Via.
    pub fn transport(&self) -> &str {
        self.transport.as_str()
    }

    /// Looks up the provided parameter ignoring ASCII case.
    pub fn param(&self, name: &str) -> Option<&Option<SmolStr>> {
        self.params.get(&SmolStr::new(name.to_ascii_lowercase()))
    }

    /// Sets or replaces a parameter.
    pub fn set_param(&mut self, name: &str, value: Option<&str>) {
        self.params.insert(
            SmolStr::new(name.to_ascii_lowercase()),
            value.map(|v| SmolStr::new(v.to_owned())),
        );
    }

    /// Returns the `received` parameter value, when present.
    pub fn received(&self) -> Option<&str> {
        match self.param("received") {
            Some(Some(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Returns the `rport` parameter value, when present with a port.
    ///
    /// A bare `rport` (the request form soliciting reflection) yields None.
    pub fn rport(&self) -> Option<u16> {
        match self.param("rport") {
            Some(Some(v)) => v.parse().ok(),
            _ => None,
        }
    }

    /// Returns the host portion of sent-by.
    pub fn sent_by_host(&self) -> &str {
        split_sent_by(self.sent_by.as_str()).0
    }

    /// Returns the port portion of sent-by, when present.
    pub fn sent_by_port(&self) -> Option<u16> {
        split_sent_by(self.sent_by.as_str()).1
    }
}

fn split_sent_by(sent_by: &str) -> (&str, Option<u16>) {
    if sent_by.starts_with('[') {
        if let Some(end) = sent_by.find(']') {
            let port = sent_by[end + 1..]
                .strip_prefix(':')
                .and_then(|p| p.parse().ok());
            return (&sent_by[..=end], port);
        }
    }
    match sent_by.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()),
        None => (sent_by, None),
    }
}

impl std::fmt::Display for ViaHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by)?;
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
    fn parses_via_with_nat_params() {
        let via = ViaHeader::parse(
            "SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKx;received=4.255.255.9;rport=9",
        )
        .unwrap();
        assert_eq!(via.transport(), "UDP");
        assert_eq!(via.sent_by_host(), "10.0.0.2");
        assert_eq!(via.sent_by_port(), Some(5060));
        assert_eq!(via.received(), Some("4.255.255.9"));
        assert_eq!(via.rport(), Some(9));
    }

    #[test]
    fn bare_rport_is_not_a_reflected_port() {
        let via = ViaHeader::parse("SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKx;rport").unwrap();
        assert_eq!(via.rport(), None);
        assert!(via.param("rport").is_some());
    }

    #[test]
    fn display_round_trip() {
        let mut via = ViaHeader::new("UDP", "10.0.0.2:5060");
        via.set_param("branch", Some("z9hG4bKx"));
        via.set_param("rport", None);
        assert_eq!(via.to_string(), "SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKx;rport");
    }

    #[test]
    fn parses_ipv6_sent_by() {
        let via = ViaHeader::parse("SIP/2.0/TCP [2001:db8::1]:5060;branch=z9hG4bKy").unwrap();
        assert_eq!(via.sent_by_host(), "[2001:db8::1]");
        assert_eq!(via.sent_by_port(), Some(5060));
    }
}
