use std::collections::BTreeMap;

use smol_str::SmolStr;

use crate::SipUri;

/// Generic SIP name-addr structure used by Contact/From/To header values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub display_name: Option<SmolStr>,
    pub uri: SipUri,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
}

impl NameAddr {
    /// Wraps a bare URI with no display name or header parameters.
    pub fn from_uri(uri: SipUri) -> Self {
        Self {
            display_name: None,
            uri,
            params: BTreeMap::new(),
        }
    }

    /// Parses a single name-addr or addr-spec value, e.g.
    /// `"Alice" <sip:alice@host>;expires=3600` or `sip:alice@host`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();

        let (display_name, rest) = if let Some(idx) = input.find('<') {
            let name = input[..idx].trim().trim_matches('"');
            let name = if name.is_empty() {
                None
            } else {
                Some(SmolStr::new(name.to_owned()))
            };
            (name, &input[idx..])
        } else {
            (None, input)
        };

        let (uri_str, params_str) = if let Some(rest) = rest.strip_prefix('<') {
            let (inner, after) = rest.split_once('>')?;
            (inner, after)
        } else {
            // addr-spec form: parameters after ';' belong to the header,
            // not the URI.
            match rest.split_once(';') {
                Some((uri, params)) => (uri, params),
                None => (rest, ""),
            }
        };

        let uri = SipUri::parse(uri_str)?;

        let mut params = BTreeMap::new();
        for param in params_str.split(';') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            if let Some((k, v)) = param.split_once('=') {
                params.insert(
                    SmolStr::new(k.trim().to_ascii_lowercase()),
                    Some(SmolStr::new(v.trim().trim_matches('"').to_owned())),
                );
            } else {
                params.insert(SmolStr::new(param.to_ascii_lowercase()), None);
            }
        }

        Some(Self {
            display_name,
            uri,
            params,
        })
    }

    pub fn uri(&self) -> &SipUri {
        &self.uri
    }

    pub fn params(&self) -> impl Iterator<Item = (&SmolStr, &Option<SmolStr>)> {
        self.params.iter()
    }

    /// Looks up a header parameter ignoring ASCII case.
    pub fn get_param(&self, name: &str) -> Option<&Option<SmolStr>> {
        self.params.get(&SmolStr::new(name.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for NameAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        for (k, v) in &self.params {
            match v {
                Some(v) if v.contains(':') || v.contains('<') => {
                    write!(f, ";{}=\"{}\"", k, v)?
                }
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
    fn parses_name_addr_with_params() {
        let na = NameAddr::parse("\"Alice\" <sip:alice@host:5060>;expires=3600").unwrap();
        assert_eq!(na.display_name.as_deref(), Some("Alice"));
        assert_eq!(na.uri.user.as_deref(), Some("alice"));
        assert_eq!(
            na.get_param("expires").and_then(|v| v.as_deref()),
            Some("3600")
        );
    }

    #[test]
    fn parses_bare_addr_spec() {
        let na = NameAddr::parse("sip:bob@example.com").unwrap();
        assert!(na.display_name.is_none());
        assert_eq!(na.uri.host.as_str(), "example.com");
    }

    #[test]
    fn header_params_stay_off_the_uri() {
        let na = NameAddr::parse("<sip:alice@host;transport=tcp>;+sip.instance=\"<urn:uuid:x>\"")
            .unwrap();
        assert_eq!(na.uri.transport_param(), Some("tcp"));
        assert_eq!(
            na.get_param("+sip.instance").and_then(|v| v.as_deref()),
            Some("<urn:uuid:x>")
        );
        assert!(na.uri.param("+sip.instance").is_none());
    }
}
