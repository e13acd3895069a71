use smol_str::SmolStr;

use crate::name_addr::NameAddr;
use crate::SipUri;

/// Parsed representation of a Contact header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactHeader(pub NameAddr);

impl ContactHeader {
    /// Parses a single Contact value.
    pub fn parse(input: &str) -> Option<Self> {
        NameAddr::parse(input).map(Self)
    }

    /// Parses a comma-separated Contact header value into the individual
    /// bindings it lists. Commas inside quoted strings or angle brackets do
    /// not split.
    pub fn parse_list(input: &str) -> Vec<Self> {
        split_contact_values(input)
            .iter()
            .filter_map(|v| Self::parse(v))
            .collect()
    }

    /// Returns the contact URI.
    pub fn uri(&self) -> &SipUri {
        self.0.uri()
    }

    pub fn params(&self) -> impl Iterator<Item = (&SmolStr, &Option<SmolStr>)> {
        self.0.params()
    }

    /// Returns the `+sip.instance` identifier, when present.
    pub fn instance_id(&self) -> Option<&str> {
        self.0
            .get_param("+sip.instance")
            .and_then(|v| v.as_deref())
    }

    /// Returns the `expires` contact parameter, when present and numeric.
    pub fn expires_param(&self) -> Option<u32> {
        self.0
            .get_param("expires")
            .and_then(|v| v.as_deref())
            .and_then(|v| v.parse().ok())
    }

    pub fn inner(&self) -> &NameAddr {
        &self.0
    }
}

impl std::fmt::Display for ContactHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Splits a Contact header value on top-level commas only.
fn split_contact_values(input: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0usize;

    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => depth += 1,
            '>' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                let piece = input[start..i].trim();
                if !piece.is_empty() {
                    out.push(piece);
                }
                start = i + 1;
            }
            _ => {}
        }
    }

    let piece = input[start..].trim();
    if !piece.is_empty() {
        out.push(piece);
    }
    out
}
