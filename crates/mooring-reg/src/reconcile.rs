//! Contact reconciliation: selecting the authoritative registered contact
//! from a 200 response to REGISTER.

use mooring_core::ContactHeader;
use smol_str::SmolStr;

use crate::error::RegError;
use crate::nat::NatBinding;

/// The reconciled view of a 200 response's contact list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledContacts {
    /// The canonical current contact for this session.
    pub current: ContactHeader,
    /// The full contact set the server returned, in response order.
    pub all: Vec<ContactHeader>,
}

/// Selects the session's current contact from the returned list.
///
/// Matching is by instance identifier when the session has one, otherwise by
/// address equality against the contacts we offered. When the cycle
/// registered both a direct and a NAT-observed contact, the NAT-observed one
/// is selected as current while outbound is active: that is the binding
/// future comparisons and refreshes must target.
///
/// A list with no match for our instance is a protocol violation.
pub fn reconcile(
    returned: Vec<ContactHeader>,
    instance_id: Option<&str>,
    offered: &[ContactHeader],
    nat_binding: Option<&NatBinding>,
    prefer_nat_observed: bool,
) -> Result<ReconciledContacts, RegError> {
    let mine: Vec<&ContactHeader> = returned
        .iter()
        .filter(|c| is_ours(c, instance_id, offered))
        .collect();

    if mine.is_empty() {
        return Err(RegError::ProtocolViolation {
            detail: SmolStr::new("200 contact list has no entry matching this registration"),
        });
    }

    let current = if prefer_nat_observed {
        nat_binding
            .and_then(|binding| {
                mine.iter()
                    .find(|c| matches_binding(c, binding))
                    .copied()
            })
            .unwrap_or(mine[mine.len() - 1])
    } else {
        // Most recent is authoritative; servers append newly seen bindings.
        mine[mine.len() - 1]
    };

    Ok(ReconciledContacts {
        current: current.clone(),
        all: returned.clone(),
    })
}

fn is_ours(
    contact: &ContactHeader,
    instance_id: Option<&str>,
    offered: &[ContactHeader],
) -> bool {
    if let Some(instance) = instance_id {
        if let Some(candidate) = contact.instance_id() {
            return candidate == instance;
        }
        // Servers are not required to echo +sip.instance; fall through to
        // address matching.
    }
    offered.iter().any(|o| o.uri().addr_eq(contact.uri()))
}

/// True when the contact URI points at the given NAT binding.
pub fn matches_binding(contact: &ContactHeader, binding: &NatBinding) -> bool {
    let uri = contact.uri();
    let host_matches = uri
        .host
        .as_str()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<std::net::IpAddr>()
        .map(|ip| ip == binding.addr)
        .unwrap_or(false);
    host_matches && uri.port_or_default() == binding.port
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn contact(s: &str) -> ContactHeader {
        ContactHeader::parse(s).unwrap()
    }

    fn binding(addr: &str, port: u16) -> NatBinding {
        NatBinding {
            addr: addr.parse::<IpAddr>().unwrap(),
            port,
        }
    }

    #[test]
    fn selects_by_instance_id() {
        let returned = vec![
            contact("<sip:other@1.2.3.4>;+sip.instance=\"<urn:uuid:other>\""),
            contact("<sip:alice@10.0.0.2:5060>;+sip.instance=\"<urn:uuid:me>\""),
        ];
        let offered = vec![contact("<sip:alice@10.0.0.2:5060>")];

        let reconciled =
            reconcile(returned, Some("<urn:uuid:me>"), &offered, None, false).unwrap();
        assert_eq!(reconciled.current.uri().host.as_str(), "10.0.0.2");
        assert_eq!(reconciled.all.len(), 2);
    }

    #[test]
    fn prefers_nat_observed_contact_when_outbound_active() {
        let returned = vec![
            contact("<sip:alice@10.0.0.2:5060>"),
            contact("<sip:alice@4.255.255.9:9>"),
        ];
        let offered = vec![
            contact("<sip:alice@10.0.0.2:5060>"),
            contact("<sip:alice@4.255.255.9:9>"),
        ];

        let reconciled = reconcile(
            returned,
            None,
            &offered,
            Some(&binding("4.255.255.9", 9)),
            true,
        )
        .unwrap();
        assert_eq!(reconciled.current.uri().host.as_str(), "4.255.255.9");
    }

    #[test]
    fn falls_back_to_most_recent_offered_match() {
        let returned = vec![
            contact("<sip:alice@10.0.0.2:5060>;expires=1800"),
            contact("<sip:alice@10.0.0.2:5062>;expires=3600"),
        ];
        let offered = vec![contact("<sip:alice@10.0.0.2:5062>")];

        let reconciled = reconcile(returned, None, &offered, None, false).unwrap();
        assert_eq!(reconciled.current.uri().port, Some(5062));
    }

    #[test]
    fn missing_match_is_a_protocol_violation() {
        let returned = vec![contact("<sip:stranger@8.8.8.8>")];
        let offered = vec![contact("<sip:alice@10.0.0.2:5060>")];

        let err = reconcile(returned, None, &offered, None, false).unwrap_err();
        assert!(matches!(err, RegError::ProtocolViolation { .. }));
    }

    #[test]
    fn binding_matcher_reads_uri_host_port() {
        let c = contact("<sip:alice@4.255.255.9:9>");
        assert!(matches_binding(&c, &binding("4.255.255.9", 9)));
        assert!(!matches_binding(&c, &binding("4.255.255.9", 10)));
        assert!(!matches_binding(&c, &binding("4.255.255.10", 9)));

        // Hostname contacts never match a numeric binding.
        let c = contact("<sip:alice@client.example.com>");
        assert!(!matches_binding(&c, &binding("4.255.255.9", 5060)));
    }
}
