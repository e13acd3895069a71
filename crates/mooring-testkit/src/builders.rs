//! Response builders mirroring a registrar (and the NAT in front of it).

use bytes::Bytes;
use mooring_core::{Headers, Response, StatusLine, ViaHeader};
use smol_str::SmolStr;

use crate::transport::SentRequest;

/// Builds a response to the given request, echoing the dialog-identifying
/// headers the way a server would.
pub fn respond_to(sent: &SentRequest, code: u16, reason: &str) -> Response {
    let mut headers = Headers::new();
    for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
        if let Some(value) = sent.request.headers.get(name) {
            headers.push(SmolStr::new(name), value.clone());
        }
    }
    headers.push(SmolStr::new("Content-Length"), SmolStr::new("0"));

    Response::new(
        StatusLine::new(code, reason).expect("valid status line"),
        headers,
        Bytes::new(),
    )
}

/// Returns the request's Via rewritten the way a NAT-facing server sees it:
/// `received=` set to the apparent source address, and `rport=` set when the
/// server reflects the source port.
pub fn natted_via(sent: &SentRequest, received: &str, rport: Option<u16>) -> ViaHeader {
    let mut via = sent.via();
    via.set_param("received", Some(received));
    if let Some(rport) = rport {
        let rport = rport.to_string();
        via.set_param("rport", Some(rport.as_str()));
    }
    via
}

/// Replaces the response's Via with the given (typically NAT-rewritten) one.
pub fn set_via(response: &mut Response, via: &ViaHeader) {
    response
        .headers
        .set("Via", SmolStr::new(via.to_string()));
}

/// All Contact values present on a request, as raw strings.
pub fn contact_values(sent: &SentRequest) -> Vec<SmolStr> {
    sent.request
        .headers
        .get_all("Contact")
        .cloned()
        .collect()
}

/// 200 OK for a REGISTER: echoes the request's contacts as the authoritative
/// list (plus any `extra_contacts` the registrar already had), optionally
/// rewriting the Via as seen through a NAT.
pub fn ok_for_register(
    sent: &SentRequest,
    natted: Option<&ViaHeader>,
    extra_contacts: &[SmolStr],
) -> Response {
    let mut response = respond_to(sent, 200, "OK");
    if let Some(via) = natted {
        set_via(&mut response, via);
    }
    for contact in extra_contacts {
        response
            .headers
            .push(SmolStr::new("Contact"), contact.clone());
    }
    for contact in contact_values(sent) {
        response.headers.push(SmolStr::new("Contact"), contact);
    }
    response
}

/// 200 OK for an OPTIONS probe, optionally with a NAT-rewritten Via.
pub fn ok_for_options(sent: &SentRequest, natted: Option<&ViaHeader>) -> Response {
    let mut response = respond_to(sent, 200, "OK");
    if let Some(via) = natted {
        set_via(&mut response, via);
    }
    response
}

/// 401/407 challenge for the request. `code` selects the scope header.
pub fn challenge_for(
    sent: &SentRequest,
    code: u16,
    realm: &str,
    nonce: &str,
    natted: Option<&ViaHeader>,
) -> Response {
    let (reason, header) = match code {
        401 => ("Unauthorized", "WWW-Authenticate"),
        407 => ("Proxy Authentication Required", "Proxy-Authenticate"),
        other => panic!("not a challenge status: {}", other),
    };
    let mut response = respond_to(sent, code, reason);
    if let Some(via) = natted {
        set_via(&mut response, via);
    }
    response.headers.push(
        SmolStr::new(header),
        SmolStr::new(format!("Digest realm=\"{}\", nonce=\"{}\"", realm, nonce)),
    );
    response
}
