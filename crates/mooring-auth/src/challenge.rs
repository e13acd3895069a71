use mooring_core::Response;
use smol_str::SmolStr;
use tracing::warn;

/// Whether a challenge arrived as 401 (WWW) or 407 (Proxy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeScope {
    Www,
    Proxy,
}

impl ChallengeScope {
    /// Header carrying the challenge in the response.
    pub fn challenge_header(self) -> &'static str {
        match self {
            ChallengeScope::Www => "WWW-Authenticate",
            ChallengeScope::Proxy => "Proxy-Authenticate",
        }
    }

    /// Header carrying the answer in the resubmitted request.
    pub fn authorization_header(self) -> &'static str {
        match self {
            ChallengeScope::Www => "Authorization",
            ChallengeScope::Proxy => "Proxy-Authorization",
        }
    }
}

/// Digest algorithms accepted from challenges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha256 => "SHA-256",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("MD5") {
            Some(DigestAlgorithm::Md5)
        } else if s.eq_ignore_ascii_case("SHA-256") {
            Some(DigestAlgorithm::Sha256)
        } else {
            None
        }
    }
}

/// Quality of protection offered by the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qop {
    Auth,
}

impl Qop {
    pub fn as_str(self) -> &'static str {
        "auth"
    }

    pub fn parse(s: &str) -> Option<Self> {
        // A qop list may offer auth-int alongside auth; we answer with auth
        // whenever it is on offer.
        s.split(',')
            .any(|q| q.trim().trim_matches('"').eq_ignore_ascii_case("auth"))
            .then_some(Qop::Auth)
    }
}

/// A parsed Digest challenge from a 401/407 response.
///
/// Created per challenge-response cycle and consumed once answered; at most
/// one outstanding challenge per scope per request cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scope: ChallengeScope,
    pub realm: SmolStr,
    pub nonce: SmolStr,
    pub opaque: Option<SmolStr>,
    pub algorithm: DigestAlgorithm,
    pub qop: Option<Qop>,
    pub stale: bool,
}

impl Challenge {
    /// Parses a Digest challenge header value for the given scope.
    ///
    /// Returns None for non-Digest schemes or challenges missing realm/nonce.
    pub fn parse(scope: ChallengeScope, value: &str) -> Option<Self> {
        let value = value.trim();
        let rest = value
            .split_once(char::is_whitespace)
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("Digest"))
            .map(|(_, rest)| rest)?;

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = DigestAlgorithm::Md5;
        let mut qop = None;
        let mut stale = false;

        for part in split_challenge_params(rest) {
            let Some((key, raw)) = part.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let val = raw.trim().trim_matches('"');
            if key.eq_ignore_ascii_case("realm") {
                realm = Some(SmolStr::new(val.to_owned()));
            } else if key.eq_ignore_ascii_case("nonce") {
                nonce = Some(SmolStr::new(val.to_owned()));
            } else if key.eq_ignore_ascii_case("opaque") {
                opaque = Some(SmolStr::new(val.to_owned()));
            } else if key.eq_ignore_ascii_case("algorithm") {
                algorithm = DigestAlgorithm::parse(val)?;
            } else if key.eq_ignore_ascii_case("qop") {
                qop = Qop::parse(val);
            } else if key.eq_ignore_ascii_case("stale") {
                stale = val.eq_ignore_ascii_case("true");
            }
        }

        Some(Self {
            scope,
            realm: realm?,
            nonce: nonce?,
            opaque,
            algorithm,
            qop,
            stale,
        })
    }

    /// Extracts every Digest challenge present in a 401/407 response.
    ///
    /// A response may carry both scopes at once (proxy chain in front of the
    /// registrar); both are returned, WWW first.
    pub fn from_response(response: &Response) -> Vec<Challenge> {
        let mut out = Vec::new();
        for scope in [ChallengeScope::Www, ChallengeScope::Proxy] {
            let mut found = false;
            for value in response.headers.get_all(scope.challenge_header()) {
                if let Some(challenge) = Challenge::parse(scope, value.as_str()) {
                    out.push(challenge);
                    found = true;
                    break;
                }
            }
            if !found {
                if let Some(value) = response.headers.get(scope.challenge_header()) {
                    warn!(
                        header = scope.challenge_header(),
                        value = value.as_str(),
                        "unusable challenge header"
                    );
                }
            }
        }
        out
    }
}

/// Splits challenge parameters on top-level commas, respecting quotes.
fn split_challenge_params(input: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;

    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
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

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mooring_core::{Headers, StatusLine};

    #[test]
    fn parses_full_challenge() {
        let c = Challenge::parse(
            ChallengeScope::Www,
            "Digest realm=\"example.com\", nonce=\"abc, def\", qop=\"auth,auth-int\", \
             algorithm=MD5, opaque=\"xyz\", stale=TRUE",
        )
        .unwrap();
        assert_eq!(c.realm.as_str(), "example.com");
        assert_eq!(c.nonce.as_str(), "abc, def");
        assert_eq!(c.qop, Some(Qop::Auth));
        assert_eq!(c.algorithm, DigestAlgorithm::Md5);
        assert_eq!(c.opaque.as_deref(), Some("xyz"));
        assert!(c.stale);
    }

    #[test]
    fn rejects_non_digest_schemes() {
        assert!(Challenge::parse(ChallengeScope::Www, "Basic realm=\"x\"").is_none());
    }

    #[test]
    fn rejects_unknown_algorithms() {
        assert!(Challenge::parse(
            ChallengeScope::Www,
            "Digest realm=\"x\", nonce=\"y\", algorithm=SHA-512-256"
        )
        .is_none());
    }

    #[test]
    fn collects_both_scopes_from_response() {
        let mut headers = Headers::new();
        headers.push(
            SmolStr::new("WWW-Authenticate"),
            SmolStr::new("Digest realm=\"inner\", nonce=\"n1\""),
        );
        headers.push(
            SmolStr::new("Proxy-Authenticate"),
            SmolStr::new("Digest realm=\"outer\", nonce=\"n2\""),
        );
        let response = Response::new(
            StatusLine::new(401, "Unauthorized").unwrap(),
            headers,
            Bytes::new(),
        );

        let challenges = Challenge::from_response(&response);
        assert_eq!(challenges.len(), 2);
        assert_eq!(challenges[0].scope, ChallengeScope::Www);
        assert_eq!(challenges[0].realm.as_str(), "inner");
        assert_eq!(challenges[1].scope, ChallengeScope::Proxy);
        assert_eq!(challenges[1].realm.as_str(), "outer");
    }
}
