use mooring_auth::ChallengeScope;
use smol_str::SmolStr;

/// Errors surfaced by the registration engine.
///
/// Only `ProbeFailure` is non-fatal; every other variant accompanies a
/// terminal failure event, after which the session is `Unregistered` and
/// must be re-initiated explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegError {
    /// Credentials were invalid or a challenge scope repeated with an
    /// unchanged nonce after credentials were applied.
    ChallengeExhausted {
        scope: ChallengeScope,
        realm: SmolStr,
    },
    /// The server rejected the proposed contact twice.
    ContactRejected { code: u16 },
    /// Connection drop or request timeout.
    TransportFailure { detail: SmolStr },
    /// The response violated the protocol contract, e.g. a 200 contact list
    /// with no entry matching our instance.
    ProtocolViolation { detail: SmolStr },
    /// A keepalive probe failed; registration status is unaffected.
    ProbeFailure { consecutive: u32 },
    /// Terminal rejection carrying the final status code (403, 5xx, ...).
    Rejected { code: u16, reason: SmolStr },
}

impl RegError {
    /// True for failures that terminate the registration session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RegError::ProbeFailure { .. })
    }
}

impl std::fmt::Display for RegError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChallengeExhausted { scope, realm } => {
                let scope = match scope {
                    ChallengeScope::Www => "WWW",
                    ChallengeScope::Proxy => "Proxy",
                };
                write!(f, "{} challenge for realm \"{}\" exhausted", scope, realm)
            }
            Self::ContactRejected { code } => {
                write!(f, "contact rejected twice (last status {})", code)
            }
            Self::TransportFailure { detail } => write!(f, "transport failure: {}", detail),
            Self::ProtocolViolation { detail } => write!(f, "protocol violation: {}", detail),
            Self::ProbeFailure { consecutive } => {
                write!(f, "keepalive probe failed ({} consecutive)", consecutive)
            }
            Self::Rejected { code, reason } => {
                write!(f, "registration rejected: {} {}", code, reason)
            }
        }
    }
}

impl std::error::Error for RegError {}
