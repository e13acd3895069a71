//! Outbound policy: whether NAT presence arms keepalive probing and how many
//! contacts a corrective registration carries.

use std::time::Duration;

use tracing::debug;

/// Default interval between keepalive probes.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// Parsed outbound configuration tokens.
///
/// The token string is comma-separated; recognized tokens are
/// `no-options-keepalive` (disable periodic probing) and `no-validate`
/// (disable re-registration on binding changes detected while registered).
/// Unrecognized tokens are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundOptions {
    pub options_keepalive: bool,
    pub validate: bool,
}

impl Default for OutboundOptions {
    fn default() -> Self {
        Self {
            options_keepalive: true,
            validate: true,
        }
    }
}

impl OutboundOptions {
    pub fn parse(tokens: &str) -> Self {
        let mut options = Self::default();
        for token in tokens.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token {
                "no-options-keepalive" => options.options_keepalive = false,
                "no-validate" => options.validate = false,
                other => debug!(token = other, "ignoring unrecognized outbound token"),
            }
        }
        options
    }
}

/// Keepalive probing mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundMode {
    Disabled,
    Probing,
    Active,
}

/// Per-session outbound state.
#[derive(Debug, Clone)]
pub struct OutboundState {
    pub mode: OutboundMode,
    pub keepalive_interval: Duration,
    pub last_probe_at: Option<Duration>,
    pub consecutive_failures: u32,
}

impl OutboundState {
    pub fn new(keepalive_interval: Duration) -> Self {
        Self {
            mode: OutboundMode::Disabled,
            keepalive_interval,
            last_probe_at: None,
            consecutive_failures: 0,
        }
    }
}

/// What a registration cycle should do about NAT, given the detector verdict
/// and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundDecision {
    pub mode: OutboundMode,
    /// Register the NAT-observed contact alongside the direct one.
    pub dual_contact: bool,
    /// Replace the direct contact with the NAT-observed one.
    pub corrected_contact: bool,
}

/// Applies the outbound policy.
///
/// - NAT present, keepalive enabled: probe the binding and give the server
///   both contacts.
/// - NAT present, keepalive disabled: no probing, register the corrected
///   contact only.
/// - No NAT: nothing to do.
pub fn decide(nat_present: bool, options: &OutboundOptions) -> OutboundDecision {
    if !nat_present {
        return OutboundDecision {
            mode: OutboundMode::Disabled,
            dual_contact: false,
            corrected_contact: false,
        };
    }

    if options.options_keepalive {
        OutboundDecision {
            mode: OutboundMode::Active,
            dual_contact: true,
            corrected_contact: false,
        }
    } else {
        OutboundDecision {
            mode: OutboundMode::Disabled,
            dual_contact: false,
            corrected_contact: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_string() {
        let options = OutboundOptions::parse("no-options-keepalive, no-validate");
        assert!(!options.options_keepalive);
        assert!(!options.validate);
    }

    #[test]
    fn unknown_tokens_are_ignored() {
        let options = OutboundOptions::parse("use-rport, gruuize, no-validate");
        assert!(options.options_keepalive);
        assert!(!options.validate);
    }

    #[test]
    fn empty_string_keeps_defaults() {
        assert_eq!(OutboundOptions::parse(""), OutboundOptions::default());
    }

    #[test]
    fn nat_with_keepalive_goes_active_with_dual_contact() {
        let d = decide(true, &OutboundOptions::default());
        assert_eq!(d.mode, OutboundMode::Active);
        assert!(d.dual_contact);
        assert!(!d.corrected_contact);
    }

    #[test]
    fn nat_without_keepalive_registers_single_corrected_contact() {
        let d = decide(true, &OutboundOptions::parse("no-options-keepalive"));
        assert_eq!(d.mode, OutboundMode::Disabled);
        assert!(!d.dual_contact);
        assert!(d.corrected_contact);
    }

    #[test]
    fn no_nat_stays_disabled() {
        let d = decide(false, &OutboundOptions::default());
        assert_eq!(d.mode, OutboundMode::Disabled);
        assert!(!d.dual_contact);
        assert!(!d.corrected_contact);
    }
}
