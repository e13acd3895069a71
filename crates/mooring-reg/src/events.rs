use mooring_core::ContactHeader;

use crate::error::RegError;
use crate::nat::NatBinding;
use crate::session::SessionId;

/// Events surfaced to the application, drained from the engine's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// An interim registration cycle completed and another follows
    /// (contact correction, NAT-corrective re-REGISTER, challenge round).
    Progress { code: u16 },
    /// The session reached `Registered` with the given authoritative contact.
    Registered { contact: ContactHeader, expires: u32 },
    /// The session reached `Unregistered` after an explicit unregister.
    Unregistered,
    /// A keepalive probe observed a different NAT binding; a corrective
    /// re-REGISTER has been triggered (or coalesced into a pending one).
    BindingChanged { binding: NatBinding },
    /// A refresh cycle failed; the session stays `Registered` until expiry.
    RefreshFailed { code: Option<u16> },
    /// A keepalive probe failed; non-fatal.
    ProbeFailed { consecutive: u32 },
    /// The registration lapsed after failed refreshes; the session is now
    /// `Unregistered`.
    Expired,
    /// Terminal failure; the session is now `Unregistered`.
    Failed { error: RegError },
}

/// An event paired with the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: RegistrationEvent,
}
