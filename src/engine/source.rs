//! Command routing targets.
//!
//! A [`NodeSource`] describes where a command must be sent: a slot number
//! and/or an explicit node address, plus the redirect that produced it.
//! Sources are pure data; every redirect constructs a new value.

/// The kind of cluster redirect that produced a [`NodeSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    /// No redirect; route by slot ownership.
    None,
    /// A MOVED redirect: the slot permanently lives at the given address.
    Moved,
    /// An ASK redirect: the slot is migrating; the next command must be
    /// primed with ASKING on the target node.
    Ask,
}

/// Where a command must be sent.
///
/// At least one of slot/address is present once resolution has happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSource {
    slot: Option<u16>,
    addr: Option<String>,
    redirect: Redirect,
}

impl NodeSource {
    /// Routes by slot ownership.
    pub fn slot(slot: u16) -> Self {
        Self {
            slot: Some(slot),
            addr: None,
            redirect: Redirect::None,
        }
    }

    /// Routes to an explicit node address.
    pub fn addr(addr: impl Into<String>) -> Self {
        Self {
            slot: None,
            addr: Some(addr.into()),
            redirect: Redirect::None,
        }
    }

    /// Builds the target of a MOVED redirect.
    pub fn moved(slot: u16, addr: impl Into<String>) -> Self {
        Self {
            slot: Some(slot),
            addr: Some(addr.into()),
            redirect: Redirect::Moved,
        }
    }

    /// Builds the target of an ASK redirect.
    pub fn ask(slot: u16, addr: impl Into<String>) -> Self {
        Self {
            slot: Some(slot),
            addr: Some(addr.into()),
            redirect: Redirect::Ask,
        }
    }

    /// The slot this source routes by, if any.
    pub fn slot_id(&self) -> Option<u16> {
        self.slot
    }

    /// The explicit node address, if any.
    pub fn address(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    /// The redirect that produced this source.
    pub fn redirect(&self) -> Redirect {
        self.redirect
    }
}

impl std::fmt::Display for NodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.slot, &self.addr) {
            (Some(slot), Some(addr)) => write!(f, "slot {} at {}", slot, addr),
            (Some(slot), None) => write!(f, "slot {}", slot),
            (None, Some(addr)) => write!(f, "{}", addr),
            (None, None) => write!(f, "unresolved"),
        }
    }
}
