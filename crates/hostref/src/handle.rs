//! Strongly-typed handles.
//!
//! A guest only ever sees the raw `u32`. On the host side the newtype keeps
//! handles from being confused with offsets, lengths or exit codes.

/// Opaque token standing in for a host value inside the guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u32);

impl Handle {
    /// The null sentinel. Never returned by a table.
    pub const NULL: Handle = Handle(0);

    /// Distance between a slot index and the handle that names it.
    pub const OFFSET: u32 = 1;

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The slot index this handle refers to, or `None` for the null handle.
    pub fn slot(self) -> Option<usize> {
        self.0.checked_sub(Self::OFFSET).map(|slot| slot as usize)
    }

    pub(crate) fn from_slot(slot: usize) -> Self {
        debug_assert!(slot < u32::MAX as usize, "slot index exceeds handle space");
        Handle(slot as u32 + Self::OFFSET)
    }
}

impl From<u32> for Handle {
    fn from(raw: u32) -> Self {
        Handle(raw)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ref-{}", self.0)
    }
}
