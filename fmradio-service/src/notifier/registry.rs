//! Mapping between event categories and the opaque context tokens the
//! hardware side attaches to asynchronous completions.

use std::fmt;
use std::num::NonZeroUsize;

use fmradio_protocol::EventCategory;

/// Opaque tag carried by a hardware completion.
///
/// Never zero, so it can stand in for a non-null driver context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextToken(NonZeroUsize);

impl ContextToken {
    /// Wrap a raw value coming back from the driver.
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(ContextToken)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for ContextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0.get())
    }
}

/// Token tagging completions of `category`.
pub fn token_for(category: EventCategory) -> ContextToken {
    // index() + 1 is never zero
    ContextToken(NonZeroUsize::MIN.saturating_add(category.index()))
}

/// Category a completion token belongs to, if any.
pub fn category_for(token: ContextToken) -> Option<EventCategory> {
    EventCategory::ALL.get(token.as_raw() - 1).copied()
}
