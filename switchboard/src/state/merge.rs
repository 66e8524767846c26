//! Partial-update merging.
//!
//! The gateway sends partial records: an omitted field (`None`) or an empty
//! string in an update means "unchanged", not "cleared". An explicit empty
//! list is a value and replaces the cached one. Two directions are needed:
//!
//! - [`carry_over`]: the incoming record wins, but blank fields are filled in
//!   from the cached record (guild lists, member join time, channel overwrites).
//! - [`overwrite_present`]: the cached record wins, but non-blank incoming
//!   fields replace it (presence fields).

/// A field value that can be "absent" in a partial update.
pub trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl<T> Blank for Option<T> {
    fn is_blank(&self) -> bool {
        self.is_none()
    }
}

/// Fill `incoming` from `previous` when `incoming` is blank.
pub fn carry_over<T: Blank>(incoming: &mut T, previous: T) {
    if incoming.is_blank() {
        *incoming = previous;
    }
}

/// Replace `cached` with `incoming` unless `incoming` is blank.
pub fn overwrite_present<T: Blank>(cached: &mut T, incoming: T) {
    if !incoming.is_blank() {
        *cached = incoming;
    }
}
