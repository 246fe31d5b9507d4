//! Object state flags.

use bitflags::bitflags;

bitflags! {
    /// Core state flags carried by every object.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u32 {
        /// Should not be saved.
        const TRANSIENT = 1 << 0;
        /// The object is currently part of the root set.
        const ROOTED = 1 << 1;
        /// The object is the class default object of its class.
        const DEFAULT_OBJECT = 1 << 2;
        /// The object is a shell whose property data still needs to be loaded.
        const NEEDS_LOAD = 1 << 3;
        /// The object is currently being loaded.
        const LOADING = 1 << 4;
        /// The object needs `post_load` called. This does not deserialize the
        /// object again.
        const NEEDS_POST_LOAD = 1 << 5;
        /// The object was loaded from a package.
        const WAS_LOADED = 1 << 6;
        /// The object is public outside of its package (assets and such).
        const PUBLIC = 1 << 7;
        /// The object has already been marked to be destroyed.
        const MARKED_DESTROY = 1 << 8;
    }
}

/// Render flags as a `|`-separated list for diagnostics.
pub fn flags_to_string(flags: ObjectFlags) -> String {
    if flags.is_empty() {
        return "None".to_string();
    }

    let mut out = String::new();
    for (name, flag) in [
        ("Transient", ObjectFlags::TRANSIENT),
        ("Rooted", ObjectFlags::ROOTED),
        ("DefaultObject", ObjectFlags::DEFAULT_OBJECT),
        ("NeedsLoad", ObjectFlags::NEEDS_LOAD),
        ("Loading", ObjectFlags::LOADING),
        ("NeedsPostLoad", ObjectFlags::NEEDS_POST_LOAD),
        ("WasLoaded", ObjectFlags::WAS_LOADED),
        ("Public", ObjectFlags::PUBLIC),
        ("MarkedDestroy", ObjectFlags::MARKED_DESTROY),
    ] {
        if flags.contains(flag) {
            if !out.is_empty() {
                out.push('|');
            }
            out.push_str(name);
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flags_render() {
        assert_eq!(flags_to_string(ObjectFlags::empty()), "None");
        assert_eq!(
            flags_to_string(ObjectFlags::NEEDS_LOAD | ObjectFlags::WAS_LOADED),
            "NeedsLoad|WasLoaded"
        );
    }
}
