//! Globally unique 128-bit identifiers.

use std::fmt;

use turborand::rng::Rng;
use turborand::TurboRand;

std::thread_local! {
    /// A fast, non-cryptographic, thread-local random number generator powered by turborand.
    static THREAD_RNG: Rng = Rng::new();
}

/// A 128-bit globally unique identifier.
///
/// New GUIDs are RFC 4122 version-4 values drawn from the process RNG. The
/// wire representation is always the 16 raw bytes in order.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(C)]
pub struct Guid([u8; 16]);

impl Guid {
    /// The all-zero nil GUID.
    pub const NIL: Guid = Guid([0; 16]);

    /// Generate a new random (version 4) GUID.
    pub fn new() -> Guid {
        let mut bytes = [0u8; 16];
        THREAD_RNG.with(|rng| {
            bytes[..8].copy_from_slice(&rng.u64(..).to_le_bytes());
            bytes[8..].copy_from_slice(&rng.u64(..).to_le_bytes());
        });
        // RFC 4122: version 4, variant 1.
        bytes[6] = (bytes[6] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Guid(bytes)
    }

    /// Build a GUID from its 16 raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Guid {
        Guid(bytes)
    }

    /// The 16 raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Whether this is the nil GUID.
    pub fn is_nil(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12],
            b[13], b[14], b[15]
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_guids_are_unique() {
        let a = Guid::new();
        let b = Guid::new();
        assert_ne!(a, b);
        assert!(!a.is_nil());
    }

    #[test]
    fn version_and_variant_bits() {
        for _ in 0..32 {
            let g = Guid::new();
            assert_eq!(g.as_bytes()[6] >> 4, 4);
            assert_eq!(g.as_bytes()[8] >> 6, 0b10);
        }
    }

    #[test]
    fn display_format() {
        let g = Guid::from_bytes([
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ]);
        assert_eq!(g.to_string(), "01234567-89ab-cdef-0123-456789abcdef");
    }

    #[test]
    fn nil_round_trip() {
        assert!(Guid::NIL.is_nil());
        assert_eq!(Guid::from_bytes(*Guid::NIL.as_bytes()), Guid::NIL);
    }
}
