//! The [`Archive`] abstraction and [`Serializable`] implementations.

use byteorder::{ByteOrder, LittleEndian};
use ember_utils::{Guid, HashMap, Name};

use crate::handle::ObjectRef;

/// A positioned byte stream that either reads or writes.
///
/// Both directions go through the single [`serialize`][Archive::serialize]
/// primitive: a writer copies the bytes out of the buffer, a reader fills
/// the buffer in. Errors are sticky; once [`has_error`][Archive::has_error]
/// is set, subsequent operations short-circuit and callers check the flag
/// after a top-level operation rather than after every field.
pub trait Archive {
    /// Whether this archive reads from a stream into values.
    fn is_reading(&self) -> bool;

    /// Whether this archive writes values into a stream.
    fn is_writing(&self) -> bool {
        !self.is_reading()
    }

    /// Current stream position.
    fn tell(&self) -> u64;

    /// Move the stream position.
    fn seek(&mut self, pos: u64);

    /// Total size of the underlying stream.
    fn total_size(&self) -> u64;

    /// Copy bytes between the stream and `data` (direction depends on mode).
    fn serialize(&mut self, data: &mut [u8]);

    /// Whether the sticky error flag is set.
    fn has_error(&self) -> bool;

    /// Set the sticky error flag.
    fn set_error(&mut self);

    /// The maximum element count / byte length this archive will accept for
    /// a single container read. Guards against corrupted size prefixes.
    fn max_serialize_size(&self) -> u64 {
        i32::MAX as u64
    }

    /// Serialize an object reference.
    ///
    /// Plain archives cannot do this; proxy archivers that know how to map
    /// references to GUIDs or package-local indices override it.
    fn serialize_object_ref(&mut self, _value: &mut ObjectRef) {
        tracing::error!("serializing object references is not supported by this archive");
        self.set_error();
    }
}

/// A value that can be read from or written to an [`Archive`].
pub trait Serializable {
    /// Read or write `self` depending on the archive's mode.
    fn serialize(&mut self, ar: &mut dyn Archive);
}

macro_rules! impl_serializable_int {
    ($($ty:ty => $write:ident, $read:ident, $n:expr;)*) => {
        $(
            impl Serializable for $ty {
                fn serialize(&mut self, ar: &mut dyn Archive) {
                    let mut buf = [0u8; $n];
                    if ar.is_writing() {
                        LittleEndian::$write(&mut buf, *self);
                    }
                    ar.serialize(&mut buf);
                    if ar.is_reading() {
                        *self = LittleEndian::$read(&buf);
                    }
                }
            }
        )*
    };
}

impl_serializable_int! {
    u16 => write_u16, read_u16, 2;
    u32 => write_u32, read_u32, 4;
    u64 => write_u64, read_u64, 8;
    i16 => write_i16, read_i16, 2;
    i32 => write_i32, read_i32, 4;
    i64 => write_i64, read_i64, 8;
}

impl Serializable for u8 {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        let mut buf = [*self];
        ar.serialize(&mut buf);
        *self = buf[0];
    }
}

impl Serializable for i8 {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        let mut buf = [*self as u8];
        ar.serialize(&mut buf);
        *self = buf[0] as i8;
    }
}

impl Serializable for f32 {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        let mut bits = self.to_bits();
        bits.serialize(ar);
        *self = f32::from_bits(bits);
    }
}

impl Serializable for f64 {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        let mut bits = self.to_bits();
        bits.serialize(ar);
        *self = f64::from_bits(bits);
    }
}

impl Serializable for bool {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        let mut value: u32 = u32::from(*self);
        value.serialize(ar);
        if value > 1 {
            tracing::error!("invalid boolean encountered while reading archive - stream is most likely corrupted");
            ar.set_error();
        }
        *self = value != 0;
    }
}

impl Serializable for String {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        if ar.is_reading() {
            let mut len: u64 = 0;
            len.serialize(ar);

            if len > ar.max_serialize_size() {
                ar.set_error();
                tracing::error!(
                    "archive is corrupted, string is too large (size: {len}, max: {})",
                    ar.max_serialize_size()
                );
                return;
            }

            let mut bytes = vec![0u8; len as usize];
            ar.serialize(&mut bytes);
            match String::from_utf8(bytes) {
                Ok(s) => *self = s,
                Err(_) => {
                    tracing::error!("archive is corrupted, string is not valid UTF-8");
                    ar.set_error();
                }
            }
        } else {
            let mut len = self.len() as u64;
            len.serialize(ar);
            if len > 0 {
                // SOUND: the writer only reads from the buffer, so the string
                // bytes are never modified.
                let bytes = unsafe { self.as_bytes_mut() };
                ar.serialize(bytes);
            }
        }
    }
}

impl Serializable for Name {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        if ar.is_reading() {
            let mut s = String::new();
            s.serialize(ar);
            *self = Name::new(&s);
        } else {
            let mut s = if self.is_none() {
                String::new()
            } else {
                self.as_str().to_string()
            };
            s.serialize(ar);
        }
    }
}

impl Serializable for Guid {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        let mut bytes = *self.as_bytes();
        ar.serialize(&mut bytes);
        *self = Guid::from_bytes(bytes);
    }
}

impl<T: Serializable + Default> Serializable for Vec<T> {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        let mut count = if ar.is_reading() { 0 } else { self.len() as u64 };
        count.serialize(ar);

        if ar.is_reading() {
            if count > ar.max_serialize_size() {
                ar.set_error();
                tracing::error!(
                    "archive is corrupted, attempted to serialize {count} array elements, max is {}",
                    ar.max_serialize_size()
                );
                return;
            }
            self.clear();
            self.reserve(count as usize);
            for _ in 0..count {
                let mut value = T::default();
                value.serialize(ar);
                if ar.has_error() {
                    return;
                }
                self.push(value);
            }
        } else {
            for value in self.iter_mut() {
                value.serialize(ar);
            }
        }
    }
}

impl<A: Serializable, B: Serializable> Serializable for (A, B) {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        self.0.serialize(ar);
        self.1.serialize(ar);
    }
}

impl<K, V> Serializable for HashMap<K, V>
where
    K: Serializable + Default + Clone + Eq + std::hash::Hash,
    V: Serializable + Default,
{
    fn serialize(&mut self, ar: &mut dyn Archive) {
        if ar.is_writing() {
            let mut count = self.len() as u32;
            count.serialize(ar);
            for (k, v) in self.iter_mut() {
                let mut key_copy = KeyCopy(k);
                key_copy.serialize(ar);
                v.serialize(ar);
            }
        } else {
            let mut count: u32 = 0;
            count.serialize(ar);
            self.clear();
            self.reserve(count as usize);
            for _ in 0..count {
                let mut k = K::default();
                let mut v = V::default();
                k.serialize(ar);
                v.serialize(ar);
                if ar.has_error() {
                    return;
                }
                self.insert(k, v);
            }
        }
    }
}

/// Write-only adapter that lets map keys go through `Serializable` without a
/// mutable borrow of the key itself.
struct KeyCopy<'a, K>(&'a K);

impl<K: Serializable + Clone> Serializable for KeyCopy<'_, K> {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        debug_assert!(ar.is_writing());
        let mut copy = self.0.clone();
        copy.serialize(ar);
    }
}

/// Implement [`Serializable`] for a fieldless enum with an integer repr.
///
/// ```
/// # use ember_object::serialize::Serializable;
/// # use ember_object::impl_archive_enum;
/// #[derive(Debug, Default, Copy, Clone, PartialEq)]
/// #[repr(u8)]
/// enum CompressionKind {
///     #[default]
///     None = 0,
///     Zlib = 1,
/// }
/// impl_archive_enum!(CompressionKind: u8, [None, Zlib]);
/// ```
///
/// Reading a value that matches no variant sets the archive error flag and
/// leaves the enum unchanged.
#[macro_export]
macro_rules! impl_archive_enum {
    ($ty:ident : $repr:ty, [$($variant:ident),+ $(,)?]) => {
        impl $crate::serialize::Serializable for $ty {
            fn serialize(&mut self, ar: &mut dyn $crate::serialize::Archive) {
                let mut raw: $repr = *self as $repr;
                <$repr as $crate::serialize::Serializable>::serialize(&mut raw, ar);
                if ar.is_reading() {
                    match raw {
                        $(x if x == $ty::$variant as $repr => *self = $ty::$variant,)+
                        _ => {
                            $crate::tracing::error!(
                                concat!("invalid ", stringify!($ty), " value in archive: {}"),
                                raw
                            );
                            ar.set_error();
                        }
                    }
                }
            }
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::serialize::{MemoryReader, MemoryWriter};

    fn round_trip<T: Serializable + Default>(value: &mut T) -> T {
        let mut writer = MemoryWriter::new();
        value.serialize(&mut writer);
        assert!(!writer.has_error());

        let bytes = writer.into_bytes();
        let mut reader = MemoryReader::new(&bytes);
        let mut out = T::default();
        out.serialize(&mut reader);
        assert!(!reader.has_error());
        out
    }

    #[test]
    fn primitives_round_trip() {
        assert_eq!(round_trip(&mut 0x1234_5678u32), 0x1234_5678);
        assert_eq!(round_trip(&mut -42i64), -42);
        assert_eq!(round_trip(&mut 0.5f32), 0.5);
        assert_eq!(round_trip(&mut f64::MIN), f64::MIN);
        assert!(round_trip(&mut true));
        assert_eq!(round_trip(&mut 255u8), 255);
    }

    #[test]
    fn integers_are_little_endian() {
        let mut writer = MemoryWriter::new();
        0xAABBCCDDu32.clone().serialize(&mut writer);
        assert_eq!(writer.into_bytes(), [0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn strings_and_names_round_trip() {
        assert_eq!(round_trip(&mut "hello".to_string()), "hello");
        assert_eq!(round_trip(&mut String::new()), "");
        assert_eq!(round_trip(&mut Name::new("SomeName")), Name::new("SomeName"));
        assert_eq!(round_trip(&mut Name::NONE), Name::NONE);
    }

    #[test]
    fn containers_round_trip() {
        assert_eq!(round_trip(&mut vec![1u32, 2, 3]), vec![1, 2, 3]);

        let mut map = HashMap::default();
        map.insert("a".to_string(), 1u32);
        map.insert("b".to_string(), 2u32);
        assert_eq!(round_trip(&mut map.clone()), map);
    }

    #[test]
    fn guid_is_sixteen_raw_bytes() {
        let guid = Guid::new();
        let mut writer = MemoryWriter::new();
        guid.clone().serialize(&mut writer);
        assert_eq!(writer.into_bytes(), guid.as_bytes());
    }

    #[test]
    fn corrupted_string_size_sets_error_without_allocating() {
        let mut writer = MemoryWriter::new();
        u64::MAX.clone().serialize(&mut writer);
        let bytes = writer.into_bytes();

        let mut reader = MemoryReader::new(&bytes);
        let mut s = "unchanged".to_string();
        s.serialize(&mut reader);
        assert!(reader.has_error());
        assert_eq!(s, "unchanged");
    }

    #[test]
    fn corrupted_vec_count_sets_error() {
        let mut writer = MemoryWriter::new();
        u64::MAX.clone().serialize(&mut writer);
        let bytes = writer.into_bytes();

        let mut reader = MemoryReader::new(&bytes);
        let mut v: Vec<u32> = vec![7];
        v.serialize(&mut reader);
        assert!(reader.has_error());
    }

    #[test]
    fn invalid_bool_sets_error() {
        let mut writer = MemoryWriter::new();
        7u32.clone().serialize(&mut writer);
        let bytes = writer.into_bytes();

        let mut reader = MemoryReader::new(&bytes);
        let mut b = false;
        b.serialize(&mut reader);
        assert!(reader.has_error());
    }

    #[derive(Debug, Default, Copy, Clone, PartialEq)]
    #[repr(u8)]
    enum TestEnum {
        #[default]
        Alpha = 0,
        Beta = 3,
    }
    impl_archive_enum!(TestEnum: u8, [Alpha, Beta]);

    #[test]
    fn enums_round_trip() {
        assert_eq!(round_trip(&mut TestEnum::Beta), TestEnum::Beta);

        let mut writer = MemoryWriter::new();
        9u8.clone().serialize(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = MemoryReader::new(&bytes);
        let mut value = TestEnum::Alpha;
        value.serialize(&mut reader);
        assert!(reader.has_error());
        assert_eq!(value, TestEnum::Alpha);
    }
}
