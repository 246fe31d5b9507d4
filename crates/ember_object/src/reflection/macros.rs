//! Macros that generate registration records for reflected types.
//!
//! The Rust type is declared normally (`#[repr(C)]`, `Object` first for
//! classes, `Default` everywhere); the macro then derives the property
//! parameter tables from it:
//!
//! ```ignore
//! #[repr(C)]
//! #[derive(Default)]
//! struct MeshAsset {
//!     base: Object,
//!     vertex_count: i32,
//!     source_path: String,
//!     material: ObjectRef,
//!     lods: Vec<f32>,
//! }
//!
//! ember_class! {
//!     class MeshAsset : Object in "/Script/Game" {
//!         vertex_count: int32,
//!         source_path: string,
//!         material: object(MaterialAsset),
//!         lods: vector(float),
//!     }
//!     meta { "Asset" => "true" }
//! }
//! ```
//!
//! Field kinds: `int8`..`int64`, `uint8`..`uint64`, `float`, `double`,
//! `bool`, `name`, `string`, `class`, `object(T)`, `struct(T)`,
//! `enum(T: intN)`, and `vector(kind)`.

/// Maps a field kind to the Rust type backing it.
#[doc(hidden)]
#[macro_export]
macro_rules! __ember_field_ty {
    (int8) => { i8 };
    (int16) => { i16 };
    (int32) => { i32 };
    (int64) => { i64 };
    (uint8) => { u8 };
    (uint16) => { u16 };
    (uint32) => { u32 };
    (uint64) => { u64 };
    (float) => { f32 };
    (double) => { f64 };
    (bool) => { bool };
    (name) => { $crate::Name };
    (string) => { ::std::string::String };
    (class) => { $crate::reflection::ClassRef };
    (object($t:ty)) => { $crate::handle::ObjectRef };
    (struct($t:ty)) => { $t };
    (enum($t:ty : $u:tt)) => { $t };
}

/// Maps a field kind to its [`PropertyType`][crate::reflection::PropertyType] tag.
#[doc(hidden)]
#[macro_export]
macro_rules! __ember_prop_type {
    (int8) => { $crate::reflection::PropertyType::Int8 };
    (int16) => { $crate::reflection::PropertyType::Int16 };
    (int32) => { $crate::reflection::PropertyType::Int32 };
    (int64) => { $crate::reflection::PropertyType::Int64 };
    (uint8) => { $crate::reflection::PropertyType::UInt8 };
    (uint16) => { $crate::reflection::PropertyType::UInt16 };
    (uint32) => { $crate::reflection::PropertyType::UInt32 };
    (uint64) => { $crate::reflection::PropertyType::UInt64 };
    (float) => { $crate::reflection::PropertyType::Float };
    (double) => { $crate::reflection::PropertyType::Double };
    (bool) => { $crate::reflection::PropertyType::Bool };
    (name) => { $crate::reflection::PropertyType::Name };
    (string) => { $crate::reflection::PropertyType::String };
    (class) => { $crate::reflection::PropertyType::Class };
    (object($t:ty)) => { $crate::reflection::PropertyType::Object };
    (struct($t:ty)) => { $crate::reflection::PropertyType::Struct };
    (enum($t:ty : $u:tt)) => { $crate::reflection::PropertyType::Enum };
}

/// Maps a field kind to its [`PropertyExtra`][crate::reflection::PropertyExtra] payload.
#[doc(hidden)]
#[macro_export]
macro_rules! __ember_prop_extra {
    (object($t:ty)) => {
        $crate::reflection::PropertyExtra::ObjectClass(
            <$t as $crate::object::ObjectType>::static_class,
        )
    };
    (struct($t:ty)) => {
        $crate::reflection::PropertyExtra::Struct(
            <$t as $crate::reflection::StructRegistration>::static_struct,
        )
    };
    (enum($t:ty : $u:tt)) => {
        $crate::reflection::PropertyExtra::Enum(
            <$t as $crate::reflection::EnumRegistration>::static_enum,
        )
    };
    ($($other:tt)*) => {
        $crate::reflection::PropertyExtra::None
    };
}

/// Builds a `&'static [PropertyParams]` table from a field list.
///
/// Records come out in reverse declaration order with each composite's
/// inner record immediately before its container, which is the layout the
/// registration flush walks.
#[doc(hidden)]
#[macro_export]
macro_rules! __ember_props {
    ($owner:ty; $($fields:tt)*) => {
        $crate::__ember_props!(@accum $owner; []; $($fields)*)
    };

    (@accum $owner:ty; [$($acc:expr,)*];) => {
        &[$($acc,)*]
    };

    // Vectors carry an inner element record.
    (@accum $owner:ty; [$($acc:expr,)*]; $fname:ident : vector($($elem:tt)+), $($rest:tt)*) => {
        $crate::__ember_props!(@accum $owner;
            [
                $crate::reflection::PropertyParams {
                    name: stringify!($fname),
                    type_tag: $crate::__ember_prop_type!($($elem)+),
                    offset: 0,
                    getter: None,
                    setter: None,
                    extra: $crate::__ember_prop_extra!($($elem)+),
                    metadata: &[],
                },
                $crate::reflection::PropertyParams {
                    name: stringify!($fname),
                    type_tag: $crate::reflection::PropertyType::Vector,
                    offset: ::std::mem::offset_of!($owner, $fname),
                    getter: None,
                    setter: None,
                    extra: $crate::reflection::PropertyExtra::Vector(
                        $crate::reflection::VectorOps::of::<$crate::__ember_field_ty!($($elem)+)>(),
                    ),
                    metadata: &[],
                },
                $($acc,)*
            ];
            $($rest)*)
    };

    // Enums carry their backing numeric record.
    (@accum $owner:ty; [$($acc:expr,)*]; $fname:ident : enum($t:ty : $u:tt), $($rest:tt)*) => {
        $crate::__ember_props!(@accum $owner;
            [
                $crate::reflection::PropertyParams {
                    name: stringify!($fname),
                    type_tag: $crate::__ember_prop_type!($u),
                    offset: 0,
                    getter: None,
                    setter: None,
                    extra: $crate::reflection::PropertyExtra::None,
                    metadata: &[],
                },
                $crate::reflection::PropertyParams {
                    name: stringify!($fname),
                    type_tag: $crate::reflection::PropertyType::Enum,
                    offset: ::std::mem::offset_of!($owner, $fname),
                    getter: None,
                    setter: None,
                    extra: $crate::__ember_prop_extra!(enum($t : $u)),
                    metadata: &[],
                },
                $($acc,)*
            ];
            $($rest)*)
    };

    // Parenthesized kinds: object(T), struct(T).
    (@accum $owner:ty; [$($acc:expr,)*]; $fname:ident : $kind:ident($t:ty), $($rest:tt)*) => {
        $crate::__ember_props!(@accum $owner;
            [
                $crate::reflection::PropertyParams {
                    name: stringify!($fname),
                    type_tag: $crate::__ember_prop_type!($kind($t)),
                    offset: ::std::mem::offset_of!($owner, $fname),
                    getter: None,
                    setter: None,
                    extra: $crate::__ember_prop_extra!($kind($t)),
                    metadata: &[],
                },
                $($acc,)*
            ];
            $($rest)*)
    };

    // `struct(T)` spelled out because `struct` does not match `$kind:ident`.
    (@accum $owner:ty; [$($acc:expr,)*]; $fname:ident : struct($t:ty), $($rest:tt)*) => {
        $crate::__ember_props!(@accum $owner;
            [
                $crate::reflection::PropertyParams {
                    name: stringify!($fname),
                    type_tag: $crate::reflection::PropertyType::Struct,
                    offset: ::std::mem::offset_of!($owner, $fname),
                    getter: None,
                    setter: None,
                    extra: $crate::__ember_prop_extra!(struct($t)),
                    metadata: &[],
                },
                $($acc,)*
            ];
            $($rest)*)
    };

    // Bare kinds: numerics, bool, name, string, class.
    (@accum $owner:ty; [$($acc:expr,)*]; $fname:ident : $kind:ident, $($rest:tt)*) => {
        $crate::__ember_props!(@accum $owner;
            [
                $crate::reflection::PropertyParams {
                    name: stringify!($fname),
                    type_tag: $crate::__ember_prop_type!($kind),
                    offset: ::std::mem::offset_of!($owner, $fname),
                    getter: None,
                    setter: None,
                    extra: $crate::reflection::PropertyExtra::None,
                    metadata: &[],
                },
                $($acc,)*
            ];
            $($rest)*)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __ember_meta {
    ($($key:literal => $value:literal),* $(,)?) => {
        &[$($crate::reflection::MetadataPairParam { key: $key, value: $value },)*]
    };
}

/// Declare the registration record for a reflected class.
///
/// See the [module docs](crate::reflection::macros) for the field-kind
/// grammar. The macro implements [`ObjectType`][crate::object::ObjectType]
/// and [`ClassRegistration`][crate::reflection::ClassRegistration] for the
/// type; pass `T::class_params()` to
/// [`register_compiled_in_info`][crate::reflection::register_compiled_in_info].
#[macro_export]
macro_rules! ember_class {
    (
        class $ty:ident : $super:ident in $pkg:literal { $($fields:tt)* }
        $(meta { $($mk:literal => $mv:literal),* $(,)? })?
    ) => {
        const _: () = {
            static CELL: $crate::reflection::ClassCell = $crate::reflection::ClassCell::new();
            static PROPS: &[$crate::reflection::PropertyParams] =
                $crate::__ember_props!($ty; $($fields)*);
            static META: &[$crate::reflection::MetadataPairParam] =
                $crate::__ember_meta!($($($mk => $mv),*)?);
            static PARAMS: $crate::reflection::ClassParams = $crate::reflection::ClassParams {
                cell: &CELL,
                name: stringify!($ty),
                package_name: $pkg,
                size: ::std::mem::size_of::<$ty>(),
                align: ::std::mem::align_of::<$ty>(),
                super_fn: <$super as $crate::object::ObjectType>::static_class,
                factory: $crate::object::construct_in_place::<$ty>,
                hooks: $crate::object::ObjectHooks::of::<$ty>(),
                properties: PROPS,
                metadata: META,
            };

            // SOUND: the macro contract requires `$ty` to be `#[repr(C)]`
            // with `Object` as its first field, and the property table above
            // is derived from the type's real field offsets.
            unsafe impl $crate::object::ObjectType for $ty {
                const TYPE_NAME: &'static str = stringify!($ty);
                const PACKAGE_NAME: &'static str = $pkg;

                fn static_class() -> &'static $crate::reflection::ClassType {
                    CELL.get()
                }
            }

            impl $crate::reflection::ClassRegistration for $ty {
                fn class_params() -> &'static $crate::reflection::ClassParams {
                    &PARAMS
                }
            }
        };
    };
}

/// Declare the registration record for a reflected struct.
///
/// Implements [`StructRegistration`][crate::reflection::StructRegistration]
/// for the type.
#[macro_export]
macro_rules! ember_struct {
    (
        struct $ty:ident $(: $super:ident)? in $pkg:literal { $($fields:tt)* }
        $(meta { $($mk:literal => $mv:literal),* $(,)? })?
    ) => {
        const _: () = {
            static CELL: $crate::reflection::StructCell = $crate::reflection::StructCell::new();
            static PROPS: &[$crate::reflection::PropertyParams] =
                $crate::__ember_props!($ty; $($fields)*);
            static META: &[$crate::reflection::MetadataPairParam] =
                $crate::__ember_meta!($($($mk => $mv),*)?);
            static PARAMS: $crate::reflection::StructParams = $crate::reflection::StructParams {
                cell: &CELL,
                name: stringify!($ty),
                package_name: $pkg,
                size: ::std::mem::size_of::<$ty>(),
                align: ::std::mem::align_of::<$ty>(),
                super_fn: $crate::__ember_struct_super!($($super)?),
                properties: PROPS,
                metadata: META,
            };

            impl $crate::reflection::StructRegistration for $ty {
                fn struct_params() -> &'static $crate::reflection::StructParams {
                    &PARAMS
                }

                fn static_struct() -> &'static $crate::reflection::StructType {
                    CELL.get()
                }
            }
        };
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __ember_struct_super {
    () => {
        None
    };
    ($super:ty) => {
        Some(<$super as $crate::reflection::StructRegistration>::static_struct)
    };
}

/// Declare the registration record for a reflected enum.
///
/// The Rust enum must use explicit discriminants matching the listed
/// values. Implements
/// [`EnumRegistration`][crate::reflection::EnumRegistration] for the type.
#[macro_export]
macro_rules! ember_enum {
    (
        enum $ty:ident in $pkg:literal { $($variant:ident = $value:expr),+ $(,)? }
        $(meta { $($mk:literal => $mv:literal),* $(,)? })?
    ) => {
        const _: () = {
            static CELL: $crate::reflection::EnumCell = $crate::reflection::EnumCell::new();
            static ENTRIES: &[$crate::reflection::EnumeratorParam] = &[
                $($crate::reflection::EnumeratorParam {
                    name: stringify!($variant),
                    value: $value,
                },)+
            ];
            static META: &[$crate::reflection::MetadataPairParam] =
                $crate::__ember_meta!($($($mk => $mv),*)?);
            static PARAMS: $crate::reflection::EnumParams = $crate::reflection::EnumParams {
                cell: &CELL,
                name: stringify!($ty),
                package_name: $pkg,
                entries: ENTRIES,
                metadata: META,
            };

            impl $crate::reflection::EnumRegistration for $ty {
                fn enum_params() -> &'static $crate::reflection::EnumParams {
                    &PARAMS
                }

                fn static_enum() -> &'static $crate::reflection::EnumType {
                    CELL.get()
                }
            }
        };
    };
}
