//! Reflected properties.
//!
//! A [`Property`] describes one reflected field: its name, type tag, byte
//! offset in the owning layout, optional accessor functions, and a payload
//! for the composite kinds (vectors carry an element property, enums carry
//! their backing numeric property and the [`EnumType`]).

use std::sync::atomic::{AtomicPtr, Ordering::SeqCst};

use ember_utils::Name;

use crate::handle::ObjectRef;
use crate::reflection::{ClassType, EnumType, Metadata, StructType};
use crate::serialize::{Archive, Serializable};

/// The closed set of property type tags.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// `i8`
    Int8,
    /// `i16`
    Int16,
    /// `i32`
    Int32,
    /// `i64`
    Int64,
    /// `u8`
    UInt8,
    /// `u16`
    UInt16,
    /// `u32`
    UInt32,
    /// `u64`
    UInt64,
    /// `f32`
    Float,
    /// `f64`
    Double,
    /// `bool`
    Bool,
    /// A strong object reference ([`ObjectRef`]).
    Object,
    /// A class reference ([`ClassRef`]).
    Class,
    /// An interned [`Name`].
    Name,
    /// A Rust [`String`].
    String,
    /// A reflected enum backed by a numeric property.
    Enum,
    /// A `Vec<T>` of a reflected element type.
    Vector,
    /// A nested reflected struct.
    Struct,
}

impl PropertyType {
    /// The on-disk tag name for this property type.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyType::Int8 => "Int8Property",
            PropertyType::Int16 => "Int16Property",
            PropertyType::Int32 => "Int32Property",
            PropertyType::Int64 => "Int64Property",
            PropertyType::UInt8 => "UInt8Property",
            PropertyType::UInt16 => "UInt16Property",
            PropertyType::UInt32 => "UInt32Property",
            PropertyType::UInt64 => "UInt64Property",
            PropertyType::Float => "FloatProperty",
            PropertyType::Double => "DoubleProperty",
            PropertyType::Bool => "BoolProperty",
            PropertyType::Object => "ObjectProperty",
            PropertyType::Class => "ClassProperty",
            PropertyType::Name => "NameProperty",
            PropertyType::String => "StringProperty",
            PropertyType::Enum => "EnumProperty",
            PropertyType::Vector => "ArrayProperty",
            PropertyType::Struct => "StructProperty",
        }
    }

    /// The value width in bytes for numeric and boolean tags; `0` for
    /// variable-width kinds.
    pub fn byte_width(&self) -> usize {
        match self {
            PropertyType::Int8 | PropertyType::UInt8 | PropertyType::Bool => 1,
            PropertyType::Int16 | PropertyType::UInt16 => 2,
            PropertyType::Int32 | PropertyType::UInt32 | PropertyType::Float => 4,
            PropertyType::Int64 | PropertyType::UInt64 | PropertyType::Double => 8,
            _ => 0,
        }
    }

    /// Whether this tag is one of the numeric types (integers and floats).
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            PropertyType::Int8
                | PropertyType::Int16
                | PropertyType::Int32
                | PropertyType::Int64
                | PropertyType::UInt8
                | PropertyType::UInt16
                | PropertyType::UInt32
                | PropertyType::UInt64
                | PropertyType::Float
                | PropertyType::Double
        )
    }
}

/// Whether the on-disk tag name refers to a numeric property type.
pub fn is_type_name_numeric(type_name: Name) -> bool {
    read_numeric_tag(type_name).is_some()
}

fn read_numeric_tag(type_name: Name) -> Option<PropertyType> {
    let tag = match type_name.as_str() {
        "Int8Property" => PropertyType::Int8,
        "Int16Property" => PropertyType::Int16,
        "Int32Property" => PropertyType::Int32,
        "Int64Property" => PropertyType::Int64,
        "UInt8Property" => PropertyType::UInt8,
        "UInt16Property" => PropertyType::UInt16,
        "UInt32Property" => PropertyType::UInt32,
        "UInt64Property" => PropertyType::UInt64,
        "FloatProperty" => PropertyType::Float,
        "DoubleProperty" => PropertyType::Double,
        _ => return None,
    };
    Some(tag)
}

/// Read a numeric value with the on-disk type named by `type_name`, widened
/// to an `f64`. Returns [`None`] when the name is not a numeric type.
pub fn read_numeric_value(ar: &mut dyn Archive, type_name: Name) -> Option<f64> {
    macro_rules! read {
        ($ty:ty) => {{
            let mut v: $ty = Default::default();
            v.serialize(ar);
            v as f64
        }};
    }
    Some(match read_numeric_tag(type_name)? {
        PropertyType::Int8 => read!(i8),
        PropertyType::Int16 => read!(i16),
        PropertyType::Int32 => read!(i32),
        PropertyType::Int64 => read!(i64),
        PropertyType::UInt8 => read!(u8),
        PropertyType::UInt16 => read!(u16),
        PropertyType::UInt32 => read!(u32),
        PropertyType::UInt64 => read!(u64),
        PropertyType::Float => read!(f32),
        PropertyType::Double => read!(f64),
        _ => unreachable!(),
    })
}

/// Read a numeric value stored at `ptr` as an `i64`.
///
/// # Safety
///
/// `ptr` must point to live storage matching `tag`'s numeric type.
unsafe fn numeric_as_i64(tag: PropertyType, ptr: *const u8) -> i64 {
    match tag {
        PropertyType::Int8 => *(ptr as *const i8) as i64,
        PropertyType::Int16 => *(ptr as *const i16) as i64,
        PropertyType::Int32 => *(ptr as *const i32) as i64,
        PropertyType::Int64 => *(ptr as *const i64),
        PropertyType::UInt8 => *ptr as i64,
        PropertyType::UInt16 => *(ptr as *const u16) as i64,
        PropertyType::UInt32 => *(ptr as *const u32) as i64,
        PropertyType::UInt64 => *(ptr as *const u64) as i64,
        _ => 0,
    }
}

/// A reference to a registered class, usable as a reflected field.
#[derive(Default, Copy, Clone)]
#[repr(transparent)]
pub struct ClassRef(pub Option<&'static ClassType>);

impl std::fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(class) => write!(f, "ClassRef({})", class.name()),
            None => write!(f, "ClassRef(null)"),
        }
    }
}

/// Returns a pointer to a property's value storage inside `container`.
pub type PropertyGetterFn = unsafe fn(container: *mut u8) -> *mut u8;
/// Writes a new value (pointed to by the second argument, typed per the
/// property's tag) into `container`.
pub type PropertySetterFn = unsafe fn(container: *mut u8, value: *const u8);

/// Erased `Vec<T>` manipulation functions for a vector property's element
/// type.
#[derive(Copy, Clone)]
pub struct VectorOps {
    len: unsafe fn(*const u8) -> usize,
    push_default: unsafe fn(*mut u8) -> *mut u8,
    at: unsafe fn(*mut u8, usize) -> *mut u8,
    remove_at: unsafe fn(*mut u8, usize),
    clear: unsafe fn(*mut u8),
}

impl VectorOps {
    /// Build the ops table for `Vec<T>`.
    pub const fn of<T: Default + 'static>() -> Self {
        unsafe fn len<T>(vec: *const u8) -> usize {
            (*(vec as *const Vec<T>)).len()
        }
        unsafe fn push_default<T: Default>(vec: *mut u8) -> *mut u8 {
            let vec = &mut *(vec as *mut Vec<T>);
            vec.push(T::default());
            vec.last_mut().unwrap() as *mut T as *mut u8
        }
        unsafe fn at<T>(vec: *mut u8, index: usize) -> *mut u8 {
            let vec = &mut *(vec as *mut Vec<T>);
            match vec.get_mut(index) {
                Some(value) => value as *mut T as *mut u8,
                None => std::ptr::null_mut(),
            }
        }
        unsafe fn remove_at<T>(vec: *mut u8, index: usize) {
            let vec = &mut *(vec as *mut Vec<T>);
            if index < vec.len() {
                vec.remove(index);
            }
        }
        unsafe fn clear<T>(vec: *mut u8) {
            (*(vec as *mut Vec<T>)).clear();
        }
        Self {
            len: len::<T>,
            push_default: push_default::<T>,
            at: at::<T>,
            remove_at: remove_at::<T>,
            clear: clear::<T>,
        }
    }
}

/// Per-kind payload of a [`Property`].
pub enum PropertyKind {
    /// Numerics, `bool`, [`Name`], [`String`], object and class references.
    Plain,
    /// A nested reflected struct.
    Struct {
        /// Resolves the struct's reflection entry.
        struct_fn: fn() -> &'static StructType,
    },
    /// A reflected enum; numeric storage delegates to `underlying`.
    Enum {
        /// The backing numeric property.
        underlying: &'static Property,
        /// Resolves the enum's reflection entry.
        enum_fn: fn() -> &'static EnumType,
    },
    /// A `Vec<T>` of reflected elements.
    Vector {
        /// The element property.
        inner: &'static Property,
        /// Erased `Vec<T>` manipulation functions.
        ops: VectorOps,
    },
}

/// One reflected field of a struct or class.
pub struct Property {
    name: Name,
    type_tag: PropertyType,
    offset: usize,
    getter: Option<PropertyGetterFn>,
    setter: Option<PropertySetterFn>,
    next: AtomicPtr<Property>,
    metadata: Metadata,
    kind: PropertyKind,
}

impl Property {
    pub(crate) fn new(
        name: Name,
        type_tag: PropertyType,
        offset: usize,
        getter: Option<PropertyGetterFn>,
        setter: Option<PropertySetterFn>,
        metadata: Metadata,
        kind: PropertyKind,
    ) -> Self {
        Self {
            name,
            type_tag,
            offset,
            getter,
            setter,
            next: AtomicPtr::new(std::ptr::null_mut()),
            metadata,
            kind,
        }
    }

    /// The property's field name.
    pub fn name(&self) -> Name {
        self.name
    }

    /// The property's type tag.
    pub fn type_tag(&self) -> PropertyType {
        self.type_tag
    }

    /// The on-disk tag name for the property's type.
    pub fn type_name(&self) -> Name {
        Name::new(self.type_tag.type_name())
    }

    /// The field's byte offset in the owning layout.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The property's metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Whether the property's tag equals `tag`.
    pub fn is_a(&self, tag: PropertyType) -> bool {
        self.type_tag == tag
    }

    /// The next property in the owning struct's linked list.
    pub fn next(&self) -> Option<&'static Property> {
        let next = self.next.load(SeqCst);
        if next.is_null() {
            None
        } else {
            // SOUND: properties are leaked at registration time and never
            // freed.
            unsafe { Some(&*next) }
        }
    }

    pub(crate) fn set_next(&self, next: *mut Property) {
        self.next.store(next, SeqCst);
    }

    /// A pointer to the property's value inside `container`.
    ///
    /// Routes through the getter when one is registered; field-backed
    /// properties apply the byte offset.
    ///
    /// # Safety
    ///
    /// `container` must point to a live value of the owning struct's layout.
    pub unsafe fn value_ptr(&self, container: *mut u8) -> *mut u8 {
        match self.getter {
            Some(getter) => getter(container),
            None => container.add(self.offset),
        }
    }

    /// The enum payload, when this is an enum property.
    pub fn as_enum(&self) -> Option<(&'static Property, &'static EnumType)> {
        match &self.kind {
            PropertyKind::Enum {
                underlying,
                enum_fn,
            } => Some((*underlying, enum_fn())),
            _ => None,
        }
    }

    /// The nested struct's reflection entry, when this is a struct property.
    pub fn as_struct(&self) -> Option<&'static StructType> {
        match &self.kind {
            PropertyKind::Struct { struct_fn } => Some(struct_fn()),
            _ => None,
        }
    }

    /// The element property, when this is a vector property.
    pub fn vector_inner(&self) -> Option<&'static Property> {
        match &self.kind {
            PropertyKind::Vector { inner, .. } => Some(*inner),
            _ => None,
        }
    }

    /// Number of elements in the vector at `value_ptr`.
    ///
    /// # Safety
    ///
    /// `value_ptr` must point to the `Vec` storage of this vector property.
    pub unsafe fn vector_len(&self, value_ptr: *const u8) -> usize {
        match &self.kind {
            PropertyKind::Vector { ops, .. } => (ops.len)(value_ptr),
            _ => 0,
        }
    }

    /// Push a default-constructed element and return its pointer.
    ///
    /// # Safety
    ///
    /// `value_ptr` must point to the `Vec` storage of this vector property.
    pub unsafe fn vector_push_default(&self, value_ptr: *mut u8) -> *mut u8 {
        match &self.kind {
            PropertyKind::Vector { ops, .. } => (ops.push_default)(value_ptr),
            _ => std::ptr::null_mut(),
        }
    }

    /// Pointer to element `index`, or null when out of range.
    ///
    /// # Safety
    ///
    /// `value_ptr` must point to the `Vec` storage of this vector property.
    pub unsafe fn vector_at(&self, value_ptr: *mut u8, index: usize) -> *mut u8 {
        match &self.kind {
            PropertyKind::Vector { ops, .. } => (ops.at)(value_ptr, index),
            _ => std::ptr::null_mut(),
        }
    }

    /// Remove element `index`.
    ///
    /// # Safety
    ///
    /// `value_ptr` must point to the `Vec` storage of this vector property.
    pub unsafe fn vector_remove_at(&self, value_ptr: *mut u8, index: usize) {
        if let PropertyKind::Vector { ops, .. } = &self.kind {
            (ops.remove_at)(value_ptr, index);
        }
    }

    /// Clear the vector.
    ///
    /// # Safety
    ///
    /// `value_ptr` must point to the `Vec` storage of this vector property.
    pub unsafe fn vector_clear(&self, value_ptr: *mut u8) {
        if let PropertyKind::Vector { ops, .. } = &self.kind {
            (ops.clear)(value_ptr);
        }
    }

    /// Read or write the property's value at `value_ptr`.
    ///
    /// # Safety
    ///
    /// `value_ptr` must point to live storage matching the property's type
    /// tag (as produced by [`value_ptr`][Self::value_ptr]).
    pub unsafe fn serialize(&self, ar: &mut dyn Archive, value_ptr: *mut u8) {
        match &self.kind {
            PropertyKind::Plain => match self.type_tag {
                PropertyType::Int8 => (*(value_ptr as *mut i8)).serialize(ar),
                PropertyType::Int16 => (*(value_ptr as *mut i16)).serialize(ar),
                PropertyType::Int32 => (*(value_ptr as *mut i32)).serialize(ar),
                PropertyType::Int64 => (*(value_ptr as *mut i64)).serialize(ar),
                PropertyType::UInt8 => (*value_ptr).serialize(ar),
                PropertyType::UInt16 => (*(value_ptr as *mut u16)).serialize(ar),
                PropertyType::UInt32 => (*(value_ptr as *mut u32)).serialize(ar),
                PropertyType::UInt64 => (*(value_ptr as *mut u64)).serialize(ar),
                PropertyType::Float => (*(value_ptr as *mut f32)).serialize(ar),
                PropertyType::Double => (*(value_ptr as *mut f64)).serialize(ar),
                PropertyType::Bool => (*(value_ptr as *mut bool)).serialize(ar),
                PropertyType::Name => (*(value_ptr as *mut Name)).serialize(ar),
                PropertyType::String => (*(value_ptr as *mut String)).serialize(ar),
                PropertyType::Object => {
                    ar.serialize_object_ref(&mut *(value_ptr as *mut ObjectRef))
                }
                PropertyType::Class => {
                    let class_ref = &mut *(value_ptr as *mut ClassRef);
                    let mut name = match class_ref.0 {
                        Some(class) => class.name(),
                        None => Name::NONE,
                    };
                    name.serialize(ar);
                    if ar.is_reading() {
                        class_ref.0 = if name.is_none() {
                            None
                        } else {
                            crate::reflection::find_class(name)
                        };
                    }
                }
                _ => unreachable!("composite tag with a plain payload"),
            },
            PropertyKind::Enum {
                underlying,
                enum_fn,
            } => {
                if ar.is_reading() {
                    // Stage the numeric into scratch storage and validate it
                    // against the enum's entries before touching the field:
                    // writing an unknown discriminant into a Rust enum would
                    // be undefined behavior.
                    let mut scratch: u64 = 0;
                    let scratch_ptr = &mut scratch as *mut u64 as *mut u8;
                    underlying.serialize(ar, scratch_ptr);
                    let value = numeric_as_i64(underlying.type_tag, scratch_ptr);
                    if enum_fn().name_of(value).is_some() {
                        std::ptr::copy_nonoverlapping(
                            scratch_ptr,
                            value_ptr,
                            underlying.type_tag.byte_width(),
                        );
                    } else {
                        tracing::warn!(
                            "enum property '{}' read unknown value {value} for '{}', keeping current value",
                            self.name,
                            enum_fn().name()
                        );
                    }
                } else {
                    underlying.serialize(ar, value_ptr);
                }
            }
            PropertyKind::Struct { struct_fn } => {
                struct_fn().serialize_tagged_properties(ar, value_ptr);
            }
            PropertyKind::Vector { inner, ops } => {
                let mut count = if ar.is_reading() {
                    0u64
                } else {
                    (ops.len)(value_ptr) as u64
                };
                count.serialize(ar);

                if ar.is_reading() {
                    if count > ar.max_serialize_size() {
                        ar.set_error();
                        tracing::error!(
                            "archive is corrupted, vector property '{}' claims {count} elements",
                            self.name
                        );
                        return;
                    }
                    (ops.clear)(value_ptr);
                    for _ in 0..count {
                        let element = (ops.push_default)(value_ptr);
                        inner.serialize(ar, element);
                        if ar.has_error() {
                            return;
                        }
                    }
                } else {
                    for index in 0..count {
                        let element = (ops.at)(value_ptr, index as usize);
                        inner.serialize(ar, element);
                    }
                }
            }
        }
    }

    /// Whether `value` fits this property's numeric range exactly.
    pub fn value_fits(&self, value: f64) -> bool {
        match self.type_tag {
            PropertyType::Int8 => value >= i8::MIN as f64 && value <= i8::MAX as f64,
            PropertyType::Int16 => value >= i16::MIN as f64 && value <= i16::MAX as f64,
            PropertyType::Int32 => value >= i32::MIN as f64 && value <= i32::MAX as f64,
            PropertyType::Int64 => value >= i64::MIN as f64 && value <= i64::MAX as f64,
            PropertyType::UInt8 => value >= 0.0 && value <= u8::MAX as f64,
            PropertyType::UInt16 => value >= 0.0 && value <= u16::MAX as f64,
            PropertyType::UInt32 => value >= 0.0 && value <= u32::MAX as f64,
            PropertyType::UInt64 => value >= 0.0 && value <= u64::MAX as f64,
            PropertyType::Float | PropertyType::Double => true,
            _ => false,
        }
    }

    /// Write `value` into the property with a numeric coercion.
    ///
    /// Non-numeric properties ignore the call with a logged error.
    ///
    /// # Safety
    ///
    /// `container` must point to a live value of the owning struct's layout.
    pub unsafe fn set_value(&self, container: *mut u8, value: f64) {
        macro_rules! write_as {
            ($ty:ty) => {{
                let typed = value as $ty;
                match self.setter {
                    Some(setter) => setter(container, &typed as *const $ty as *const u8),
                    None => *(container.add(self.offset) as *mut $ty) = typed,
                }
            }};
        }
        match self.type_tag {
            PropertyType::Int8 => write_as!(i8),
            PropertyType::Int16 => write_as!(i16),
            PropertyType::Int32 => write_as!(i32),
            PropertyType::Int64 => write_as!(i64),
            PropertyType::UInt8 => write_as!(u8),
            PropertyType::UInt16 => write_as!(u16),
            PropertyType::UInt32 => write_as!(u32),
            PropertyType::UInt64 => write_as!(u64),
            PropertyType::Float => write_as!(f32),
            PropertyType::Double => write_as!(f64),
            _ => {
                tracing::error!(
                    "cannot numerically assign to non-numeric property '{}'",
                    self.name
                );
            }
        }
    }
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("type", &self.type_tag)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}
