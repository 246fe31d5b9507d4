//! Reflection graph entities: structs, classes, and enums.
//!
//! These are themselves objects living in the object table, which is what
//! lets reflected code treat "the class of X" like any other reference. The
//! intrinsic entries (`Object`, `Struct`, `Class`, `Enum`, `Package`) are
//! bootstrapped before the first registration flush.

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering::SeqCst};

use ember_utils::{HashMap, Name};
use once_cell::sync::OnceCell;

use crate::flags::ObjectFlags;
use crate::handle::ObjectHandle;
use crate::object::{construct_in_place, Object, ObjectFactoryFn, ObjectHooks, ObjectType};
use crate::reflection::registration::{CLASS_CLASS_CELL, ENUM_CLASS_CELL, STRUCT_CLASS_CELL};
use crate::reflection::Property;
use crate::table::object_table;

/// Key-value metadata attached to reflection entities. Both keys and values
/// are interned names.
#[derive(Default)]
pub struct Metadata {
    map: HashMap<Name, Name>,
}

impl Metadata {
    /// Add a key-value pair.
    pub fn add(&mut self, key: &str, value: &str) {
        self.map.insert(Name::new(key), Name::new(value));
    }

    /// Look up the value for `key`.
    pub fn get(&self, key: &str) -> Option<Name> {
        self.map.get(&Name::new(key)).copied()
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(&Name::new(key))
    }

    /// Iterate over all pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Name, Name)> + '_ {
        self.map.iter().map(|(k, v)| (*k, *v))
    }
}

impl std::fmt::Debug for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// A reflected struct: a super-struct pointer, a size and alignment, and a
/// singly-linked list of properties.
#[repr(C)]
pub struct StructType {
    base: Object,
    super_struct: AtomicPtr<StructType>,
    linked_property: AtomicPtr<Property>,
    linked: AtomicBool,
    pub(crate) size: usize,
    pub(crate) align: usize,
    pub(crate) metadata: Metadata,
}

impl Default for StructType {
    fn default() -> Self {
        Self {
            base: Object::default(),
            super_struct: AtomicPtr::new(std::ptr::null_mut()),
            linked_property: AtomicPtr::new(std::ptr::null_mut()),
            linked: AtomicBool::new(false),
            size: 0,
            align: 1,
            metadata: Metadata::default(),
        }
    }
}

// SOUND: `StructType` is `#[repr(C)]` with `Object` first, and its class is
// populated by the intrinsic bootstrap.
unsafe impl ObjectType for StructType {
    const TYPE_NAME: &'static str = "Struct";

    fn static_class() -> &'static ClassType {
        STRUCT_CLASS_CELL.get()
    }
}

impl StructType {
    /// The struct's name.
    pub fn name(&self) -> Name {
        self.base.name()
    }

    /// The struct's instance size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The struct's instance alignment in bytes.
    pub fn align(&self) -> usize {
        self.align
    }

    /// The struct's metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The super struct, or [`None`] at the root of a hierarchy.
    pub fn super_struct(&self) -> Option<&'static StructType> {
        let ptr = self.super_struct.load(SeqCst);
        if ptr.is_null() {
            None
        } else {
            // SOUND: reflection objects live in the object table with stable
            // addresses for the process lifetime.
            unsafe { Some(&*ptr) }
        }
    }

    pub(crate) fn set_super_struct(&self, super_struct: &'static StructType) {
        self.super_struct
            .store(super_struct as *const _ as *mut _, SeqCst);
    }

    /// Walk the super chain checking whether this struct is `base` or
    /// derives from it.
    pub fn is_child_of(&self, base: &StructType) -> bool {
        let mut current: Option<&StructType> = Some(self);
        while let Some(s) = current {
            if std::ptr::eq(s, base) {
                return true;
            }
            current = s.super_struct();
        }
        false
    }

    /// Head of the property linked list.
    pub fn linked_property(&self) -> Option<&'static Property> {
        let head = self.linked_property.load(SeqCst);
        if head.is_null() {
            None
        } else {
            // SOUND: properties are leaked at registration time.
            unsafe { Some(&*head) }
        }
    }

    /// Iterate the property linked list. After [`link`][Self::link] this
    /// yields the struct's own properties first, then the super chain's.
    pub fn properties(&self) -> PropertyIter {
        PropertyIter {
            current: self.linked_property(),
        }
    }

    /// Append `property` to the end of the linked list.
    pub(crate) fn add_property(&self, property: &'static Property) {
        property.set_next(std::ptr::null_mut());
        let property_ptr = property as *const Property as *mut Property;
        match self.linked_property() {
            None => self.linked_property.store(property_ptr, SeqCst),
            Some(head) => {
                let mut current = head;
                while let Some(next) = current.next() {
                    current = next;
                }
                current.set_next(property_ptr);
            }
        }
    }

    /// Find a property by name anywhere in the linked chain.
    pub fn find_property(&self, name: Name) -> Option<&'static Property> {
        self.properties().find(|p| p.name() == name)
    }

    /// Link this struct into its hierarchy.
    ///
    /// Appends the super struct's property list to the end of this struct's
    /// own list, so iteration yields own properties first and inherited
    /// ones after. Idempotent; must be called before the struct is used for
    /// serialization or instance construction.
    pub fn link(&self) {
        if self.linked.swap(true, SeqCst) {
            return;
        }

        let Some(super_struct) = self.super_struct() else {
            return;
        };
        super_struct.link();

        let Some(super_head) = super_struct.linked_property() else {
            return;
        };
        let super_head_ptr = super_head as *const Property as *mut Property;
        match self.linked_property() {
            None => self.linked_property.store(super_head_ptr, SeqCst),
            Some(head) => {
                let mut current = head;
                while let Some(next) = current.next() {
                    current = next;
                }
                current.set_next(super_head_ptr);
            }
        }
    }
}

impl std::fmt::Debug for StructType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructType")
            .field("name", &self.name())
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Iterator over a struct's linked property list.
pub struct PropertyIter {
    current: Option<&'static Property>,
}

impl Iterator for PropertyIter {
    type Item = &'static Property;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = current.next();
        Some(current)
    }
}

/// A reflected class: a [`StructType`] plus a factory function, lifecycle
/// hooks, and a lazily-created class default object.
#[repr(C)]
pub struct ClassType {
    pub(crate) base: StructType,
    pub(crate) factory: ObjectFactoryFn,
    pub(crate) hooks: ObjectHooks,
    pub(crate) class_unique: AtomicU32,
    cdo: OnceCell<ObjectHandle>,
}

/// Factory used by class objects that cannot be instantiated.
unsafe fn abstract_factory(_mem: *mut u8) {
    unreachable!("attempted to construct an instance of an abstract class");
}

impl Default for ClassType {
    fn default() -> Self {
        Self {
            base: StructType::default(),
            factory: abstract_factory,
            hooks: ObjectHooks::of::<Object>(),
            class_unique: AtomicU32::new(0),
            cdo: OnceCell::new(),
        }
    }
}

// SOUND: `ClassType` is `#[repr(C)]` with `Object` first (through
// `StructType`), and its class is populated by the intrinsic bootstrap.
unsafe impl ObjectType for ClassType {
    const TYPE_NAME: &'static str = "Class";

    fn static_class() -> &'static ClassType {
        CLASS_CLASS_CELL.get()
    }
}

impl std::ops::Deref for ClassType {
    type Target = StructType;

    fn deref(&self) -> &StructType {
        &self.base
    }
}

impl ClassType {
    /// The class's factory function.
    pub fn factory(&self) -> ObjectFactoryFn {
        self.factory
    }

    /// The class's lifecycle hooks.
    pub fn hooks(&self) -> &ObjectHooks {
        &self.hooks
    }

    /// The super class, or [`None`] for root classes.
    pub fn super_class(&self) -> Option<&'static ClassType> {
        // SOUND: a class's super struct is always registered as a class.
        self.super_struct()
            .map(|s| unsafe { &*(s as *const StructType as *const ClassType) })
    }

    /// Hand out the next per-class unique counter value, used for
    /// auto-generated object names.
    pub(crate) fn next_unique(&self) -> u32 {
        self.class_unique.fetch_add(1, SeqCst) + 1
    }

    /// The class default object, created on first request.
    ///
    /// The CDO is constructed through the class factory, flagged
    /// [`ObjectFlags::DEFAULT_OBJECT`], rooted, and handed to
    /// [`ObjectType::post_create_cdo`] exactly once.
    pub fn class_default_object(&'static self) -> ObjectHandle {
        *self.cdo.get_or_init(|| {
            let name = Name::new(&format!("Default__{}", self.name()));
            let handle = crate::new_object_of_class(
                self,
                ObjectHandle::NULL,
                name,
                ember_utils::Guid::new(),
                ObjectFlags::DEFAULT_OBJECT | ObjectFlags::TRANSIENT,
            );
            let object = object_table().resolve(handle);
            if !object.is_null() {
                // SOUND: the object was just created and is not yet shared.
                unsafe {
                    (*object).add_to_root();
                    (self.hooks.post_create_cdo)(object);
                }
            }
            handle
        })
    }
}

impl std::fmt::Debug for ClassType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassType")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// A reflected enum: an ordered list of `(name, value)` pairs.
#[repr(C)]
#[derive(Default)]
pub struct EnumType {
    base: Object,
    pub(crate) entries: Vec<(Name, i64)>,
    pub(crate) metadata: Metadata,
}

// SOUND: `EnumType` is `#[repr(C)]` with `Object` first, and its class is
// populated by the intrinsic bootstrap.
unsafe impl ObjectType for EnumType {
    const TYPE_NAME: &'static str = "Enum";

    fn static_class() -> &'static ClassType {
        ENUM_CLASS_CELL.get()
    }
}

impl EnumType {
    /// The enum's name.
    pub fn name(&self) -> Name {
        self.base.name()
    }

    /// The ordered `(name, value)` pairs.
    pub fn entries(&self) -> &[(Name, i64)] {
        &self.entries
    }

    /// The enum's metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The numeric value for `name`.
    pub fn value_of(&self, name: Name) -> Option<i64> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    /// The name for a numeric `value`.
    pub fn name_of(&self, value: i64) -> Option<Name> {
        self.entries
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(n, _)| *n)
    }
}

impl std::fmt::Debug for EnumType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnumType")
            .field("name", &self.name())
            .field("entries", &self.entries)
            .finish()
    }
}

// The root `Object` class is also a reflected type.
//
// SOUND: `Object` trivially starts with itself, and its class is populated
// by the intrinsic bootstrap.
unsafe impl ObjectType for Object {
    const TYPE_NAME: &'static str = "Object";

    fn static_class() -> &'static ClassType {
        crate::reflection::registration::OBJECT_CLASS_CELL.get()
    }
}

/// Construction data for an intrinsic bootstrap class.
pub(crate) struct IntrinsicClassDesc {
    pub name: &'static str,
    pub size: usize,
    pub align: usize,
    pub factory: ObjectFactoryFn,
    pub hooks: ObjectHooks,
}

impl IntrinsicClassDesc {
    pub(crate) fn of<T: ObjectType>() -> Self {
        Self {
            name: T::TYPE_NAME,
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            factory: construct_in_place::<T>,
            hooks: ObjectHooks::of::<T>(),
        }
    }
}
