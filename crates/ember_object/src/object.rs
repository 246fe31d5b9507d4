//! The object base header and the [`ObjectType`] trait.

use std::sync::atomic::{AtomicU32, Ordering::SeqCst};

use ember_utils::{Guid, Name};

use crate::flags::ObjectFlags;
use crate::handle::{ObjectHandle, INDEX_NONE};
use crate::reflection::ClassType;
use crate::table::object_table;

/// The base header embedded at the start of every reflected object.
///
/// Reflected types are `#[repr(C)]` structs whose first field is an
/// `Object`; the table stores `*mut Object` pointers and the class describes
/// the rest of the layout.
#[repr(C)]
pub struct Object {
    class: *const ClassType,
    package: ObjectHandle,
    name: Name,
    guid: Guid,
    index: i32,
    flags: AtomicU32,
}

// SOUND: the class pointer refers to a table-owned allocation with a stable
// address for the process lifetime, and flag access is atomic. Field
// mutation of reflected objects is the caller's aliasing responsibility
// (see `ObjectPtr::get_mut`).
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Default for Object {
    fn default() -> Self {
        Self {
            class: std::ptr::null(),
            package: ObjectHandle::NULL,
            name: Name::NONE,
            guid: Guid::NIL,
            index: INDEX_NONE,
            flags: AtomicU32::new(0),
        }
    }
}

impl Object {
    /// The object's class.
    ///
    /// # Panics
    ///
    /// Panics when called on an object that has not been through
    /// construction (the class pointer is stamped at allocation).
    pub fn class(&self) -> &'static ClassType {
        assert!(!self.class.is_null(), "object has no class");
        // SOUND: class objects live in the object table, whose slot
        // allocations are stable for the process lifetime.
        unsafe { &*self.class }
    }

    /// The object's class, or [`None`] before construction completes.
    pub fn maybe_class(&self) -> Option<&'static ClassType> {
        if self.class.is_null() {
            None
        } else {
            // SOUND: see `class()`.
            unsafe { Some(&*self.class) }
        }
    }

    /// The object's name.
    pub fn name(&self) -> Name {
        self.name
    }

    /// The object's GUID.
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Handle of the package this object belongs to, or the null handle.
    pub fn package_handle(&self) -> ObjectHandle {
        self.package
    }

    /// The object's slot index in the object table.
    pub fn table_index(&self) -> i32 {
        self.index
    }

    /// A handle to this object.
    pub fn handle(&self) -> ObjectHandle {
        object_table().handle_for_index(self.index)
    }

    /// The current flag set.
    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.load(SeqCst))
    }

    /// Whether any of `flags` is set.
    pub fn has_any_flags(&self, flags: ObjectFlags) -> bool {
        self.flags().intersects(flags)
    }

    /// Set `flags` in addition to the current set.
    pub fn set_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_or(flags.bits(), SeqCst);
    }

    /// Clear `flags` from the current set.
    pub fn clear_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_and(!flags.bits(), SeqCst);
    }

    /// Add this object to the root set: sets [`ObjectFlags::ROOTED`] and
    /// raises the strong count so the object outlives ordinary references.
    pub fn add_to_root(&self) {
        if !self.has_any_flags(ObjectFlags::ROOTED) {
            self.set_flags(ObjectFlags::ROOTED);
            object_table().add_strong_ref(self.handle());
        }
    }

    /// Remove this object from the root set, reversing
    /// [`add_to_root`][Self::add_to_root].
    ///
    /// When the root set held the last strong reference, the object is
    /// destroyed; the caller's `&self` must not be used afterwards.
    pub fn remove_from_root(&self) {
        if self.has_any_flags(ObjectFlags::ROOTED) {
            self.clear_flags(ObjectFlags::ROOTED);
            crate::object_core::release_and_maybe_destroy(self.handle());
        }
    }

    pub(crate) fn init_header(
        &mut self,
        class: *const ClassType,
        package: ObjectHandle,
        name: Name,
        guid: Guid,
        flags: ObjectFlags,
    ) {
        self.class = class;
        self.package = package;
        self.name = name;
        self.guid = guid;
        self.flags = AtomicU32::new(flags.bits());
    }

    pub(crate) fn set_table_index(&mut self, index: i32) {
        self.index = index;
    }

    pub(crate) fn set_name_internal(&mut self, name: Name) {
        self.name = name;
    }

    pub(crate) fn set_package_internal(&mut self, package: ObjectHandle) {
        self.package = package;
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("name", &self.name)
            .field("guid", &self.guid)
            .field("index", &self.index)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

/// An object is considered usable when it exists and is not an unloaded
/// shell.
pub fn is_valid(object: Option<&Object>) -> bool {
    match object {
        Some(object) => !object.has_any_flags(ObjectFlags::NEEDS_LOAD),
        None => false,
    }
}

/// Trait implemented by every reflected object type.
///
/// Implementations are normally produced by the [`ember_class!`] macro.
///
/// # Safety
///
/// The implementing type must be `#[repr(C)]` with an [`Object`] as its
/// first field, and the property offsets registered for its class must
/// accurately describe its layout. Unsafe code relies on both to cast
/// between `*mut Object` and `*mut Self` and to address fields through
/// reflection.
///
/// [`ember_class!`]: crate::ember_class
pub unsafe trait ObjectType: Default + Sized + Send + Sync + 'static {
    /// The class display name.
    const TYPE_NAME: &'static str;

    /// The script package this class belongs to.
    const PACKAGE_NAME: &'static str = "/Script/Ember";

    /// The registered class object for this type.
    ///
    /// # Panics
    ///
    /// Panics when the type's registration has not been flushed yet.
    fn static_class() -> &'static ClassType;

    /// The object base header.
    fn object(&self) -> &Object {
        // SOUND: the trait contract requires `Object` to be the first field
        // of a `#[repr(C)]` struct.
        unsafe { &*(self as *const Self as *const Object) }
    }

    /// The object base header, mutably.
    fn object_mut(&mut self) -> &mut Object {
        // SOUND: see `object()`.
        unsafe { &mut *(self as *mut Self as *mut Object) }
    }

    /// Called after the object's properties have been initialized.
    fn post_init_properties(&mut self) {}

    /// Called once on the class default object after it is created.
    fn post_create_cdo(&mut self) {}

    /// Called after the object's property data has been deserialized.
    fn post_load(&mut self) {}

    /// Called when the object is about to be destroyed.
    fn on_destroy(&mut self) {}
}

/// Constructs a default instance of a class in place.
pub type ObjectFactoryFn = unsafe fn(*mut u8);

/// Constructs a `T` into uninitialized, zeroed memory.
///
/// # Safety
///
/// `mem` must be valid for writes of `T` and satisfy its alignment.
pub unsafe fn construct_in_place<T: ObjectType>(mem: *mut u8) {
    mem.cast::<T>().write(T::default());
}

/// Type-erased lifecycle hooks collected from an [`ObjectType`] impl and
/// stored on the class.
#[derive(Copy, Clone)]
pub struct ObjectHooks {
    /// Drops the concrete value in place (does not free the allocation).
    pub drop_in_place: unsafe fn(*mut Object),
    /// Dispatches [`ObjectType::post_init_properties`].
    pub post_init_properties: unsafe fn(*mut Object),
    /// Dispatches [`ObjectType::post_create_cdo`].
    pub post_create_cdo: unsafe fn(*mut Object),
    /// Dispatches [`ObjectType::post_load`].
    pub post_load: unsafe fn(*mut Object),
    /// Dispatches [`ObjectType::on_destroy`].
    pub on_destroy: unsafe fn(*mut Object),
}

impl ObjectHooks {
    /// Collect the hooks for `T`.
    pub const fn of<T: ObjectType>() -> Self {
        unsafe fn drop_obj<T>(object: *mut Object) {
            std::ptr::drop_in_place(object as *mut T);
        }
        unsafe fn post_init<T: ObjectType>(object: *mut Object) {
            (*(object as *mut T)).post_init_properties();
        }
        unsafe fn post_cdo<T: ObjectType>(object: *mut Object) {
            (*(object as *mut T)).post_create_cdo();
        }
        unsafe fn post_load<T: ObjectType>(object: *mut Object) {
            (*(object as *mut T)).post_load();
        }
        unsafe fn on_destroy<T: ObjectType>(object: *mut Object) {
            (*(object as *mut T)).on_destroy();
        }
        Self {
            drop_in_place: drop_obj::<T>,
            post_init_properties: post_init::<T>,
            post_create_cdo: post_cdo::<T>,
            post_load: post_load::<T>,
            on_destroy: on_destroy::<T>,
        }
    }
}

impl std::fmt::Debug for ObjectHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHooks").finish_non_exhaustive()
    }
}
