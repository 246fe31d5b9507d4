//! Object handles and reference wrappers.
//!
//! A handle is a `(slot index, generation)` pair. Resolving one yields the
//! live object only when the table slot's current generation matches, which
//! makes dangling references detectable instead of undefined behavior.

use std::marker::PhantomData;

use crate::object::{Object, ObjectType};
use crate::serialize::{Archive, Serializable};
use crate::table::object_table;

/// Slot index value used by null handles.
pub const INDEX_NONE: i32 = -1;

/// A `(slot index, generation)` pair identifying an object table slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct ObjectHandle {
    /// The slot index, or [`INDEX_NONE`] for the null handle.
    pub index: i32,
    /// The slot generation at the time the handle was created.
    pub generation: u32,
}

impl ObjectHandle {
    /// The null handle.
    pub const NULL: ObjectHandle = ObjectHandle {
        index: INDEX_NONE,
        generation: 0,
    };

    /// Create a handle from an index and generation.
    pub fn new(index: i32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Whether this handle refers to a slot at all (it may still be stale).
    pub fn is_valid(&self) -> bool {
        self.index != INDEX_NONE
    }
}

impl Default for ObjectHandle {
    fn default() -> Self {
        Self::NULL
    }
}

impl Serializable for ObjectHandle {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        self.index.serialize(ar);
        self.generation.serialize(ar);
    }
}

/// An untyped strong reference to an object.
///
/// Holding an `ObjectRef` keeps the object alive: the table's strong count
/// is raised on creation/clone and released on drop. When the last strong
/// reference drops, the object is destroyed.
#[repr(C)]
pub struct ObjectRef {
    handle: ObjectHandle,
}

impl ObjectRef {
    /// The null reference.
    pub fn null() -> Self {
        Self {
            handle: ObjectHandle::NULL,
        }
    }

    /// Create a strong reference from a handle, raising the strong count.
    ///
    /// Returns a null reference when the handle is stale.
    pub fn from_handle(handle: ObjectHandle) -> Self {
        if object_table().add_strong_ref(handle) {
            Self { handle }
        } else {
            Self::null()
        }
    }

    /// The underlying handle.
    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    /// Whether this reference is null or stale.
    pub fn is_null(&self) -> bool {
        !self.handle.is_valid() || self.as_ptr().is_null()
    }

    /// Resolve to a raw object pointer, or null when stale.
    pub fn as_ptr(&self) -> *mut Object {
        object_table().resolve(self.handle)
    }

    /// Resolve to a shared object reference.
    ///
    /// The borrow is tied to this `ObjectRef`, whose strong count keeps the
    /// object alive for the duration.
    pub fn get(&self) -> Option<&Object> {
        let ptr = self.as_ptr();
        if ptr.is_null() {
            None
        } else {
            // SOUND: the pointer resolved against the current generation and
            // this reference holds a strong count, so the allocation stays
            // live while the returned borrow does.
            unsafe { Some(&*ptr) }
        }
    }

    /// Downcast to a typed reference if the object's class matches `T` (or a
    /// subclass of it).
    pub fn typed<T: ObjectType>(self) -> Option<ObjectPtr<T>> {
        let object = self.get()?;
        if object.class().is_child_of(T::static_class()) {
            Some(ObjectPtr {
                inner: self,
                _marker: PhantomData,
            })
        } else {
            None
        }
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::null()
    }
}

impl Clone for ObjectRef {
    fn clone(&self) -> Self {
        Self::from_handle(self.handle)
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        if self.handle.is_valid() {
            crate::object_core::release_and_maybe_destroy(self.handle);
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}
impl Eq for ObjectRef {}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(object) => write!(f, "ObjectRef({})", object.name()),
            None => write!(f, "ObjectRef(null)"),
        }
    }
}

impl Serializable for ObjectRef {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        ar.serialize_object_ref(self);
    }
}

/// A typed strong reference to an object of class `T`.
pub struct ObjectPtr<T: ObjectType> {
    inner: ObjectRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ObjectType> ObjectPtr<T> {
    /// The untyped reference.
    pub fn untyped(&self) -> &ObjectRef {
        &self.inner
    }

    /// The underlying handle.
    pub fn handle(&self) -> ObjectHandle {
        self.inner.handle()
    }

    /// Whether this reference is null or stale.
    pub fn is_null(&self) -> bool {
        self.inner.is_null()
    }

    /// Resolve to a shared typed reference.
    pub fn get(&self) -> Option<&T> {
        let ptr = self.inner.as_ptr();
        if ptr.is_null() {
            None
        } else {
            // SOUND: the class was checked when this typed pointer was
            // created, every reflected type is `#[repr(C)]` with `Object` as
            // its first field, and the strong count keeps the allocation
            // live for the borrow.
            unsafe { Some(&*(ptr as *const T)) }
        }
    }

    /// Resolve to an exclusive typed reference.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no other reference (typed or untyped) is
    /// being used to access this object for the duration of the borrow. The
    /// object table does not track aliasing.
    pub unsafe fn get_mut(&mut self) -> Option<&mut T> {
        let ptr = self.inner.as_ptr();
        if ptr.is_null() {
            None
        } else {
            Some(&mut *(ptr as *mut T))
        }
    }

    /// Create a typed pointer from a handle without re-checking the class.
    ///
    /// # Safety
    ///
    /// The handle must refer to an object whose class is `T` or a subclass.
    pub unsafe fn from_handle_unchecked(handle: ObjectHandle) -> Self {
        Self {
            inner: ObjectRef::from_handle(handle),
            _marker: PhantomData,
        }
    }
}

impl<T: ObjectType> Clone for ObjectPtr<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ObjectType> std::fmt::Debug for ObjectPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectPtr<{}>({:?})", T::TYPE_NAME, self.inner)
    }
}

/// A weak reference to an object.
///
/// Weak references do not keep the object alive, but they do keep the slot's
/// identity traceable: resolving after destruction yields [`None`] rather
/// than a new tenant.
#[repr(C)]
pub struct WeakObjectRef {
    handle: ObjectHandle,
}

impl WeakObjectRef {
    /// The null weak reference.
    pub fn null() -> Self {
        Self {
            handle: ObjectHandle::NULL,
        }
    }

    /// Create a weak reference from a handle, raising the weak count.
    pub fn from_handle(handle: ObjectHandle) -> Self {
        if handle.is_valid() {
            object_table().add_weak_ref(handle);
        }
        Self { handle }
    }

    /// The underlying handle.
    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    /// Upgrade to a strong reference if the object is still alive.
    pub fn pin(&self) -> Option<ObjectRef> {
        let strong = ObjectRef::from_handle(self.handle);
        if strong.is_null() {
            None
        } else {
            Some(strong)
        }
    }
}

impl Default for WeakObjectRef {
    fn default() -> Self {
        Self::null()
    }
}

impl Clone for WeakObjectRef {
    fn clone(&self) -> Self {
        Self::from_handle(self.handle)
    }
}

impl Drop for WeakObjectRef {
    fn drop(&mut self) {
        if self.handle.is_valid() {
            object_table().release_weak_ref(self.handle);
        }
    }
}

impl std::fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeakObjectRef({:?})", self.handle)
    }
}
