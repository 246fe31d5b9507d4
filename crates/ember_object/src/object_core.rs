//! Object lifecycle: allocation, lookup, destruction, and runtime
//! initialization/shutdown.

use ember_utils::{Guid, Name};
use once_cell::sync::OnceCell;

use crate::flags::ObjectFlags;
use crate::handle::{ObjectHandle, ObjectPtr, ObjectRef};
use crate::object::{Object, ObjectType};
use crate::object_hash;
use crate::reflection::{self, ClassType};
use crate::table::object_table;

/// Initialize the object runtime: the object table, the intrinsic
/// bootstrap classes, and a flush of any pending registrations.
///
/// Idempotent; later calls only flush newly-enqueued registrations.
pub fn initialize(max_objects: u32) {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        object_table().initialize(max_objects);
        reflection::bootstrap_intrinsic_classes();
    });
    reflection::process_newly_loaded_objects();
}

/// Tear down the object runtime.
///
/// Flips the table into shutdown mode (strong releases become no-ops) and
/// force-destroys every live object: ordinary objects first, reflection
/// entities after, so class data stays readable while instances die.
pub fn shutdown() {
    let table = object_table();
    if !table.is_initialized() {
        return;
    }
    table.begin_shutdown();

    let meta_classes: Vec<&'static ClassType> = [
        crate::reflection::ClassType::static_class(),
        crate::reflection::StructType::static_class(),
        crate::reflection::EnumType::static_class(),
    ]
    .into();

    let mut ordinary = Vec::new();
    let mut reflected = Vec::new();
    table.for_each_object(|object, index| {
        // SOUND: the sweep runs with the table in shutdown mode; nothing
        // else is destroying objects concurrently.
        let class = unsafe { (*object).maybe_class() };
        let handle = table.handle_for_index(index as i32);
        match class {
            Some(class)
                if meta_classes
                    .iter()
                    .any(|meta| class.is_child_of(meta)) =>
            {
                reflected.push(handle)
            }
            _ => ordinary.push(handle),
        }
    });

    // Reflection entities die in reverse creation order so that the
    // intrinsic classes (created first, depended on by everything) go last.
    for handle in ordinary.into_iter().chain(reflected.into_iter().rev()) {
        // SOUND: shutdown is the single owner of every remaining object.
        unsafe {
            force_destroy(handle);
        }
    }
}

/// Construct a new object of class `T`.
///
/// A none `name` auto-generates `ClassName_N`; a nil `guid` draws a fresh
/// one. The returned pointer holds a strong reference.
pub fn new_object<T: ObjectType>(
    package: ObjectHandle,
    name: Name,
    guid: Guid,
    flags: ObjectFlags,
) -> ObjectPtr<T> {
    let handle = new_object_of_class(T::static_class(), package, name, guid, flags);
    // SOUND: the object was just constructed through `T`'s class factory.
    unsafe { ObjectPtr::from_handle_unchecked(handle) }
}

/// Construct a new, named object of class `T` with default flags.
pub fn new_named_object<T: ObjectType>(package: ObjectHandle, name: &str) -> ObjectPtr<T> {
    new_object::<T>(package, Name::new(name), Guid::NIL, ObjectFlags::empty())
}

/// Construct a new object of the given class.
///
/// This is the untyped allocation path everything routes through: memory
/// sized by the class (minimum 16-byte alignment) is zeroed, the class
/// factory constructs the instance in place, the header is stamped, the
/// table assigns a slot, and the lookup hashes record the object.
pub fn new_object_of_class(
    class: &'static ClassType,
    package: ObjectHandle,
    name: Name,
    guid: Guid,
    flags: ObjectFlags,
) -> ObjectHandle {
    assert!(
        object_table().is_initialized(),
        "object runtime is not initialized"
    );

    let name = if name.is_none() {
        Name::new(&format!("{}_{}", class.name(), class.next_unique()))
    } else {
        name
    };
    let guid = if guid.is_nil() { Guid::new() } else { guid };

    let layout = object_layout(class);
    // SOUND: the layout is never zero-sized (every class embeds `Object`),
    // the factory initializes the full instance into the zeroed memory, and
    // the header is stamped before the pointer escapes.
    let object = unsafe {
        let mem = std::alloc::alloc_zeroed(layout);
        assert!(!mem.is_null(), "out of memory allocating object");
        (class.factory())(mem);

        let object = &mut *(mem as *mut Object);
        object.init_header(class, package, name, guid, flags);
        object
    };

    let handle = object_table().allocate(object as *mut Object);
    object.set_table_index(handle.index);
    object_hash::register_object(guid, name, handle);

    // SOUND: the object is fully constructed and not yet shared.
    unsafe {
        (class.hooks().post_init_properties)(object as *mut Object);
    }

    handle
}

fn object_layout(class: &ClassType) -> std::alloc::Layout {
    std::alloc::Layout::from_size_align(class.size().max(1), class.align().max(16))
        .expect("invalid class layout")
}

/// Find a live object by GUID.
pub fn find_object(guid: &Guid) -> Option<ObjectRef> {
    let handle = object_hash::find_object_handle_by_guid(guid)?;
    Some(ObjectRef::from_handle(handle))
}

/// Find a live object of class `T` by GUID.
pub fn find_typed_object<T: ObjectType>(guid: &Guid) -> Option<ObjectPtr<T>> {
    find_object(guid)?.typed::<T>()
}

/// Find a live object of class `T` (or a subclass) by name.
pub fn find_object_by_name<T: ObjectType>(name: Name) -> Option<ObjectPtr<T>> {
    let handle = object_hash::find_object_handle_by_name(name, Some(T::static_class()))?;
    ObjectRef::from_handle(handle).typed::<T>()
}

/// Rename a live object, keeping the lookup hashes coherent.
pub fn rename_object(handle: ObjectHandle, new_name: Name) {
    let object = object_table().resolve(handle);
    if object.is_null() {
        return;
    }
    // SOUND: renames take the handle as proof of liveness; header name
    // writes are only racy against readers holding `&Object`, which is the
    // caller's aliasing responsibility (the rename paths run during load
    // recovery and editor operations, both single-threaded per object).
    unsafe {
        let old_name = (*object).name();
        (*object).set_name_internal(new_name);
        object_hash::rename_object(old_name, new_name, handle);
    }
}

type LoadObjectHook = fn(&Guid) -> Option<ObjectRef>;

static LOAD_OBJECT_HOOK: OnceCell<LoadObjectHook> = OnceCell::new();

/// Install the hook used by [`load_object`] to load non-resident objects.
/// The asset layer installs its registry-driven loader here.
pub fn set_load_object_hook(hook: LoadObjectHook) {
    let _ = LOAD_OBJECT_HOOK.set(hook);
}

/// Resolve an object by GUID, synchronously loading its package when the
/// object is not resident and a load hook is installed.
pub fn load_object(guid: &Guid) -> Option<ObjectRef> {
    if let Some(resident) = find_object(guid) {
        if !resident
            .get()
            .is_some_and(|o| o.has_any_flags(ObjectFlags::NEEDS_LOAD))
        {
            return Some(resident);
        }
    }
    LOAD_OBJECT_HOOK.get().and_then(|hook| hook(guid))
}

/// Resolve an object of class `T` by GUID, loading it if necessary.
pub fn load_typed_object<T: ObjectType>(guid: &Guid) -> Option<ObjectPtr<T>> {
    load_object(guid)?.typed::<T>()
}

/// Release one strong count and destroy the object when that was the last
/// reference.
///
/// Objects flagged [`ObjectFlags::WAS_LOADED`] are exempt: their lifetime
/// belongs to the package that created them (and ultimately to
/// `destroy_package` or the shutdown sweep), so a transient reference
/// dropping to zero must not tear them down.
pub(crate) fn release_and_maybe_destroy(handle: ObjectHandle) {
    if !object_table().release_strong_ref(handle) {
        return;
    }
    let object = object_table().resolve(handle);
    if object.is_null() {
        return;
    }
    // SOUND: just resolved against the current generation; flags are atomic.
    if unsafe { (*object).has_any_flags(ObjectFlags::WAS_LOADED) } {
        return;
    }
    // SOUND: the dropped reference was the last one, so no borrows derived
    // from it can still be live.
    unsafe {
        conditional_begin_destroy(handle);
    }
}

/// Destroy the object behind `handle` unless it is already marked.
///
/// Runs the class's `on_destroy` hook, removes the object from the lookup
/// hashes, vacates the table slot, drops the value, and frees its memory.
/// Returns `false` when the handle is stale or the object was already
/// marked.
///
/// # Safety
///
/// No borrow of the object may outlive this call, and no other thread may
/// be accessing the object.
pub unsafe fn conditional_begin_destroy(handle: ObjectHandle) -> bool {
    let object = object_table().resolve(handle);
    if object.is_null() {
        return false;
    }
    if (*object).has_any_flags(ObjectFlags::MARKED_DESTROY) {
        return false;
    }
    (*object).set_flags(ObjectFlags::MARKED_DESTROY);

    let class = (*object).class();
    (class.hooks().on_destroy)(object);

    object_hash::unregister_object((*object).guid(), (*object).name(), handle);
    object_table().deallocate(handle.index);

    let layout = object_layout(class);
    (class.hooks().drop_in_place)(object);
    std::alloc::dealloc(object as *mut u8, layout);

    true
}

/// Shutdown-sweep destruction: like [`conditional_begin_destroy`] but
/// ignores the marked flag having been set by an earlier partial pass.
unsafe fn force_destroy(handle: ObjectHandle) -> bool {
    let object = object_table().resolve(handle);
    if object.is_null() {
        return false;
    }
    (*object).set_flags(ObjectFlags::MARKED_DESTROY);

    let class = (*object).class();
    (class.hooks().on_destroy)(object);

    object_hash::unregister_object((*object).guid(), (*object).name(), handle);
    object_table().deallocate(handle.index);

    let layout = object_layout(class);
    (class.hooks().drop_in_place)(object);
    std::alloc::dealloc(object as *mut u8, layout);

    true
}

/// Find the script package object for `package_name`, creating it on first
/// use. Returns the null handle for an empty name.
pub fn find_or_create_script_package(package_name: &str) -> ObjectHandle {
    if package_name.is_empty() {
        return ObjectHandle::NULL;
    }
    crate::package::find_or_create_package(package_name)
}
