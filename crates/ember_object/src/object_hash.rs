//! Lookup tables mapping GUIDs and names to live objects.

use ember_utils::{Guid, HashMap, Name};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::handle::ObjectHandle;
use crate::reflection::ClassType;
use crate::table::object_table;

#[derive(Default)]
struct ObjectHashTables {
    by_guid: HashMap<Guid, ObjectHandle>,
    by_name: HashMap<Name, Vec<ObjectHandle>>,
}

static HASH_TABLES: Lazy<Mutex<ObjectHashTables>> = Lazy::new(Default::default);

/// Record a newly-constructed object in the lookup tables.
pub(crate) fn register_object(guid: Guid, name: Name, handle: ObjectHandle) {
    let mut tables = HASH_TABLES.lock();
    if !guid.is_nil() {
        tables.by_guid.insert(guid, handle);
    }
    if !name.is_none() {
        tables.by_name.entry(name).or_default().push(handle);
    }
}

/// Remove a destroyed object from the lookup tables.
pub(crate) fn unregister_object(guid: Guid, name: Name, handle: ObjectHandle) {
    let mut tables = HASH_TABLES.lock();
    if !guid.is_nil() {
        if let Some(existing) = tables.by_guid.get(&guid) {
            if *existing == handle {
                tables.by_guid.remove(&guid);
            }
        }
    }
    if !name.is_none() {
        if let Some(handles) = tables.by_name.get_mut(&name) {
            handles.retain(|h| *h != handle);
            if handles.is_empty() {
                tables.by_name.remove(&name);
            }
        }
    }
}

/// Update the name index after a rename.
pub(crate) fn rename_object(old_name: Name, new_name: Name, handle: ObjectHandle) {
    let mut tables = HASH_TABLES.lock();
    if let Some(handles) = tables.by_name.get_mut(&old_name) {
        handles.retain(|h| *h != handle);
        if handles.is_empty() {
            tables.by_name.remove(&old_name);
        }
    }
    if !new_name.is_none() {
        tables.by_name.entry(new_name).or_default().push(handle);
    }
}

/// Find a live object by GUID.
pub fn find_object_handle_by_guid(guid: &Guid) -> Option<ObjectHandle> {
    let handle = *HASH_TABLES.lock().by_guid.get(guid)?;
    if object_table().resolve(handle).is_null() {
        None
    } else {
        Some(handle)
    }
}

/// Find a live object by name, optionally restricted to a class (including
/// subclasses).
pub fn find_object_handle_by_name(
    name: Name,
    class: Option<&'static ClassType>,
) -> Option<ObjectHandle> {
    let candidates = HASH_TABLES.lock().by_name.get(&name).cloned()?;
    for handle in candidates {
        let object = object_table().resolve(handle);
        if object.is_null() {
            continue;
        }
        // SOUND: the pointer was just resolved against the current
        // generation; destruction does not run concurrently with lookups.
        let object = unsafe { &*object };
        match class {
            Some(class) if !object.class().is_child_of(class) => continue,
            _ => return Some(handle),
        }
    }
    None
}
