//! The reflection graph.
//!
//! Classes, structs, and enums describe the layout and lifecycle of
//! reflected types; properties describe their fields. Registration is
//! deferred: modules enqueue POD records with
//! [`register_compiled_in_info`], and the graph is built when
//! [`process_newly_loaded_objects`] flushes the queues.

pub mod macros;

mod property;
mod registration;
mod tagged;
mod types;

pub use property::*;
pub use registration::*;
pub use tagged::*;
pub use types::*;

pub(crate) use registration::{bootstrap_intrinsic_classes, PACKAGE_CLASS_CELL};

use ember_utils::Name;

use crate::object::ObjectType;

/// Find a registered class by name.
pub fn find_class(name: Name) -> Option<&'static ClassType> {
    let handle =
        crate::object_hash::find_object_handle_by_name(name, Some(ClassType::static_class()))?;
    let object = crate::table::object_table().resolve(handle);
    if object.is_null() {
        return None;
    }
    // SOUND: the lookup filtered on the `Class` class, and class objects
    // have stable table-owned addresses for the process lifetime.
    Some(unsafe { &*(object as *const ClassType) })
}

/// Find a registered enum by name.
pub fn find_enum(name: Name) -> Option<&'static EnumType> {
    let handle =
        crate::object_hash::find_object_handle_by_name(name, Some(EnumType::static_class()))?;
    let object = crate::table::object_table().resolve(handle);
    if object.is_null() {
        return None;
    }
    // SOUND: the lookup filtered on the `Enum` class; see `find_class`.
    Some(unsafe { &*(object as *const EnumType) })
}
