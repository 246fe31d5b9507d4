//! The Ember object runtime.
//!
//! This crate owns the pieces that everything else in the engine hangs off
//! of:
//!
//! - the chunked, generation-checked [object table](table) that owns every
//!   object's lifetime and hands out strong/weak references,
//! - the [reflection graph](reflection) describing classes, structs, enums,
//!   and properties, built from deferred registration records,
//! - the [archive](serialize) layer and the tagged property serializer that
//!   reads and writes schema-tolerant property streams,
//! - the binary [package](package) container that stores exports, imports,
//!   and an optional thumbnail.

#![warn(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]
// This cfg_attr is needed because `rustdoc::all` includes lints not supported on stable
#![cfg_attr(doc, allow(unknown_lints))]
#![deny(rustdoc::all)]

pub mod flags;
pub mod handle;
pub mod object;
pub mod object_hash;
pub mod package;
pub mod reflection;
pub mod serialize;
pub mod table;

mod object_core;
pub use crate::object_core::*;

// Core identity types, re-exported for convenience and for macro use.
pub use ember_utils::{Guid, Name};

pub use crate::flags::ObjectFlags;
pub use crate::handle::{ObjectHandle, ObjectPtr, ObjectRef, WeakObjectRef};
pub use crate::object::{Object, ObjectType};

// Re-exported for macro use.
#[doc(hidden)]
pub use tracing;

/// The prelude.
pub mod prelude {
    pub use crate::{
        object_core::*,
        flags::*,
        handle::*,
        object::*,
        package::*,
        reflection::*,
        serialize::*,
        table::{object_table, ObjectTable},
    };
    pub use ember_utils::prelude::*;
}
