//! Reflected object and package runtime for the Ember engine.
//!
//! This crate re-exports the runtime member crates: the object table and
//! reflection graph ([`object`]), the binary package container and asset
//! registry ([`asset`]), and the shared utilities ([`utils`]).

#![warn(missing_docs)]
// This cfg_attr is needed because `rustdoc::all` includes lints not supported on stable
#![cfg_attr(doc, allow(unknown_lints))]
#![deny(rustdoc::all)]

#[doc(inline)]
pub use {ember_asset as asset, ember_object as object, ember_utils as utils};

/// Ember lib prelude.
pub mod prelude {
    pub use crate::{asset::prelude::*, object::prelude::*, utils::prelude::*};
}

/// Initialize the object runtime and the asset layer.
///
/// `max_objects` bounds the object table for the lifetime of the process.
/// Deferred type registrations that were enqueued before this call are
/// flushed as part of initialization.
pub fn initialize(max_objects: u32) {
    object::initialize(max_objects);
    asset::initialize();
}

/// Tear down the object runtime. All live objects are force-destroyed.
pub fn shutdown() {
    object::shutdown();
}
