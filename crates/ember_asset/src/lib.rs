//! Asset discovery and loading for the Ember runtime.
//!
//! The [`AssetRegistry`] indexes every `.lasset` package under the mounted
//! content roots and answers queries by GUID, path, or predicate. It also
//! backs the synchronous [`load_object`] path: resolving a GUID that is not
//! resident loads its package on demand.

#![warn(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]
// This cfg_attr is needed because `rustdoc::all` includes lints not supported on stable
#![cfg_attr(doc, allow(unknown_lints))]
#![deny(rustdoc::all)]

mod asset_data;
mod registry;

pub use asset_data::*;
pub use registry::*;

use ember_object::package::{load_package, Package};
use ember_object::{ObjectPtr, ObjectRef, ObjectType};
use ember_utils::Guid;

/// The prelude.
pub mod prelude {
    pub use crate::{asset_data::*, registry::*};
}

/// Wire the asset layer into the object runtime.
///
/// Installs the registry-driven loader behind
/// [`ember_object::load_object`], so resolving a non-resident GUID
/// triggers a synchronous package load. Idempotent.
pub fn initialize() {
    ember_object::set_load_object_hook(load_object_via_registry);
}

fn load_object_via_registry(guid: &Guid) -> Option<ObjectRef> {
    let data = AssetRegistry::get().asset_by_guid(guid)?;
    let package = match load_package(&data.path) {
        Ok(package) => package,
        Err(error) => {
            tracing::error!("failed to load package for asset {guid}: {error:#}");
            return None;
        }
    };
    package.get()?.load_object(guid)
}

/// Load the object with `guid`, reading its package from disk when it is
/// not already resident.
pub fn load_object(guid: &Guid) -> Option<ObjectRef> {
    ember_object::load_object(guid)
}

/// Load the object at a package path (virtual or on-disk), returning its
/// primary asset.
pub fn load_object_by_path(path: &str) -> Option<ObjectRef> {
    let data = AssetRegistry::get().asset_by_path(path)?;
    load_object(&data.guid)
}

/// Typed variant of [`load_object`].
pub fn load_typed_object<T: ObjectType>(guid: &Guid) -> Option<ObjectPtr<T>> {
    load_object(guid)?.typed::<T>()
}

/// Load a package and return it without loading any export payloads.
pub fn load_asset_package(path: &str) -> anyhow::Result<ObjectPtr<Package>> {
    load_package(path)
}
