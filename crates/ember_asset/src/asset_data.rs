//! Compact records describing discovered assets.

use ember_utils::{Guid, Name};

/// What the registry knows about one on-disk asset without loading it.
#[derive(Debug, Clone)]
pub struct AssetData {
    /// The asset's GUID.
    pub guid: Guid,
    /// The on-disk file path.
    pub path: String,
    /// The virtual package path (no extension), when the file is under a
    /// mount.
    pub package_path: String,
    /// The asset's name.
    pub name: Name,
    /// The asset's class name.
    pub class_name: Name,
}
