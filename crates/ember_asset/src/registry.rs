//! The asset registry: a process-wide index of every discovered package.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;

use ember_object::package::{
    find_primary_export, package_name_for_path, read_package_summary, PACKAGE_EXTENSION,
};
use ember_object::Object;
use ember_utils::task::{async_ranged_task, CompletionHandle};
use ember_utils::{paths, Guid, HashMap, MulticastDelegate, Name};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::AssetData;

/// Number of worker partitions used for initial discovery.
const DISCOVERY_PARTITIONS: u32 = 8;

/// The process-wide index of on-disk assets. See [`AssetRegistry::get`].
pub struct AssetRegistry {
    assets: RwLock<HashMap<Guid, AssetData>>,
    failed: Mutex<Vec<String>>,
    on_updated: MulticastDelegate,
}

static REGISTRY: Lazy<AssetRegistry> = Lazy::new(|| AssetRegistry {
    assets: RwLock::new(HashMap::default()),
    failed: Mutex::new(Vec::new()),
    on_updated: MulticastDelegate::new(),
});

impl AssetRegistry {
    /// Get the global registry.
    pub fn get() -> &'static AssetRegistry {
        &REGISTRY
    }

    /// The delegate broadcast whenever the registry's contents change.
    pub fn on_registry_updated(&self) -> &MulticastDelegate {
        &self.on_updated
    }

    /// Scan every mounted content root for `.lasset` packages and index
    /// their primary assets.
    ///
    /// The file list is partitioned across the task pool; each file
    /// contributes one record parsed from only the header and export
    /// table. The "initial discovery completed" broadcast fires exactly
    /// once, from whichever worker finishes the final piece of work (an
    /// atomic processed counter compared against the total; there is no
    /// separate join). The returned handle signals once all records are in.
    pub fn run_initial_discovery(&'static self) -> CompletionHandle {
        self.clear_assets();

        let mut package_paths = Vec::new();
        for mount in paths::mounted_paths() {
            collect_package_files(&mount.root, &mut package_paths);
        }

        let total = package_paths.len() as u32;
        tracing::info!("asset registry discovery scanning {total} packages");

        let package_paths = Arc::new(package_paths);
        let processed = Arc::new(AtomicUsize::new(0));

        async_ranged_task(total, DISCOVERY_PARTITIONS, move |start, end, _thread| {
            for path in &package_paths[start as usize..end as usize] {
                self.process_package_path(path);
            }

            let count = (end - start) as usize;
            if processed.fetch_add(count, SeqCst) + count == total as usize {
                self.on_initial_discovery_completed();
            }
        })
    }

    fn on_initial_discovery_completed(&self) {
        tracing::info!(
            "asset registry finished initial discovery: num [{}]",
            self.num_assets()
        );
        self.on_updated.broadcast();
    }

    /// Parse one package file and index its primary asset.
    ///
    /// Files that cannot be read or parsed, and packages with no
    /// recoverable primary asset, land on the failed list.
    pub fn process_package_path(&self, path: &Path) {
        let path_string = paths::normalize(&path.to_string_lossy());

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::error!("failed to load package file at path {path_string}: {error}");
                self.failed.lock().push(path_string);
                return;
            }
        };

        let (_header, exports) = match read_package_summary(&bytes) {
            Ok(summary) => summary,
            Err(error) => {
                tracing::error!("failed to parse package at path {path_string}: {error}");
                self.failed.lock().push(path_string);
                return;
            }
        };

        let stem = Name::new(paths::file_stem(&path_string));
        let Some((primary, _recovered)) = find_primary_export(&exports, stem) else {
            tracing::error!("no primary asset found in package {path_string}");
            self.failed.lock().push(path_string);
            return;
        };
        let export = &exports[primary];

        let data = AssetData {
            guid: export.guid,
            package_path: paths::to_virtual(path)
                .map(|v| package_name_for_path(&v).as_str().to_string())
                .unwrap_or_default(),
            path: path_string,
            // The primary asset carries the package's file stem, even when
            // the export still has a stale pre-rename name on disk.
            name: stem,
            class_name: export.class_name,
        };

        self.assets.write().insert(data.guid, data);
    }

    /// Record a newly-created asset object.
    pub fn asset_created(&self, asset: &Object) {
        let data = asset_data_for_object(asset);
        self.assets.write().insert(data.guid, data);
        self.on_updated.broadcast();
    }

    /// Refresh the record for a just-saved asset object.
    pub fn asset_saved(&self, asset: &Object) {
        let data = asset_data_for_object(asset);
        self.assets.write().insert(data.guid, data);
        self.on_updated.broadcast();
    }

    /// Drop the record for a deleted asset.
    pub fn asset_deleted(&self, guid: &Guid) {
        self.assets.write().remove(guid);
        self.on_updated.broadcast();
    }

    /// Update the record for an asset whose package file moved.
    pub fn asset_renamed(&self, old_path: &str, new_path: &str) {
        let old_name = package_name_for_path(old_path);
        {
            let mut assets = self.assets.write();
            let entry = assets
                .values_mut()
                .find(|a| package_name_for_path(&a.path) == old_name);
            if let Some(entry) = entry {
                entry.path = paths::normalize(new_path);
                entry.package_path = package_name_for_path(new_path).as_str().to_string();
                entry.name = Name::new(paths::file_stem(&entry.path));
            } else {
                tracing::warn!("asset rename for unknown path '{old_path}'");
            }
        }
        self.on_updated.broadcast();
    }

    /// Look up an asset by GUID.
    pub fn asset_by_guid(&self, guid: &Guid) -> Option<AssetData> {
        self.assets.read().get(guid).cloned()
    }

    /// Look up an asset by path. Accepts virtual or on-disk paths, with or
    /// without the `.lasset` extension.
    pub fn asset_by_path(&self, path: &str) -> Option<AssetData> {
        let wanted = package_name_for_path(path);
        self.assets
            .read()
            .values()
            .find(|a| {
                package_name_for_path(&a.path) == wanted
                    || package_name_for_path(&a.package_path) == wanted
            })
            .cloned()
    }

    /// Collect every record matching `predicate`.
    pub fn find_by_predicate(&self, predicate: impl Fn(&AssetData) -> bool) -> Vec<AssetData> {
        self.assets
            .read()
            .values()
            .filter(|a| predicate(a))
            .cloned()
            .collect()
    }

    /// Number of indexed assets.
    pub fn num_assets(&self) -> usize {
        self.assets.read().len()
    }

    /// Paths that failed to parse during discovery.
    pub fn failed_paths(&self) -> Vec<String> {
        self.failed.lock().clone()
    }

    /// Drop every record (and the failed list), broadcasting the change.
    pub fn clear_assets(&self) {
        self.assets.write().clear();
        self.failed.lock().clear();
        self.on_updated.broadcast();
    }
}

fn asset_data_for_object(asset: &Object) -> AssetData {
    let package_ptr = ember_object::table::object_table().resolve(asset.package_handle());
    let package_path = if package_ptr.is_null() {
        String::new()
    } else {
        // SOUND: the pointer was just resolved; package objects are kept
        // rooted while their assets are alive.
        unsafe { (*package_ptr).name().as_str().to_string() }
    };

    let disk_path = if package_path.is_empty() {
        String::new()
    } else {
        paths::normalize(
            &ember_object::package::package_disk_path(&package_path).to_string_lossy(),
        )
    };

    AssetData {
        guid: asset.guid(),
        path: disk_path,
        package_path,
        name: asset.name(),
        class_name: asset.class().name(),
    }
}

/// Recursively collect `.lasset` files under `dir`.
fn collect_package_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_package_files(&path, out);
        } else if path
            .extension()
            .is_some_and(|ext| ext == PACKAGE_EXTENSION)
        {
            out.push(path);
        }
    }
}
