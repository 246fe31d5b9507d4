//! Asset registry discovery, incremental updates, queries, and the
//! registry-driven synchronous load path.
//!
//! The registry, mount table, and object table are process-wide, so every
//! test holds the fixture lock.

use std::sync::atomic::{AtomicU32, Ordering::SeqCst};
use std::sync::Arc;

use ember_asset::AssetRegistry;
use ember_object::package::{create_package, destroy_package, save_package};
use ember_object::reflection::{register_compiled_in_info, ClassRegistration};
use ember_object::{ember_class, new_object, Guid, Name, Object, ObjectFlags, ObjectPtr};
use ember_utils::paths;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};

#[repr(C)]
#[derive(Default)]
struct NoteAsset {
    base: Object,
    text: String,
    priority: i32,
}

ember_class! {
    class NoteAsset : Object in "/Script/EmberAssetTest" {
        text: string,
        priority: int32,
    }
    meta { "Asset" => "true" }
}

static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(Default::default);

fn setup() -> MutexGuard<'static, ()> {
    let guard = TEST_LOCK.lock();
    static INIT: Lazy<()> = Lazy::new(|| {
        register_compiled_in_info(&[NoteAsset::class_params()], &[], &[]);
        ember_object::initialize(65_536);
        ember_asset::initialize();
    });
    Lazy::force(&INIT);
    guard
}

struct MountGuard {
    prefix: &'static str,
    dir: tempfile::TempDir,
}

impl MountGuard {
    fn new(prefix: &'static str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        paths::mount(prefix, dir.path());
        Self { prefix, dir }
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        paths::unmount(self.prefix);
    }
}

/// Author a one-export package on disk and return its primary GUID.
fn author_package(virtual_path: &str, text: &str, priority: i32) -> Guid {
    let mut package = create_package(virtual_path);
    let stem = paths::file_stem(virtual_path).to_string();
    let mut asset = new_object::<NoteAsset>(
        package.handle(),
        Name::new(&stem),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    let guid = asset.untyped().get().unwrap().guid();
    // SOUND: exclusively accessed by this test.
    unsafe {
        let note = asset.get_mut().unwrap();
        note.text = text.to_string();
        note.priority = priority;
    }
    save_package(&mut package, virtual_path).unwrap();

    drop(asset);
    assert!(destroy_package(virtual_path));
    guid
}

fn updates_counter(registry: &AssetRegistry) -> Arc<AtomicU32> {
    let counter = Arc::new(AtomicU32::new(0));
    let listener_counter = counter.clone();
    registry.on_registry_updated().add(move || {
        listener_counter.fetch_add(1, SeqCst);
    });
    counter
}

#[test]
fn initial_discovery_indexes_every_package_and_completes_once() {
    let _guard = setup();
    let _mount = MountGuard::new("/Disco/Content");

    const NUM_PACKAGES: usize = 1000;
    for i in 0..NUM_PACKAGES {
        author_package(&format!("/Disco/Content/Note{i}"), "text", i as i32);
    }

    let registry = AssetRegistry::get();
    let broadcasts = updates_counter(registry);

    let handle = registry.run_initial_discovery();
    handle.wait();

    assert_eq!(registry.num_assets(), NUM_PACKAGES);
    // One broadcast from the initial clear, then the "discovery completed"
    // broadcast exactly once, regardless of how many workers ran.
    assert_eq!(broadcasts.load(SeqCst), 2);
    assert!(registry.failed_paths().is_empty());

    registry.clear_assets();
}

#[test]
fn unparsable_packages_land_on_the_failed_list() {
    let _guard = setup();
    let mount = MountGuard::new("/Broken/Content");

    author_package("/Broken/Content/Fine", "ok", 1);
    std::fs::write(mount.dir.path().join("Broken.lasset"), b"not a package").unwrap();

    let registry = AssetRegistry::get();
    registry.run_initial_discovery().wait();

    assert_eq!(registry.num_assets(), 1);
    let failed = registry.failed_paths();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].ends_with("Broken.lasset"));

    registry.clear_assets();
}

#[test]
fn discovery_applies_the_primary_asset_recovery_rule() {
    let _guard = setup();
    let mount = MountGuard::new("/Recover/Content");

    let guid = author_package("/Recover/Content/Before", "v", 1);
    std::fs::rename(
        mount.dir.path().join("Before.lasset"),
        mount.dir.path().join("After.lasset"),
    )
    .unwrap();

    let registry = AssetRegistry::get();
    registry.run_initial_discovery().wait();

    let data = registry.asset_by_guid(&guid).unwrap();
    assert_eq!(data.name, Name::new("After"));
    assert_eq!(data.package_path, "/Recover/Content/After");

    registry.clear_assets();
}

#[test]
fn queries_resolve_by_guid_path_and_predicate() {
    let _guard = setup();
    let _mount = MountGuard::new("/Query/Content");

    let first = author_package("/Query/Content/First", "a", 1);
    let second = author_package("/Query/Content/Sub/Second", "b", 2);

    let registry = AssetRegistry::get();
    registry.run_initial_discovery().wait();

    // By GUID.
    assert_eq!(registry.asset_by_guid(&first).unwrap().name, Name::new("First"));

    // By path, with or without the extension, virtual or on-disk.
    for query in [
        "/Query/Content/Sub/Second",
        "/Query/Content/Sub/Second.lasset",
    ] {
        let data = registry.asset_by_path(query).unwrap();
        assert_eq!(data.guid, second, "query '{query}' resolves");
    }
    let on_disk = registry.asset_by_guid(&first).unwrap().path;
    assert_eq!(registry.asset_by_path(&on_disk).unwrap().guid, first);
    assert!(registry.asset_by_path("/Query/Content/Missing").is_none());

    // By predicate, without duplicates.
    let notes = registry.find_by_predicate(|a| a.class_name == Name::new("NoteAsset"));
    assert_eq!(notes.len(), 2);
    let high = registry.find_by_predicate(|a| a.name == Name::new("Second"));
    assert_eq!(high.len(), 1);

    registry.clear_assets();
}

#[test]
fn incremental_updates_mutate_records_in_place() {
    let _guard = setup();
    let _mount = MountGuard::new("/Incr/Content");

    let registry = AssetRegistry::get();
    registry.clear_assets();
    let broadcasts = updates_counter(registry);

    // Created.
    let mut package = create_package("/Incr/Content/Log");
    let asset: ObjectPtr<NoteAsset> = new_object(
        package.handle(),
        Name::new("Log"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    let guid = asset.untyped().get().unwrap().guid();
    registry.asset_created(asset.untyped().get().unwrap());
    assert_eq!(registry.num_assets(), 1);
    assert_eq!(broadcasts.load(SeqCst), 1);

    let data = registry.asset_by_guid(&guid).unwrap();
    assert_eq!(data.name, Name::new("Log"));
    assert_eq!(data.class_name, Name::new("NoteAsset"));
    assert_eq!(data.package_path, "/Incr/Content/Log");

    // Saved refreshes the record.
    save_package(&mut package, "/Incr/Content/Log").unwrap();
    registry.asset_saved(asset.untyped().get().unwrap());
    assert_eq!(registry.num_assets(), 1);
    assert_eq!(broadcasts.load(SeqCst), 2);

    // Renamed rewrites path, package path, and name.
    registry.asset_renamed("/Incr/Content/Log", "/Incr/Content/Journal");
    let data = registry.asset_by_guid(&guid).unwrap();
    assert_eq!(data.name, Name::new("Journal"));
    assert_eq!(data.package_path, "/Incr/Content/Journal");
    assert_eq!(broadcasts.load(SeqCst), 3);

    // Deleted removes the record.
    registry.asset_deleted(&guid);
    assert!(registry.asset_by_guid(&guid).is_none());
    assert_eq!(registry.num_assets(), 0);
    assert_eq!(broadcasts.load(SeqCst), 4);

    drop(asset);
    assert!(destroy_package("/Incr/Content/Log"));
    registry.clear_assets();
}

#[test]
fn non_resident_objects_load_through_the_registry() {
    let _guard = setup();
    let _mount = MountGuard::new("/LoadHook/Content");

    let guid = author_package("/LoadHook/Content/Saved", "persisted text", 9);

    let registry = AssetRegistry::get();
    registry.run_initial_discovery().wait();

    // The object is not resident; resolving the GUID loads its package.
    assert!(ember_object::find_object(&guid).is_none());
    let loaded = ember_asset::load_object(&guid).unwrap();
    let note = loaded.typed::<NoteAsset>().unwrap();
    assert!(!note
        .untyped()
        .get()
        .unwrap()
        .has_any_flags(ObjectFlags::NEEDS_LOAD));
    assert_eq!(note.get().unwrap().text, "persisted text");
    assert_eq!(note.get().unwrap().priority, 9);

    // A second resolve returns the resident object without reloading.
    let again = ember_asset::load_object(&guid).unwrap();
    assert_eq!(again.handle(), note.handle());

    // Path-based loading resolves through the same records.
    let by_path = ember_asset::load_object_by_path("/LoadHook/Content/Saved").unwrap();
    assert_eq!(by_path.handle(), note.handle());

    assert!(destroy_package("/LoadHook/Content/Saved"));
    registry.clear_assets();
}

#[test]
fn typed_loads_check_the_class() {
    let _guard = setup();
    let _mount = MountGuard::new("/Typed/Content");

    let guid = author_package("/Typed/Content/Thing", "t", 0);
    let registry = AssetRegistry::get();
    registry.run_initial_discovery().wait();

    assert!(ember_asset::load_typed_object::<NoteAsset>(&guid).is_some());

    assert!(destroy_package("/Typed/Content/Thing"));
    registry.clear_assets();
}
