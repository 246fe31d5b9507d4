//! End-to-end tests for the object runtime: table behavior, reflection
//! registration, the tagged serializer, and package save/load.
//!
//! The object table and lookup hashes are process-wide, so every test
//! takes the shared fixture lock and the fixture initializes the runtime
//! exactly once.

use std::mem::offset_of;

use ember_object::package::{
    create_package, destroy_package, load_package, save_package, PackageThumbnail,
    PACKAGE_FILE_TAG,
};
use ember_object::reflection::{
    register_compiled_in_info, ClassCell, ClassParams, ClassRegistration, EnumRegistration,
    PropertyExtra, PropertyParams, PropertyType, StructRegistration,
};
use ember_object::serialize::{Archive, MemoryReader, MemoryWriter, Serializable};
use ember_object::{
    ember_class, ember_enum, ember_struct, new_object, Guid, Name, Object, ObjectFlags,
    ObjectHandle, ObjectPtr, ObjectRef, ObjectType, WeakObjectRef,
};
use ember_utils::paths;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// Reflected test types
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq)]
struct TestSettings {
    threshold: f32,
    enabled: bool,
}

ember_struct! {
    struct TestSettings in "/Script/EmberTest" {
        threshold: float,
        enabled: bool,
    }
}

#[repr(i32)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
enum TestKind {
    #[default]
    None = 0,
    Static = 1,
    Dynamic = 2,
}

ember_enum! {
    enum TestKind in "/Script/EmberTest" {
        None = 0,
        Static = 1,
        Dynamic = 2,
    }
}

#[repr(C)]
#[derive(Default)]
struct TestAsset {
    base: Object,
    health: i32,
    scale: f32,
    title: String,
    id_name: Name,
    flagged: bool,
    kind: TestKind,
    settings: TestSettings,
    tags: Vec<Name>,
    weights: Vec<f32>,
    friend: ObjectRef,
}

ember_class! {
    class TestAsset : Object in "/Script/EmberTest" {
        health: int32,
        scale: float,
        title: string,
        id_name: name,
        flagged: bool,
        kind: enum(TestKind: int32),
        settings: struct(TestSettings),
        tags: vector(name),
        weights: vector(float),
        friend: object(TestAsset),
    }
    meta { "Asset" => "true" }
}

#[repr(C)]
#[derive(Default)]
struct OrderedAsset {
    base: Object,
    a: i32,
    b: f32,
    c: String,
}

ember_class! {
    class OrderedAsset : Object in "/Script/EmberTest" {
        a: int32,
        b: float,
        c: string,
    }
}

#[repr(C)]
#[derive(Default)]
struct ReorderedAsset {
    base: Object,
    c: String,
    a: i32,
    b: f32,
}

ember_class! {
    class ReorderedAsset : Object in "/Script/EmberTest" {
        c: string,
        a: int32,
        b: float,
    }
}

#[repr(C)]
#[derive(Default)]
struct WideAsset {
    base: Object,
    v: i32,
}

ember_class! {
    class WideAsset : Object in "/Script/EmberTest" {
        v: int32,
    }
}

#[repr(C)]
#[derive(Default)]
struct NarrowAsset {
    base: Object,
    v: i16,
}

ember_class! {
    class NarrowAsset : Object in "/Script/EmberTest" {
        v: int16,
    }
}

#[repr(C)]
#[derive(Default)]
struct SparseAsset {
    base: Object,
    health: i32,
}

ember_class! {
    class SparseAsset : Object in "/Script/EmberTest" {
        health: int32,
    }
}

#[repr(C)]
#[derive(Default)]
struct LifecycleAsset {
    base: Object,
    initialized: bool,
    loaded: bool,
    payload: i32,
}

ember_class! {
    class ChildAsset : TestAsset in "/Script/EmberTest" {
        extra: int32,
    }
}

#[repr(C)]
#[derive(Default)]
struct ChildAsset {
    base: TestAsset,
    extra: i32,
}

// LifecycleAsset registers by hand because it overrides lifecycle hooks,
// which the macro's generated `ObjectType` impl would shadow.
static LIFECYCLE_CELL: ClassCell = ClassCell::new();
static LIFECYCLE_PROPS: &[PropertyParams] = &[PropertyParams::plain(
    "payload",
    PropertyType::Int32,
    offset_of!(LifecycleAsset, payload),
)];
static LIFECYCLE_PARAMS: ClassParams = ClassParams {
    cell: &LIFECYCLE_CELL,
    name: "LifecycleAsset",
    package_name: "/Script/EmberTest",
    size: std::mem::size_of::<LifecycleAsset>(),
    align: std::mem::align_of::<LifecycleAsset>(),
    super_fn: <Object as ember_object::ObjectType>::static_class,
    factory: ember_object::object::construct_in_place::<LifecycleAsset>,
    hooks: ember_object::object::ObjectHooks::of::<LifecycleAsset>(),
    properties: LIFECYCLE_PROPS,
    metadata: &[],
};

// SOUND: `#[repr(C)]` with `Object` first; the property table above uses
// the type's real offsets.
unsafe impl ember_object::ObjectType for LifecycleAsset {
    const TYPE_NAME: &'static str = "LifecycleAsset";
    const PACKAGE_NAME: &'static str = "/Script/EmberTest";

    fn static_class() -> &'static ember_object::reflection::ClassType {
        LIFECYCLE_CELL.get()
    }

    fn post_init_properties(&mut self) {
        self.initialized = true;
    }

    fn post_load(&mut self) {
        self.loaded = true;
    }
}

// GaugeAsset routes its one property through accessors.
#[repr(C)]
#[derive(Default)]
struct GaugeAsset {
    base: Object,
    raw: i32,
}

unsafe fn gauge_get(container: *mut u8) -> *mut u8 {
    container.add(offset_of!(GaugeAsset, raw))
}

unsafe fn gauge_set(container: *mut u8, value: *const u8) {
    let v = *(value as *const i32);
    *(container.add(offset_of!(GaugeAsset, raw)) as *mut i32) = v.clamp(0, 100);
}

static GAUGE_CELL: ClassCell = ClassCell::new();
static GAUGE_PROPS: &[PropertyParams] = &[PropertyParams {
    name: "raw",
    type_tag: PropertyType::Int32,
    offset: offset_of!(GaugeAsset, raw),
    getter: Some(gauge_get),
    setter: Some(gauge_set),
    extra: PropertyExtra::None,
    metadata: &[],
}];
static GAUGE_PARAMS: ClassParams = ClassParams {
    cell: &GAUGE_CELL,
    name: "GaugeAsset",
    package_name: "/Script/EmberTest",
    size: std::mem::size_of::<GaugeAsset>(),
    align: std::mem::align_of::<GaugeAsset>(),
    super_fn: <Object as ember_object::ObjectType>::static_class,
    factory: ember_object::object::construct_in_place::<GaugeAsset>,
    hooks: ember_object::object::ObjectHooks::of::<GaugeAsset>(),
    properties: GAUGE_PROPS,
    metadata: &[],
};

// SOUND: `#[repr(C)]` with `Object` first.
unsafe impl ember_object::ObjectType for GaugeAsset {
    const TYPE_NAME: &'static str = "GaugeAsset";
    const PACKAGE_NAME: &'static str = "/Script/EmberTest";

    fn static_class() -> &'static ember_object::reflection::ClassType {
        GAUGE_CELL.get()
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(Default::default);

fn setup() -> MutexGuard<'static, ()> {
    let guard = TEST_LOCK.lock();
    static INIT: Lazy<()> = Lazy::new(|| {
        register_compiled_in_info(
            &[
                TestAsset::class_params(),
                OrderedAsset::class_params(),
                ReorderedAsset::class_params(),
                WideAsset::class_params(),
                NarrowAsset::class_params(),
                SparseAsset::class_params(),
                ChildAsset::class_params(),
                &LIFECYCLE_PARAMS,
                &GAUGE_PARAMS,
            ],
            &[TestKind::enum_params()],
            &[TestSettings::struct_params()],
        );
        ember_object::initialize(65_536);
    });
    Lazy::force(&INIT);
    guard
}

fn spawn_asset(name: &str) -> ObjectPtr<TestAsset> {
    new_object::<TestAsset>(
        ObjectHandle::NULL,
        Name::new(name),
        Guid::NIL,
        ObjectFlags::empty(),
    )
}

/// Serialize the tagged property stream of `object` through a GUID-based
/// object archiver.
fn write_tagged<T: ember_object::ObjectType>(ptr: &ObjectPtr<T>) -> Vec<u8> {
    let object = ptr.untyped().get().unwrap();
    let mut writer = MemoryWriter::new();
    {
        let mut archiver = ember_object::package::ObjectArchiver::new(&mut writer);
        // SOUND: the object is live and its class describes its layout.
        unsafe {
            object
                .class()
                .serialize_tagged_properties(&mut archiver, ptr.untyped().as_ptr() as *mut u8);
        }
        assert!(!archiver.has_error());
    }
    writer.into_bytes()
}

/// Deserialize a tagged property stream into `object`.
fn read_tagged<T: ember_object::ObjectType>(ptr: &mut ObjectPtr<T>, bytes: &[u8]) {
    let object_ptr = ptr.untyped().as_ptr();
    let class = ptr.untyped().get().unwrap().class();
    let mut reader = MemoryReader::new(bytes);
    let mut archiver = ember_object::package::ObjectArchiver::new(&mut reader);
    // SOUND: the object is live, exclusively accessed by this test, and its
    // class describes its layout.
    unsafe {
        class.serialize_tagged_properties(&mut archiver, object_ptr as *mut u8);
    }
}

// ---------------------------------------------------------------------------
// Object table
// ---------------------------------------------------------------------------

#[test]
fn allocate_resolve_round_trips() {
    let _guard = setup();

    let asset = spawn_asset("ResolveMe");
    let handle = asset.handle();
    let table = ember_object::table::object_table();

    assert!(handle.is_valid());
    assert_eq!(table.resolve(handle), asset.untyped().as_ptr());
    assert_eq!(asset.get().unwrap().object().name(), Name::new("ResolveMe"));
}

#[test]
fn released_handles_invalidate_and_slots_recycle() {
    let _guard = setup();

    let a = spawn_asset("Doomed");
    let handle_a = a.handle();
    drop(a);

    let table = ember_object::table::object_table();
    assert!(table.resolve(handle_a).is_null());

    // The freed slot is reused immediately (LIFO free list) with a higher
    // generation, so the stale handle keeps resolving to null.
    let b = spawn_asset("Replacement");
    let handle_b = b.handle();
    assert_eq!(handle_b.index, handle_a.index);
    assert!(handle_b.generation > handle_a.generation);
    assert!(table.resolve(handle_a).is_null());
    assert_eq!(table.resolve(handle_b), b.untyped().as_ptr());
}

#[test]
fn rooted_objects_survive_their_references() {
    let _guard = setup();

    let asset = spawn_asset("Rooted");
    let handle = asset.handle();
    asset.untyped().get().unwrap().add_to_root();
    drop(asset);

    let table = ember_object::table::object_table();
    let object = table.resolve(handle);
    assert!(!object.is_null());
    // SOUND: just resolved; the root set keeps the object alive.
    unsafe {
        assert!((*object).has_any_flags(ObjectFlags::ROOTED));
        (*object).remove_from_root();
    }
    assert!(table.resolve(handle).is_null());
}

#[test]
fn weak_references_observe_without_keeping_alive() {
    let _guard = setup();

    let asset = spawn_asset("Watched");
    let weak = WeakObjectRef::from_handle(asset.handle());
    assert!(weak.pin().is_some());

    drop(asset);
    assert!(weak.pin().is_none());
}

// ---------------------------------------------------------------------------
// Reflection
// ---------------------------------------------------------------------------

#[test]
fn class_registration_builds_property_chain() {
    let _guard = setup();

    let class = TestAsset::static_class();
    assert_eq!(class.name(), Name::new("TestAsset"));
    assert!(class.metadata().has("Asset"));
    assert!(class.is_child_of(Object::static_class()));

    let names: Vec<&str> = class.properties().map(|p| p.name().as_str()).collect();
    assert_eq!(
        names,
        [
            "health", "scale", "title", "id_name", "flagged", "kind", "settings", "tags",
            "weights", "friend"
        ]
    );

    let health = class.find_property(Name::new("health")).unwrap();
    assert!(health.is_a(PropertyType::Int32));
    assert_eq!(health.offset(), offset_of!(TestAsset, health));
}

#[test]
fn subclasses_link_own_properties_before_inherited() {
    let _guard = setup();

    let class = ChildAsset::static_class();
    assert!(class.is_child_of(TestAsset::static_class()));
    assert!(class.is_child_of(Object::static_class()));
    assert!(!TestAsset::static_class().is_child_of(class));

    let names: Vec<&str> = class.properties().map(|p| p.name().as_str()).collect();
    assert_eq!(
        names,
        [
            "extra", "health", "scale", "title", "id_name", "flagged", "kind", "settings",
            "tags", "weights", "friend"
        ]
    );
}

#[test]
fn enums_register_their_entries() {
    let _guard = setup();

    let kind = TestKind::static_enum();
    assert_eq!(kind.name(), Name::new("TestKind"));
    assert_eq!(kind.entries().len(), 3);
    assert_eq!(kind.value_of(Name::new("Static")), Some(1));
    assert_eq!(kind.name_of(2), Some(Name::new("Dynamic")));
    assert_eq!(kind.name_of(9), None);
}

#[test]
fn class_default_objects_are_created_once_and_rooted() {
    let _guard = setup();

    let class = TestAsset::static_class();
    let cdo = class.class_default_object();
    assert_eq!(class.class_default_object(), cdo);

    let object = ember_object::table::object_table().resolve(cdo);
    assert!(!object.is_null());
    // SOUND: CDOs are rooted and never destroyed outside shutdown.
    unsafe {
        assert!((*object).has_any_flags(ObjectFlags::DEFAULT_OBJECT));
        assert!((*object).has_any_flags(ObjectFlags::ROOTED));
    }
}

#[test]
fn lifecycle_hooks_fire_on_construction() {
    let _guard = setup();

    let asset = new_object::<LifecycleAsset>(
        ObjectHandle::NULL,
        Name::NONE,
        Guid::NIL,
        ObjectFlags::empty(),
    );
    assert!(asset.get().unwrap().initialized);
    // Auto-generated names follow `ClassName_N`.
    assert!(asset
        .untyped()
        .get()
        .unwrap()
        .name()
        .as_str()
        .starts_with("LifecycleAsset_"));
}

#[test]
fn accessor_properties_route_reads_and_writes() {
    let _guard = setup();

    let mut gauge = new_object::<GaugeAsset>(
        ObjectHandle::NULL,
        Name::new("Gauge"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    let class = GaugeAsset::static_class();
    let property = class.find_property(Name::new("raw")).unwrap();
    let container = gauge.untyped().as_ptr() as *mut u8;

    // SOUND: the object is live and exclusively accessed by this test.
    unsafe {
        property.set_value(container, 250.0);
        assert_eq!(gauge.get_mut().unwrap().raw, 100, "setter clamps");

        property.set_value(container, 42.0);
        let value_ptr = property.value_ptr(container);
        assert_eq!(*(value_ptr as *const i32), 42);
    }
}

// ---------------------------------------------------------------------------
// Tagged serializer
// ---------------------------------------------------------------------------

#[test]
fn tagged_stream_round_trips_every_property_kind() {
    let _guard = setup();

    let friend = spawn_asset("RoundTripFriend");
    let mut original = spawn_asset("RoundTrip");
    // SOUND: exclusively accessed by this test.
    unsafe {
        let asset = original.get_mut().unwrap();
        asset.health = -12;
        asset.scale = 2.5;
        asset.title = "hello world".to_string();
        asset.id_name = Name::new("SomeId");
        asset.flagged = true;
        asset.kind = TestKind::Dynamic;
        asset.settings = TestSettings {
            threshold: 0.75,
            enabled: true,
        };
        asset.tags = vec![Name::new("alpha"), Name::new("beta")];
        asset.weights = vec![1.0, 0.25, -3.5];
        asset.friend = friend.untyped().clone();
    }

    let bytes = write_tagged(&original);

    let mut restored = spawn_asset("RoundTripRestored");
    read_tagged(&mut restored, &bytes);

    // SOUND: exclusively accessed by this test.
    unsafe {
        let asset = restored.get_mut().unwrap();
        assert_eq!(asset.health, -12);
        assert_eq!(asset.scale, 2.5);
        assert_eq!(asset.title, "hello world");
        assert_eq!(asset.id_name, Name::new("SomeId"));
        assert!(asset.flagged);
        assert_eq!(asset.kind, TestKind::Dynamic);
        assert_eq!(
            asset.settings,
            TestSettings {
                threshold: 0.75,
                enabled: true
            }
        );
        assert_eq!(asset.tags, vec![Name::new("alpha"), Name::new("beta")]);
        assert_eq!(asset.weights, vec![1.0, 0.25, -3.5]);
        assert_eq!(asset.friend.handle(), friend.handle());
    }
}

#[test]
fn reordered_declarations_recover_by_field_name() {
    let _guard = setup();

    let mut ordered = new_object::<OrderedAsset>(
        ObjectHandle::NULL,
        Name::new("Ordered"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    // SOUND: exclusively accessed by this test.
    unsafe {
        let asset = ordered.get_mut().unwrap();
        asset.a = 7;
        asset.b = 0.5;
        asset.c = "x".to_string();
    }
    let bytes = write_tagged(&ordered);

    let mut reordered = new_object::<ReorderedAsset>(
        ObjectHandle::NULL,
        Name::new("Reordered"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    read_tagged(&mut reordered, &bytes);

    // SOUND: exclusively accessed by this test.
    unsafe {
        let asset = reordered.get_mut().unwrap();
        assert_eq!(asset.a, 7);
        assert_eq!(asset.b, 0.5);
        assert_eq!(asset.c, "x");
    }
}

#[test]
fn numeric_type_changes_convert_when_the_value_fits() {
    let _guard = setup();

    // Policy: a numeric value whose on-disk type differs converts when it
    // fits the new type exactly, and is skipped (keeping the current value)
    // when it does not.
    let mut wide = new_object::<WideAsset>(
        ObjectHandle::NULL,
        Name::new("WideFits"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    // SOUND: exclusively accessed by this test.
    unsafe {
        wide.get_mut().unwrap().v = 300;
    }
    let bytes = write_tagged(&wide);

    let mut narrow = new_object::<NarrowAsset>(
        ObjectHandle::NULL,
        Name::new("NarrowFits"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    read_tagged(&mut narrow, &bytes);
    // SOUND: exclusively accessed by this test.
    unsafe {
        assert_eq!(narrow.get_mut().unwrap().v, 300, "300 fits in i16");
    }
}

#[test]
fn numeric_type_changes_skip_when_the_value_overflows() {
    let _guard = setup();

    let mut wide = new_object::<WideAsset>(
        ObjectHandle::NULL,
        Name::new("WideOverflow"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    // SOUND: exclusively accessed by this test.
    unsafe {
        wide.get_mut().unwrap().v = 70_000;
    }
    let bytes = write_tagged(&wide);

    let mut narrow = new_object::<NarrowAsset>(
        ObjectHandle::NULL,
        Name::new("NarrowOverflow"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    read_tagged(&mut narrow, &bytes);
    // SOUND: exclusively accessed by this test.
    unsafe {
        assert_eq!(
            narrow.get_mut().unwrap().v,
            0,
            "70000 does not fit in i16; the field keeps its value"
        );
    }
}

#[test]
fn unknown_fields_are_skipped_by_their_declared_size() {
    let _guard = setup();

    let mut full = spawn_asset("FullForSkip");
    // SOUND: exclusively accessed by this test.
    unsafe {
        let asset = full.get_mut().unwrap();
        asset.health = 99;
        asset.title = "will be skipped".to_string();
        asset.tags = vec![Name::new("skipped_tag")];
    }

    // Write the tagged stream followed by a sentinel. If skipping a field
    // advanced the stream by anything but its declared size, the sentinel
    // read below would land in the wrong place.
    let mut writer = MemoryWriter::new();
    {
        let mut archiver = ember_object::package::ObjectArchiver::new(&mut writer);
        // SOUND: the object is live and its class describes its layout.
        unsafe {
            full.untyped()
                .get()
                .unwrap()
                .class()
                .serialize_tagged_properties(&mut archiver, full.untyped().as_ptr() as *mut u8);
        }
    }
    let mut sentinel: u32 = 0xDEAD_BEEF;
    sentinel.serialize(&mut writer);
    let bytes = writer.into_bytes();

    let mut sparse = new_object::<SparseAsset>(
        ObjectHandle::NULL,
        Name::new("Sparse"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    let mut reader = MemoryReader::new(&bytes);
    {
        let mut archiver = ember_object::package::ObjectArchiver::new(&mut reader);
        let class = SparseAsset::static_class();
        // SOUND: exclusively accessed by this test.
        unsafe {
            class.serialize_tagged_properties(
                &mut archiver,
                sparse.untyped().as_ptr() as *mut u8,
            );
        }
    }

    let mut read_back: u32 = 0;
    read_back.serialize(&mut reader);
    assert_eq!(read_back, 0xDEAD_BEEF, "stream stayed aligned");
    assert!(!reader.has_error());

    // SOUND: exclusively accessed by this test.
    unsafe {
        assert_eq!(sparse.get_mut().unwrap().health, 99);
    }
}

#[test]
fn corrupted_count_prefix_sets_the_error_flag() {
    let _guard = setup();

    // A vector property whose element count claims to be enormous must flip
    // the archive error flag without allocating.
    let mut writer = MemoryWriter::new();
    1u32.clone().serialize(&mut writer); // one property
    let mut tag = ember_object::reflection::PropertyTag {
        type_name: Name::new("ArrayProperty"),
        name: Name::new("tags"),
        size: 8,
        offset: 0,
    };
    tag.serialize(&mut writer);
    u64::MAX.clone().serialize(&mut writer); // corrupt element count
    let bytes = writer.into_bytes();

    let mut victim = spawn_asset("CorruptTarget");
    let mut reader = MemoryReader::new(&bytes);
    let class = TestAsset::static_class();
    // SOUND: exclusively accessed by this test.
    unsafe {
        class.serialize_tagged_properties(&mut reader, victim.untyped().as_ptr() as *mut u8);
    }
    assert!(reader.has_error());
    // SOUND: exclusively accessed by this test.
    unsafe {
        assert!(victim.get_mut().unwrap().tags.is_empty());
    }
}

// ---------------------------------------------------------------------------
// Packages
// ---------------------------------------------------------------------------

struct MountGuard {
    prefix: &'static str,
    _dir: tempfile::TempDir,
}

impl MountGuard {
    fn new(prefix: &'static str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        paths::mount(prefix, dir.path());
        Self { prefix, _dir: dir }
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        paths::unmount(self.prefix);
    }
}

#[test]
fn packages_save_and_lazily_load() {
    let _guard = setup();
    let _mount = MountGuard::new("/SaveLoad/Content");

    let package_path = "/SaveLoad/Content/Hero";
    let mut package = create_package(package_path);
    let mut asset = new_object::<TestAsset>(
        package.handle(),
        Name::new("Hero"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    let guid = asset.untyped().get().unwrap().guid();
    // SOUND: exclusively accessed by this test.
    unsafe {
        let hero = asset.get_mut().unwrap();
        hero.health = 42;
        hero.title = "the hero".to_string();
    }

    save_package(&mut package, package_path).unwrap();
    assert!(!package.get().unwrap().is_dirty());

    // The file starts with the package tag.
    let disk_path = ember_object::package::package_disk_path(package_path);
    let bytes = std::fs::read(&disk_path).unwrap();
    assert_eq!(
        u32::from_le_bytes(bytes[..4].try_into().unwrap()),
        PACKAGE_FILE_TAG
    );

    // Wipe the in-memory graph, then load fresh from disk.
    drop(asset);
    assert!(destroy_package(package_path));
    drop(package);

    let loaded = load_package(package_path).unwrap();
    {
        let p = loaded.get().unwrap();
        assert_eq!(p.exports().len(), 1);
        let shell = p.exports()[0].object.pin().unwrap();
        assert!(shell.get().unwrap().has_any_flags(ObjectFlags::NEEDS_LOAD));
        assert!(shell.get().unwrap().has_any_flags(ObjectFlags::WAS_LOADED));
    }

    let restored = loaded.get().unwrap().load_object(&guid).unwrap();
    let restored = restored.typed::<TestAsset>().unwrap();
    assert!(!restored
        .untyped()
        .get()
        .unwrap()
        .has_any_flags(ObjectFlags::NEEDS_LOAD));
    assert_eq!(restored.get().unwrap().health, 42);
    assert_eq!(restored.get().unwrap().title, "the hero");

}

#[test]
fn package_local_references_resolve_after_reload() {
    let _guard = setup();
    let _mount = MountGuard::new("/Linked/Content");

    let package_path = "/Linked/Content/Pair";
    let mut package = create_package(package_path);
    let mut first = new_object::<TestAsset>(
        package.handle(),
        Name::new("Pair"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    let second = new_object::<TestAsset>(
        package.handle(),
        Name::new("Sidekick"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    let first_guid = first.untyped().get().unwrap().guid();
    let second_guid = second.untyped().get().unwrap().guid();
    // SOUND: exclusively accessed by this test.
    unsafe {
        first.get_mut().unwrap().friend = second.untyped().clone();
    }

    save_package(&mut package, package_path).unwrap();
    drop(first);
    drop(second);
    assert!(destroy_package(package_path));
    drop(package);

    let loaded = load_package(package_path).unwrap();
    // SOUND: raw resolution of the sidekick below is read-only.
    unsafe {
        let p = loaded.get().unwrap();
        assert_eq!(p.exports().len(), 2);
        assert!(p.fully_load());

        let first = p.load_object(&first_guid).unwrap();
        let first = first.typed::<TestAsset>().unwrap();
        let friend_handle = first.get().unwrap().friend.handle();
        let friend = ember_object::table::object_table().resolve(friend_handle);
        assert!(!friend.is_null());
        assert_eq!((*friend).guid(), second_guid);
    }

}

#[test]
fn cross_package_references_become_imports() {
    let _guard = setup();
    let _mount = MountGuard::new("/Imports/Content");

    // The referenced asset lives in its own package and stays resident.
    let library_path = "/Imports/Content/Library";
    let mut library = create_package(library_path);
    let shared = new_object::<TestAsset>(
        library.handle(),
        Name::new("Library"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    let shared_guid = shared.untyped().get().unwrap().guid();
    save_package(&mut library, library_path).unwrap();

    let user_path = "/Imports/Content/User";
    let mut user_package = create_package(user_path);
    let mut user = new_object::<TestAsset>(
        user_package.handle(),
        Name::new("User"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    let user_guid = user.untyped().get().unwrap().guid();
    // SOUND: exclusively accessed by this test.
    unsafe {
        user.get_mut().unwrap().friend = shared.untyped().clone();
    }

    save_package(&mut user_package, user_path).unwrap();
    assert_eq!(user_package.get().unwrap().imports().len(), 1);
    assert_eq!(user_package.get().unwrap().imports()[0].guid, shared_guid);

    // Reload only the user package; the import resolves to the resident
    // library asset.
    drop(user);
    assert!(destroy_package(user_path));
    drop(user_package);

    let loaded = load_package(user_path).unwrap();
    {
        let p = loaded.get().unwrap();
        let restored = p.load_object(&user_guid).unwrap();
        let restored = restored.typed::<TestAsset>().unwrap();
        let friend_handle = restored.get().unwrap().friend.handle();
        assert_eq!(friend_handle, shared.handle());
    }

}

#[test]
fn thumbnails_survive_the_save_load_cycle() {
    let _guard = setup();
    let _mount = MountGuard::new("/Thumbs/Content");

    let package_path = "/Thumbs/Content/Pic";
    let mut package = create_package(package_path);
    let _asset = new_object::<TestAsset>(
        package.handle(),
        Name::new("Pic"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    let thumbnail = PackageThumbnail::new(2, 2, vec![9u8; 16]);
    // SOUND: exclusively accessed by this test.
    unsafe {
        package.get_mut().unwrap().set_thumbnail(Some(thumbnail.clone()));
    }

    save_package(&mut package, package_path).unwrap();

    // Parse the thumbnail straight from the file.
    let disk_path = ember_object::package::package_disk_path(package_path);
    let bytes = std::fs::read(&disk_path).unwrap();
    let (header, _) = ember_object::package::read_package_summary(&bytes).unwrap();
    assert!(header.thumbnail_offset > 0);

    let mut reader = MemoryReader::new(&bytes);
    reader.seek(header.thumbnail_offset as u64);
    let mut loaded = PackageThumbnail::default();
    loaded.serialize(&mut reader);
    assert_eq!(loaded, thumbnail);

}

#[test]
fn renamed_package_files_recover_their_primary_asset() {
    let _guard = setup();
    let _mount = MountGuard::new("/Renamed/Content");

    let old_path = "/Renamed/Content/OldName";
    let mut package = create_package(old_path);
    let asset = new_object::<TestAsset>(
        package.handle(),
        Name::new("OldName"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    save_package(&mut package, old_path).unwrap();

    // Rename the file on disk behind the runtime's back.
    let old_disk = ember_object::package::package_disk_path(old_path);
    let new_disk = old_disk.with_file_name("NewName.lasset");
    std::fs::rename(&old_disk, &new_disk).unwrap();

    drop(asset);
    assert!(destroy_package(old_path));
    drop(package);

    // TestAsset carries the `Asset` metadata key, so the loader renames the
    // stale primary export to the new file stem.
    let loaded = load_package("/Renamed/Content/NewName").unwrap();
    let p = loaded.get().unwrap();
    assert_eq!(p.exports().len(), 1);
    assert_eq!(p.exports()[0].name, Name::new("NewName"));
    let shell = p.exports()[0].object.pin().unwrap();
    assert_eq!(shell.get().unwrap().name(), Name::new("NewName"));

}

#[test]
fn post_load_hooks_run_after_deserialization() {
    let _guard = setup();
    let _mount = MountGuard::new("/PostLoad/Content");

    let package_path = "/PostLoad/Content/Hooked";
    let mut package = create_package(package_path);
    let mut asset = new_object::<LifecycleAsset>(
        package.handle(),
        Name::new("Hooked"),
        Guid::NIL,
        ObjectFlags::empty(),
    );
    // SOUND: exclusively accessed by this test.
    unsafe {
        asset.get_mut().unwrap().payload = 5;
    }
    let guid = asset.untyped().get().unwrap().guid();

    save_package(&mut package, package_path).unwrap();
    drop(asset);
    assert!(destroy_package(package_path));
    drop(package);

    let loaded = load_package(package_path).unwrap();
    {
        let p = loaded.get().unwrap();
        let restored = p.load_object(&guid).unwrap();
        {
            let object = restored.get().unwrap();
            assert!(object.has_any_flags(ObjectFlags::NEEDS_POST_LOAD));
        }

        p.post_load_all();

        let restored = restored.typed::<LifecycleAsset>().unwrap();
        let object = restored.get().unwrap();
        assert!(!restored
            .untyped()
            .get()
            .unwrap()
            .has_any_flags(ObjectFlags::NEEDS_POST_LOAD));
        assert!(object.loaded, "post_load ran");
        assert_eq!(object.payload, 5);
    }

}
