//! Deferred type registration.
//!
//! Modules describe their reflected types as plain-old-data parameter
//! records in `&'static` arrays and enqueue them with
//! [`register_compiled_in_info`]. Nothing else happens at enqueue time;
//! the object table and reflection graph need not exist yet. The queues
//! are flushed by [`process_newly_loaded_objects`], which allocates the
//! actual class/struct/enum objects and builds their property lists.

use ember_utils::{Guid, Name};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;

use crate::flags::ObjectFlags;
use crate::handle::ObjectHandle;
use crate::object::{Object, ObjectFactoryFn, ObjectHooks, ObjectType};
use crate::reflection::property::{
    Property, PropertyGetterFn, PropertyKind, PropertySetterFn, PropertyType, VectorOps,
};
use crate::reflection::types::{ClassType, EnumType, Metadata, StructType};
use crate::table::object_table;

/// Cell that a registered class is published into, giving the type's
/// `static_class()` accessor something stable to read.
pub struct ClassCell(OnceCell<&'static ClassType>);

impl ClassCell {
    /// Create an empty cell.
    pub const fn new() -> Self {
        Self(OnceCell::new())
    }

    /// The registered class.
    ///
    /// # Panics
    ///
    /// Panics when the class's registration has not been flushed yet.
    pub fn get(&self) -> &'static ClassType {
        self.0
            .get()
            .expect("class is not registered yet; was process_newly_loaded_objects called?")
    }

    /// The registered class, or [`None`] before the flush.
    pub fn try_get(&self) -> Option<&'static ClassType> {
        self.0.get().copied()
    }

    pub(crate) fn set(&self, class: &'static ClassType) {
        let _ = self.0.set(class);
    }
}

/// Cell that a registered struct is published into.
pub struct StructCell(OnceCell<&'static StructType>);

impl StructCell {
    /// Create an empty cell.
    pub const fn new() -> Self {
        Self(OnceCell::new())
    }

    /// The registered struct.
    ///
    /// # Panics
    ///
    /// Panics when the struct's registration has not been flushed yet.
    pub fn get(&self) -> &'static StructType {
        self.0
            .get()
            .expect("struct is not registered yet; was process_newly_loaded_objects called?")
    }

    pub(crate) fn set(&self, value: &'static StructType) {
        let _ = self.0.set(value);
    }
}

/// Cell that a registered enum is published into.
pub struct EnumCell(OnceCell<&'static EnumType>);

impl EnumCell {
    /// Create an empty cell.
    pub const fn new() -> Self {
        Self(OnceCell::new())
    }

    /// The registered enum.
    ///
    /// # Panics
    ///
    /// Panics when the enum's registration has not been flushed yet.
    pub fn get(&self) -> &'static EnumType {
        self.0
            .get()
            .expect("enum is not registered yet; was process_newly_loaded_objects called?")
    }

    pub(crate) fn set(&self, value: &'static EnumType) {
        let _ = self.0.set(value);
    }
}

// Cells for the intrinsic bootstrap classes.
pub(crate) static OBJECT_CLASS_CELL: ClassCell = ClassCell::new();
pub(crate) static STRUCT_CLASS_CELL: ClassCell = ClassCell::new();
pub(crate) static CLASS_CLASS_CELL: ClassCell = ClassCell::new();
pub(crate) static ENUM_CLASS_CELL: ClassCell = ClassCell::new();
pub(crate) static PACKAGE_CLASS_CELL: ClassCell = ClassCell::new();

/// One metadata pair in a registration record.
#[derive(Copy, Clone, Debug)]
pub struct MetadataPairParam {
    /// The key.
    pub key: &'static str,
    /// The value.
    pub value: &'static str,
}

/// Extra payload carried by a [`PropertyParams`] record, depending on the
/// type tag.
#[derive(Copy, Clone)]
pub enum PropertyExtra {
    /// Nothing extra.
    None,
    /// For `Object` properties: the referenced class.
    ObjectClass(fn() -> &'static ClassType),
    /// For `Struct` properties: the nested struct.
    Struct(fn() -> &'static StructType),
    /// For `Enum` properties: the reflected enum.
    Enum(fn() -> &'static EnumType),
    /// For `Vector` properties: the erased element-vec operations.
    Vector(VectorOps),
}

/// POD description of one reflected field.
///
/// Records for a struct are laid out in reverse declaration order, and a
/// composite property's inner record (the vector element or the enum's
/// backing numeric) sits immediately before its container so the
/// reverse-order construction walk consumes it next.
#[derive(Copy, Clone)]
pub struct PropertyParams {
    /// Field name.
    pub name: &'static str,
    /// Type tag.
    pub type_tag: PropertyType,
    /// Byte offset in the owning layout (`0` for inner records).
    pub offset: usize,
    /// Optional accessor returning the value's storage.
    pub getter: Option<PropertyGetterFn>,
    /// Optional accessor writing a new value.
    pub setter: Option<PropertySetterFn>,
    /// Per-kind payload.
    pub extra: PropertyExtra,
    /// Field metadata pairs.
    pub metadata: &'static [MetadataPairParam],
}

impl PropertyParams {
    /// Shorthand for a field-backed property with no accessors or metadata.
    pub const fn plain(name: &'static str, type_tag: PropertyType, offset: usize) -> Self {
        Self {
            name,
            type_tag,
            offset,
            getter: None,
            setter: None,
            extra: PropertyExtra::None,
            metadata: &[],
        }
    }
}

/// POD registration record for a class.
pub struct ClassParams {
    /// Cell the constructed class is published into.
    pub cell: &'static ClassCell,
    /// Display name.
    pub name: &'static str,
    /// Script package name.
    pub package_name: &'static str,
    /// Instance size in bytes.
    pub size: usize,
    /// Instance alignment in bytes.
    pub align: usize,
    /// Resolves the super class. `Object::static_class` for root classes.
    pub super_fn: fn() -> &'static ClassType,
    /// Constructs a default instance in place.
    pub factory: ObjectFactoryFn,
    /// Lifecycle hooks.
    pub hooks: ObjectHooks,
    /// Property records, reverse declaration order.
    pub properties: &'static [PropertyParams],
    /// Class metadata pairs.
    pub metadata: &'static [MetadataPairParam],
}

/// POD registration record for a struct.
pub struct StructParams {
    /// Cell the constructed struct is published into.
    pub cell: &'static StructCell,
    /// Display name.
    pub name: &'static str,
    /// Script package name.
    pub package_name: &'static str,
    /// Instance size in bytes.
    pub size: usize,
    /// Instance alignment in bytes.
    pub align: usize,
    /// Resolves the super struct, if any.
    pub super_fn: Option<fn() -> &'static StructType>,
    /// Property records, reverse declaration order.
    pub properties: &'static [PropertyParams],
    /// Struct metadata pairs.
    pub metadata: &'static [MetadataPairParam],
}

/// One enumerator in an enum registration record.
#[derive(Copy, Clone, Debug)]
pub struct EnumeratorParam {
    /// The enumerator name.
    pub name: &'static str,
    /// The enumerator value.
    pub value: i64,
}

/// POD registration record for an enum.
pub struct EnumParams {
    /// Cell the constructed enum is published into.
    pub cell: &'static EnumCell,
    /// Display name.
    pub name: &'static str,
    /// Script package name.
    pub package_name: &'static str,
    /// The ordered enumerators.
    pub entries: &'static [EnumeratorParam],
    /// Enum metadata pairs.
    pub metadata: &'static [MetadataPairParam],
}

/// Types that registered a class record (implemented by [`ember_class!`]).
///
/// [`ember_class!`]: crate::ember_class
pub trait ClassRegistration {
    /// The type's registration record.
    fn class_params() -> &'static ClassParams;
}

/// Types that registered a struct record (implemented by [`ember_struct!`]).
///
/// [`ember_struct!`]: crate::ember_struct
pub trait StructRegistration {
    /// The type's registration record.
    fn struct_params() -> &'static StructParams;
    /// The registered struct entry.
    fn static_struct() -> &'static StructType;
}

/// Types that registered an enum record (implemented by [`ember_enum!`]).
///
/// [`ember_enum!`]: crate::ember_enum
pub trait EnumRegistration {
    /// The type's registration record.
    fn enum_params() -> &'static EnumParams;
    /// The registered enum entry.
    fn static_enum() -> &'static EnumType;
}

#[derive(Default)]
struct DeferredRegistry {
    classes: Vec<&'static ClassParams>,
    structs: Vec<&'static StructParams>,
    enums: Vec<&'static EnumParams>,
}

static DEFERRED: Lazy<Mutex<DeferredRegistry>> = Lazy::new(Default::default);

/// Enqueue registration records for later processing.
///
/// Safe to call at any time, including before the runtime is initialized;
/// nothing but the enqueue happens here.
pub fn register_compiled_in_info(
    classes: &[&'static ClassParams],
    enums: &[&'static EnumParams],
    structs: &[&'static StructParams],
) {
    let mut deferred = DEFERRED.lock();
    deferred.classes.extend_from_slice(classes);
    deferred.enums.extend_from_slice(enums);
    deferred.structs.extend_from_slice(structs);
}

/// Whether any registration records are waiting to be flushed.
pub fn has_pending_registrations() -> bool {
    let deferred = DEFERRED.lock();
    !deferred.classes.is_empty() || !deferred.structs.is_empty() || !deferred.enums.is_empty()
}

/// Flush all pending registrations into the reflection graph.
///
/// The flush runs in two phases so record order never matters: every
/// struct, enum, and class object is allocated and published first, then
/// properties are built and super pointers resolved and linked. Safe to
/// call repeatedly; each record is processed once.
pub fn process_newly_loaded_objects() {
    assert!(
        object_table().is_initialized(),
        "reflection flush requires an initialized object table"
    );

    let pending = {
        let mut deferred = DEFERRED.lock();
        DeferredRegistry {
            classes: std::mem::take(&mut deferred.classes),
            structs: std::mem::take(&mut deferred.structs),
            enums: std::mem::take(&mut deferred.enums),
        }
    };

    for params in &pending.structs {
        allocate_struct_object(params);
    }
    for params in &pending.enums {
        construct_enum(params);
    }
    for params in &pending.classes {
        allocate_class_object(params);
    }

    for params in &pending.structs {
        finalize_struct(params);
    }
    for params in &pending.classes {
        finalize_class(params);
    }

    // Linking runs last, once every pending record has its own properties
    // and super pointer in place: `link` splices the super chain onto the
    // child's list, so a child linked before its parent was finalized would
    // capture an empty chain.
    for params in &pending.structs {
        params.cell.get().link();
    }
    for params in &pending.classes {
        params.cell.get().link();
    }
}

fn metadata_from_params(pairs: &[MetadataPairParam]) -> Metadata {
    let mut metadata = Metadata::default();
    for pair in pairs {
        metadata.add(pair.key, pair.value);
    }
    metadata
}

/// Build the concrete [`Property`] for the record at `index` and any inner
/// records it consumes. Returns the property and the index it advanced to.
///
/// The walk runs back-to-front: declaration order comes out of appending
/// each constructed property, and a composite's inner record is the next
/// one visited.
fn construct_property(
    params: &'static [PropertyParams],
    index: usize,
) -> (&'static Property, usize) {
    let param = &params[index];
    let mut index = index;

    let kind = match (&param.extra, param.type_tag) {
        (PropertyExtra::Vector(ops), PropertyType::Vector) => {
            assert!(index > 0, "vector property '{}' has no inner record", param.name);
            index -= 1;
            let (inner, consumed_to) = construct_property(params, index);
            index = consumed_to;
            PropertyKind::Vector { inner, ops: *ops }
        }
        (PropertyExtra::Enum(enum_fn), PropertyType::Enum) => {
            assert!(index > 0, "enum property '{}' has no inner record", param.name);
            index -= 1;
            let (underlying, consumed_to) = construct_property(params, index);
            index = consumed_to;
            PropertyKind::Enum {
                underlying,
                enum_fn: *enum_fn,
            }
        }
        (PropertyExtra::Struct(struct_fn), PropertyType::Struct) => PropertyKind::Struct {
            struct_fn: *struct_fn,
        },
        (PropertyExtra::ObjectClass(_), PropertyType::Object) => PropertyKind::Plain,
        _ => PropertyKind::Plain,
    };

    let property = Box::leak(Box::new(Property::new(
        Name::new(param.name),
        param.type_tag,
        param.offset,
        param.getter,
        param.setter,
        metadata_from_params(param.metadata),
        kind,
    )));

    (property, index)
}

/// Build and attach the property list described by `params` (stored in
/// reverse declaration order) to `owner`.
fn construct_properties(owner: &StructType, params: &'static [PropertyParams]) {
    let mut index = params.len();
    let mut constructed = Vec::new();
    while index > 0 {
        index -= 1;
        let (property, consumed_to) = construct_property(params, index);
        index = consumed_to;
        constructed.push(property);
    }
    for property in constructed {
        owner.add_property(property);
    }
}

fn allocate_struct_object(params: &StructParams) {
    if params.cell.0.get().is_some() {
        return;
    }

    let handle = crate::new_object_of_class(
        STRUCT_CLASS_CELL.get(),
        crate::find_or_create_script_package(params.package_name),
        Name::new(params.name),
        Guid::new(),
        ObjectFlags::empty(),
    );
    let struct_ptr = object_table().resolve(handle) as *mut StructType;
    assert!(!struct_ptr.is_null());

    // SOUND: the object was just created and is not shared until the cell
    // publishes it below.
    let struct_ref: &'static mut StructType = unsafe { &mut *struct_ptr };
    struct_ref.size = params.size;
    struct_ref.align = params.align;
    struct_ref.metadata = metadata_from_params(params.metadata);
    struct_ref.object().add_to_root();

    params.cell.set(struct_ref);
}

fn finalize_struct(params: &StructParams) {
    let struct_ref = params.cell.get();
    if struct_ref.linked_property().is_some() || struct_ref.super_struct().is_some() {
        return;
    }

    construct_properties(struct_ref, params.properties);
    if let Some(super_fn) = params.super_fn {
        struct_ref.set_super_struct(super_fn());
    }
}

fn construct_enum(params: &EnumParams) {
    if params.cell.0.get().is_some() {
        return;
    }

    let handle = crate::new_object_of_class(
        ENUM_CLASS_CELL.get(),
        crate::find_or_create_script_package(params.package_name),
        Name::new(params.name),
        Guid::new(),
        ObjectFlags::empty(),
    );
    let enum_ptr = object_table().resolve(handle) as *mut EnumType;
    assert!(!enum_ptr.is_null());

    // SOUND: the object was just created and is not shared until the cell
    // publishes it below.
    let enum_ref: &'static mut EnumType = unsafe { &mut *enum_ptr };
    enum_ref.metadata = metadata_from_params(params.metadata);
    for entry in params.entries {
        enum_ref.entries.push((Name::new(entry.name), entry.value));
    }
    enum_ref.object().add_to_root();

    params.cell.set(enum_ref);
}

fn allocate_class_object(params: &ClassParams) {
    if params.cell.0.get().is_some() {
        return;
    }

    let handle = crate::new_object_of_class(
        CLASS_CLASS_CELL.get(),
        crate::find_or_create_script_package(params.package_name),
        Name::new(params.name),
        Guid::new(),
        ObjectFlags::empty(),
    );
    let class_ptr = object_table().resolve(handle) as *mut ClassType;
    assert!(!class_ptr.is_null());

    // SOUND: the object was just created and is not shared until the cell
    // publishes it below.
    let class_ref: &'static mut ClassType = unsafe { &mut *class_ptr };
    class_ref.base.size = params.size;
    class_ref.base.align = params.align;
    class_ref.base.metadata = metadata_from_params(params.metadata);
    class_ref.factory = params.factory;
    class_ref.hooks = params.hooks;
    class_ref.object().add_to_root();

    params.cell.set(class_ref);
}

fn finalize_class(params: &ClassParams) {
    let class_ref = params.cell.get();
    if class_ref.linked_property().is_some() || class_ref.super_struct().is_some() {
        return;
    }

    construct_properties(class_ref, params.properties);
    class_ref.set_super_struct((params.super_fn)());
}

/// Create the intrinsic bootstrap classes: `Object`, `Struct`, `Class`,
/// `Enum`, and `Package`. Runs once, before the first flush.
pub(crate) fn bootstrap_intrinsic_classes() {
    use crate::package::Package;
    use crate::reflection::types::IntrinsicClassDesc;

    if CLASS_CLASS_CELL.0.get().is_some() {
        return;
    }

    // The class of classes refers to itself, so it is allocated first with
    // a null class pointer that is patched immediately after.
    let class_class =
        allocate_intrinsic_class(IntrinsicClassDesc::of::<ClassType>(), std::ptr::null());
    // SOUND: just allocated, not yet shared.
    unsafe {
        let object = class_class as *const ClassType as *mut Object;
        patch_object_class(object, class_class);
    }
    CLASS_CLASS_CELL.set(class_class);

    let object_class = allocate_intrinsic_class(IntrinsicClassDesc::of::<Object>(), class_class);
    OBJECT_CLASS_CELL.set(object_class);

    let struct_class =
        allocate_intrinsic_class(IntrinsicClassDesc::of::<StructType>(), class_class);
    STRUCT_CLASS_CELL.set(struct_class);

    let enum_class = allocate_intrinsic_class(IntrinsicClassDesc::of::<EnumType>(), class_class);
    ENUM_CLASS_CELL.set(enum_class);

    let package_class = allocate_intrinsic_class(IntrinsicClassDesc::of::<Package>(), class_class);
    PACKAGE_CLASS_CELL.set(package_class);

    // Intrinsic hierarchy: Class and Struct sit under Object; Class extends
    // Struct so `is_child_of` works across the meta types.
    struct_class.set_super_struct(object_class);
    class_class.set_super_struct(struct_class);
    enum_class.set_super_struct(object_class);
    package_class.set_super_struct(object_class);
    object_class.link();
    struct_class.link();
    class_class.link();
    enum_class.link();
    package_class.link();
}

fn allocate_intrinsic_class(
    desc: crate::reflection::types::IntrinsicClassDesc,
    meta_class: *const ClassType,
) -> &'static ClassType {
    let layout = std::alloc::Layout::from_size_align(
        std::mem::size_of::<ClassType>(),
        std::mem::align_of::<ClassType>().max(16),
    )
    .unwrap();

    // SOUND: the layout is non-zero sized; the memory is zeroed and then
    // fully initialized by the write below before any read.
    let class_ptr = unsafe {
        let mem = std::alloc::alloc_zeroed(layout) as *mut ClassType;
        assert!(!mem.is_null(), "out of memory allocating intrinsic class");
        mem.write(ClassType::default());
        &mut *mem
    };

    class_ptr.base.size = desc.size;
    class_ptr.base.align = desc.align;
    class_ptr.factory = desc.factory;
    class_ptr.hooks = desc.hooks;

    let object = class_ptr.base.object_mut();
    object.init_header(
        meta_class,
        ObjectHandle::NULL,
        Name::new(desc.name),
        Guid::new(),
        ObjectFlags::empty(),
    );

    let handle = object_table().allocate(object as *mut Object);
    object.set_table_index(handle.index);
    crate::object_hash::register_object(object.guid(), object.name(), handle);
    object.add_to_root();

    class_ptr
}

/// Patch an intrinsic object's class pointer after self-referential
/// bootstrap.
///
/// # Safety
///
/// `object` must be exclusively accessed.
unsafe fn patch_object_class(object: *mut Object, class: &'static ClassType) {
    (*object).init_header(
        class,
        ObjectHandle::NULL,
        (*object).name(),
        (*object).guid(),
        (*object).flags(),
    );
}
