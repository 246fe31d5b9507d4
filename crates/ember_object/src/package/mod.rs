//! The binary package container.
//!
//! A package is a named object that owns an import table (references to
//! objects in other packages, by GUID), an export table (objects defined
//! here), and an optional thumbnail. On disk the layout is:
//!
//! ```text
//! [ PackageHeader                                      ] fixed
//! [ ImportTable: ImportCount x { GUID }                ]
//! [ ExportTable: ExportCount x { GUID, Name, Class,
//!                                Offset, Size }        ]
//! [ ObjectData : concatenated per-export payloads      ]
//! [ Thumbnail  : optional { width, height, RGBA8 }     ]
//! ```
//!
//! Loading creates uninitialized object shells flagged
//! [`NEEDS_LOAD`][ObjectFlags::NEEDS_LOAD]; property data streams in
//! lazily, one export at a time.

mod archiver;
mod thumbnail;

pub use archiver::*;
pub use thumbnail::*;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};

use anyhow::Context;
use ember_utils::{paths, Guid, Name};

use crate::flags::ObjectFlags;
use crate::handle::{ObjectHandle, ObjectPtr, ObjectRef, WeakObjectRef};
use crate::object::{Object, ObjectType};
use crate::serialize::{Archive, MemoryReader, MemoryWriter, Serializable};
use crate::table::object_table;

/// Magic value identifying a package file.
pub const PACKAGE_FILE_TAG: u32 = 0x9E2A_83C1;

/// Current package file format version.
pub const PACKAGE_FILE_VERSION: i32 = 1;

/// Package file extension (without the dot).
pub const PACKAGE_EXTENSION: &str = "lasset";

/// Errors produced by package parsing and loading.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// The file did not start with [`PACKAGE_FILE_TAG`].
    #[error("file tag {found:#010x} does not match the package tag {PACKAGE_FILE_TAG:#010x}")]
    InvalidTag {
        /// The tag that was found instead.
        found: u32,
    },
    /// The file's tables could not be read.
    #[error("package tables are corrupted")]
    Corrupt,
    /// No export matched the request.
    #[error("export not found in package")]
    ExportNotFound,
}

/// The fixed file header.
#[derive(Debug, Default, Clone)]
pub struct PackageHeader {
    /// Magic tag; must equal [`PACKAGE_FILE_TAG`].
    pub tag: u32,
    /// File format version.
    pub version: i32,
    /// Byte offset of the import table.
    pub import_table_offset: i64,
    /// Number of import entries.
    pub import_count: i32,
    /// Byte offset of the export table.
    pub export_table_offset: i64,
    /// Number of export entries.
    pub export_count: u32,
    /// Byte offset of the object data block.
    pub object_data_offset: i64,
    /// Byte offset of the thumbnail, or `0` when absent.
    pub thumbnail_offset: i64,
}

impl Serializable for PackageHeader {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        self.tag.serialize(ar);
        self.version.serialize(ar);
        self.import_table_offset.serialize(ar);
        self.import_count.serialize(ar);
        self.export_table_offset.serialize(ar);
        self.export_count.serialize(ar);
        self.object_data_offset.serialize(ar);
        self.thumbnail_offset.serialize(ar);
    }
}

/// One object defined by this package.
#[derive(Debug, Default)]
pub struct ObjectExport {
    /// The object's GUID.
    pub guid: Guid,
    /// The object's name.
    pub name: Name,
    /// The object's class name.
    pub class_name: Name,
    /// Byte offset of the serialized payload.
    pub offset: i64,
    /// Byte size of the serialized payload.
    pub size: i64,
    /// The loaded object, when resident. Not serialized.
    pub object: WeakObjectRef,
}

impl Serializable for ObjectExport {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        self.guid.serialize(ar);
        self.name.serialize(ar);
        self.class_name.serialize(ar);
        self.offset.serialize(ar);
        self.size.serialize(ar);
    }
}

/// One object referenced by this package but owned by another.
#[derive(Debug, Default)]
pub struct ObjectImport {
    /// The referenced object's GUID.
    pub guid: Guid,
    /// The resolved object, when resident. Not serialized.
    pub object: WeakObjectRef,
}

impl Serializable for ObjectImport {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        self.guid.serialize(ar);
    }
}

/// A package-local object reference: `0` is null, `+i` is export `i - 1`,
/// `-i` is import `i - 1`.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PackageIndex(i32);

impl PackageIndex {
    /// The null reference.
    pub const NULL: PackageIndex = PackageIndex(0);

    /// Build from a raw signed value.
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Reference to export table entry `index`.
    pub fn from_export(index: usize) -> Self {
        Self(index as i32 + 1)
    }

    /// Reference to import table entry `index`.
    pub fn from_import(index: usize) -> Self {
        Self(-(index as i32 + 1))
    }

    /// Whether this is the null reference.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Whether this references the import table.
    pub fn is_import(&self) -> bool {
        self.0 < 0
    }

    /// Whether this references the export table.
    pub fn is_export(&self) -> bool {
        self.0 > 0
    }

    /// The raw signed value.
    pub fn raw(&self) -> i32 {
        self.0
    }

    /// The table array index, or [`None`] for the null reference.
    pub fn array_index(&self) -> Option<usize> {
        if self.is_null() {
            None
        } else {
            Some((self.0.unsigned_abs() - 1) as usize)
        }
    }
}

impl Serializable for PackageIndex {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        self.0.serialize(ar);
    }
}

/// The raw file contents a loaded package keeps around for lazy per-export
/// deserialization.
#[derive(Debug, Default)]
pub struct PackageBlob {
    /// The full package file bytes.
    pub bytes: Vec<u8>,
    /// Where the bytes came from.
    pub disk_path: PathBuf,
}

/// A named container of reflected objects. See the [module docs](self).
#[repr(C)]
#[derive(Default)]
pub struct Package {
    base: Object,
    dirty: AtomicBool,
    import_table: Vec<ObjectImport>,
    export_table: Vec<ObjectExport>,
    loader: Option<PackageBlob>,
    thumbnail: Option<PackageThumbnail>,
}

// SOUND: `Package` is `#[repr(C)]` with `Object` first, and its class is
// populated by the intrinsic bootstrap.
unsafe impl ObjectType for Package {
    const TYPE_NAME: &'static str = "Package";

    fn static_class() -> &'static crate::reflection::ClassType {
        crate::reflection::PACKAGE_CLASS_CELL.get()
    }
}

impl Package {
    /// The package's name (its virtual path without extension).
    pub fn name(&self) -> Name {
        self.object().name()
    }

    /// The import table.
    pub fn imports(&self) -> &[ObjectImport] {
        &self.import_table
    }

    /// The export table.
    pub fn exports(&self) -> &[ObjectExport] {
        &self.export_table
    }

    /// The thumbnail, if one is attached.
    pub fn thumbnail(&self) -> Option<&PackageThumbnail> {
        self.thumbnail.as_ref()
    }

    /// Attach (or replace) the thumbnail and mark the package dirty.
    pub fn set_thumbnail(&mut self, thumbnail: Option<PackageThumbnail>) {
        self.thumbnail = thumbnail;
        self.mark_dirty();
    }

    /// Mark the package as having unsaved changes.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, SeqCst);
    }

    /// Clear the unsaved-changes mark.
    pub fn clear_dirty(&self) {
        self.dirty.store(false, SeqCst);
    }

    /// Whether the package has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(SeqCst)
    }

    /// The package filename, e.g. `Foo.lasset`.
    pub fn filename(&self) -> String {
        format!(
            "{}.{}",
            paths::file_stem(self.name().as_str()),
            PACKAGE_EXTENSION
        )
    }

    /// Resolve a package-local reference against the tables.
    ///
    /// Exports resolve to their (possibly still unloaded) shells; imports
    /// resolve through the object hashes and, when not resident, the
    /// installed load hook.
    pub fn index_to_object(&self, index: PackageIndex) -> Option<ObjectRef> {
        let array_index = index.array_index()?;
        if index.is_export() {
            self.export_table.get(array_index)?.object.pin()
        } else {
            let guid = self.import_table.get(array_index)?.guid;
            crate::load_object(&guid)
        }
    }

    /// The package-local reference for a live object, or null when the
    /// object is in neither table.
    pub fn index_for_object(&self, object: &Object) -> PackageIndex {
        let guid = object.guid();
        if let Some(i) = self.export_table.iter().position(|e| e.guid == guid) {
            return PackageIndex::from_export(i);
        }
        if let Some(i) = self.import_table.iter().position(|e| e.guid == guid) {
            return PackageIndex::from_import(i);
        }
        PackageIndex::NULL
    }

    /// Find a (possibly unloaded) export by name.
    pub fn find_object_in_package(&self, name: Name) -> Option<ObjectRef> {
        self.export_table
            .iter()
            .find(|e| e.name == name)?
            .object
            .pin()
    }

    /// Deserialize the export identified by `guid` into its shell.
    ///
    /// Seeks to the export's payload, streams the tagged properties in,
    /// clears [`NEEDS_LOAD`][ObjectFlags::NEEDS_LOAD], and sets
    /// [`NEEDS_POST_LOAD`][ObjectFlags::NEEDS_POST_LOAD]. A no-op when the
    /// object is already loaded.
    pub fn load_object(&self, guid: &Guid) -> Option<ObjectRef> {
        let export_index = self.export_table.iter().position(|e| e.guid == *guid)?;
        self.load_export(export_index)
    }

    /// Deserialize the export named `name` (see
    /// [`load_object`][Self::load_object]).
    pub fn load_object_by_name(&self, name: Name) -> Option<ObjectRef> {
        let export_index = self.export_table.iter().position(|e| e.name == name)?;
        self.load_export(export_index)
    }

    fn load_export(&self, export_index: usize) -> Option<ObjectRef> {
        let export = self.export_table.get(export_index)?;
        let object_ref = export.object.pin()?;
        let object = object_ref.get()?;

        if !object.has_any_flags(ObjectFlags::NEEDS_LOAD) {
            return Some(object_ref);
        }
        object.set_flags(ObjectFlags::LOADING);

        let blob = self.loader.as_ref()?;
        let offset = export.offset;
        let class = object.class();
        let object_ptr = object_ref.as_ptr();
        let package_handle = self.object().handle();

        {
            let mut reader = MemoryReader::new(&blob.bytes);
            reader.seek(offset as u64);
            let mut loader = PackageLoader::new(reader, package_handle);
            // SOUND: the shell was constructed through this class's factory
            // and is only reachable through this package while NEEDS_LOAD is
            // set.
            unsafe {
                class.serialize_tagged_properties(&mut loader, object_ptr as *mut u8);
            }
            if loader.has_error() {
                tracing::error!(
                    "failed to deserialize export '{}' from package '{}'",
                    self.export_table[export_index].name,
                    self.name()
                );
            }
        }

        let object = object_ref.get()?;
        object.clear_flags(ObjectFlags::NEEDS_LOAD | ObjectFlags::LOADING);
        object.set_flags(ObjectFlags::NEEDS_POST_LOAD);
        Some(object_ref)
    }

    /// Load every export in this package. Returns `false` when any export
    /// failed to produce an object.
    #[must_use]
    pub fn fully_load(&self) -> bool {
        let mut all_loaded = true;
        for index in 0..self.export_table.len() {
            if self.load_export(index).is_none() {
                all_loaded = false;
            }
        }
        all_loaded
    }

    /// Run `post_load` on every export that is waiting for it.
    pub fn post_load_all(&self) {
        for export in &self.export_table {
            let Some(object_ref) = export.object.pin() else {
                continue;
            };
            let Some(object) = object_ref.get() else {
                continue;
            };
            if object.has_any_flags(ObjectFlags::NEEDS_POST_LOAD) {
                object.clear_flags(ObjectFlags::NEEDS_POST_LOAD);
                let class = object.class();
                // SOUND: post-load runs after deserialization completes and
                // before the object is handed to other systems.
                unsafe {
                    (class.hooks().post_load)(object_ref.as_ptr());
                }
            }
        }
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.name())
            .field("imports", &self.import_table.len())
            .field("exports", &self.export_table.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

/// Normalize any package path (virtual or on-disk, with or without the
/// extension) into the package's canonical name.
pub fn package_name_for_path(path: &str) -> Name {
    let normalized = paths::normalize(path);
    let virtual_path = paths::to_virtual(std::path::Path::new(&normalized))
        .unwrap_or(normalized);
    let without_ext = match virtual_path.rfind('.') {
        Some(dot) if virtual_path[dot + 1..] == *PACKAGE_EXTENSION => &virtual_path[..dot],
        _ => &virtual_path[..],
    };
    Name::new(without_ext)
}

/// The on-disk path for a package path, resolving virtual prefixes and
/// appending the extension when missing.
pub fn package_disk_path(path: &str) -> PathBuf {
    let normalized = paths::normalize(path);
    let with_ext = if paths::extension(&normalized) == Some(PACKAGE_EXTENSION) {
        normalized
    } else {
        format!("{normalized}.{PACKAGE_EXTENSION}")
    };
    paths::resolve_virtual(&with_ext).unwrap_or_else(|| PathBuf::from(with_ext))
}

/// Find the package object for `name`, creating a fresh rooted one when it
/// does not exist yet.
pub(crate) fn find_or_create_package(name: &str) -> ObjectHandle {
    let package_name = Name::new(name);
    if let Some(existing) =
        crate::object_hash::find_object_handle_by_name(package_name, Some(Package::static_class()))
    {
        return existing;
    }
    let package = crate::new_object::<Package>(
        ObjectHandle::NULL,
        package_name,
        Guid::new(),
        ObjectFlags::empty(),
    );
    let handle = package.handle();
    if let Some(object) = package.untyped().get() {
        object.add_to_root();
    }
    handle
}

/// Create (or find) the package for `path`.
pub fn create_package(path: &str) -> ObjectPtr<Package> {
    let handle = find_or_create_package(package_name_for_path(path).as_str());
    // SOUND: `find_or_create_package` only ever returns `Package` objects.
    unsafe { ObjectPtr::from_handle_unchecked(handle) }
}

/// Find the package for `path` if it exists.
pub fn find_package_by_path(path: &str) -> Option<ObjectPtr<Package>> {
    let handle = crate::object_hash::find_object_handle_by_name(
        package_name_for_path(path),
        Some(Package::static_class()),
    )?;
    // SOUND: the lookup filtered on the `Package` class.
    Some(unsafe { ObjectPtr::from_handle_unchecked(handle) })
}

/// Rename a package, keeping the object name and lookup hashes coherent.
pub fn rename_package(old_path: &str, new_path: &str) {
    let Some(package) = find_package_by_path(old_path) else {
        tracing::warn!("cannot rename unknown package '{old_path}'");
        return;
    };
    crate::rename_object(package.handle(), package_name_for_path(new_path));
}

/// Destroy a package and every export shell it created.
pub fn destroy_package(path: &str) -> bool {
    let Some(package) = find_package_by_path(path) else {
        return false;
    };

    let export_handles: Vec<ObjectHandle> = match package.get() {
        Some(p) => p.export_table.iter().map(|e| e.object.handle()).collect(),
        None => return false,
    };
    for handle in export_handles {
        // SOUND: destroying exports during package teardown; the caller
        // owns the package graph at this point.
        unsafe {
            crate::conditional_begin_destroy(handle);
        }
    }

    if let Some(object) = package.untyped().get() {
        object.remove_from_root();
    }
    // SOUND: see above.
    unsafe { crate::conditional_begin_destroy(package.handle()) }
}

/// Parse just the header and export table from package file bytes.
///
/// This is the cheap path the asset registry uses during discovery; no
/// objects are created.
pub fn read_package_summary(bytes: &[u8]) -> Result<(PackageHeader, Vec<ObjectExport>), PackageError> {
    let mut reader = MemoryReader::new(bytes);
    let mut header = PackageHeader::default();
    header.serialize(&mut reader);

    if header.tag != PACKAGE_FILE_TAG {
        return Err(PackageError::InvalidTag { found: header.tag });
    }

    reader.seek(header.export_table_offset as u64);
    let mut exports: Vec<ObjectExport> = Vec::new();
    exports.serialize(&mut reader);
    if reader.has_error() {
        return Err(PackageError::Corrupt);
    }

    Ok((header, exports))
}

/// Pick the primary asset from an export list: the export whose name
/// matches the package's file stem, or — recovering from an external
/// rename — the first export whose class is marked as an asset class.
///
/// Returns the export index and whether recovery (a rename) is required.
pub fn find_primary_export(exports: &[ObjectExport], file_stem: Name) -> Option<(usize, bool)> {
    if let Some(index) = exports.iter().position(|e| e.name == file_stem) {
        return Some((index, false));
    }
    exports
        .iter()
        .position(|e| {
            crate::reflection::find_class(e.class_name)
                .is_some_and(|class| class.metadata().has("Asset"))
        })
        .map(|index| (index, true))
}

/// Load a package: parse the header and tables, then create uninitialized
/// shells for every export. Payload data is not touched; objects stream in
/// lazily through [`Package::load_object`].
///
/// Calling this twice for the same package returns the already-loaded
/// package unchanged.
pub fn load_package(path: &str) -> anyhow::Result<ObjectPtr<Package>> {
    let mut package = create_package(path);
    if package.get().is_some_and(|p| p.loader.is_some()) {
        return Ok(package);
    }

    let disk_path = package_disk_path(path);
    let bytes = std::fs::read(&disk_path)
        .with_context(|| format!("could not read package file {disk_path:?}"))?;
    let (header, mut exports) = read_package_summary(&bytes)
        .with_context(|| format!("could not parse package file {disk_path:?}"))?;

    let mut imports: Vec<ObjectImport> = Vec::new();
    {
        let mut reader = MemoryReader::new(&bytes);
        reader.seek(header.import_table_offset as u64);
        imports.serialize(&mut reader);
        if reader.has_error() {
            anyhow::bail!("could not parse import table of {disk_path:?}");
        }
    }

    let package_handle = package.handle();

    // Create shells for every export.
    for export in &mut exports {
        if let Some(existing) = crate::object_hash::find_object_handle_by_guid(&export.guid) {
            export.object = WeakObjectRef::from_handle(existing);
            continue;
        }
        let Some(class) = crate::reflection::find_class(export.class_name) else {
            tracing::error!(
                "package '{path}' exports '{}' of unknown class '{}'",
                export.name,
                export.class_name
            );
            continue;
        };
        let handle = crate::new_object_of_class(
            class,
            package_handle,
            export.name,
            export.guid,
            ObjectFlags::NEEDS_LOAD | ObjectFlags::WAS_LOADED | ObjectFlags::PUBLIC,
        );
        export.object = WeakObjectRef::from_handle(handle);
    }

    // Primary-asset recovery: the file may have been renamed externally.
    let stem = Name::new(paths::file_stem(&paths::normalize(path)));
    match find_primary_export(&exports, stem) {
        Some((index, true)) => {
            let export = &mut exports[index];
            tracing::warn!(
                "package '{path}' has no export named '{stem}'; renaming primary asset '{}'",
                export.name
            );
            crate::rename_object(export.object.handle(), stem);
            export.name = stem;
        }
        Some((_, false)) => {}
        None => {
            tracing::error!("package '{path}' has no recoverable primary asset");
        }
    }

    // SOUND: the package object was just created or re-fetched and is not
    // concurrently mutated; package loads are single-threaded per package.
    unsafe {
        if let Some(p) = package.get_mut() {
            p.import_table = imports;
            p.export_table = exports;
            p.loader = Some(PackageBlob {
                bytes,
                disk_path,
            });
        }
    }

    Ok(package)
}

/// Save a package and everything it exports to `path`.
///
/// Walks the object graph to build the export and import tables, writes
/// placeholder header/tables, streams each export's tagged properties,
/// appends the thumbnail, then back-patches the real offsets.
pub fn save_package(package: &mut ObjectPtr<Package>, path: &str) -> anyhow::Result<()> {
    let package_handle = package.handle();
    let context = SaveContext::build(package_handle);

    let mut writer = MemoryWriter::new();
    let mut header = PackageHeader {
        tag: PACKAGE_FILE_TAG,
        version: PACKAGE_FILE_VERSION,
        ..Default::default()
    };
    header.serialize(&mut writer);

    // Import table.
    header.import_table_offset = writer.tell() as i64;
    header.import_count = context.imports.len() as i32;
    let mut imports: Vec<ObjectImport> = context
        .imports
        .iter()
        .map(|&guid| ObjectImport {
            guid,
            object: WeakObjectRef::null(),
        })
        .collect();
    imports.serialize(&mut writer);

    // Export table with placeholder offsets.
    header.export_table_offset = writer.tell() as i64;
    header.export_count = context.exports.len() as u32;
    let mut exports: Vec<ObjectExport> = Vec::with_capacity(context.exports.len());
    for &handle in &context.exports {
        let object = object_table().resolve(handle);
        assert!(!object.is_null());
        // SOUND: the save context only holds live handles, and saving does
        // not run concurrently with mutation of the same package graph.
        let object = unsafe { &*object };
        exports.push(ObjectExport {
            guid: object.guid(),
            name: object.name(),
            class_name: object.class().name(),
            offset: 0,
            size: 0,
            object: WeakObjectRef::from_handle(handle),
        });
    }
    exports.serialize(&mut writer);

    // Object data, one tagged stream per export.
    header.object_data_offset = writer.tell() as i64;
    {
        let mut saver = PackageSaver::new(&mut writer, &context);
        for (index, &handle) in context.exports.iter().enumerate() {
            let object = object_table().resolve(handle);
            // SOUND: see above.
            let object = unsafe { &*object };
            let start = saver.tell();
            // SOUND: the pointer is live and the class describes its layout.
            unsafe {
                object
                    .class()
                    .serialize_tagged_properties(&mut saver, object as *const Object as *mut u8);
            }
            exports[index].offset = start as i64;
            exports[index].size = (saver.tell() - start) as i64;
        }
        if saver.has_error() {
            anyhow::bail!("failed to serialize package '{path}'");
        }
    }

    // Thumbnail.
    if let Some(mut thumbnail) = package.get().and_then(|p| p.thumbnail.clone()) {
        header.thumbnail_offset = writer.tell() as i64;
        thumbnail.serialize(&mut writer);
    }

    // Back-patch the export table and header now that offsets are known.
    let end = writer.tell();
    writer.seek(header.export_table_offset as u64);
    exports.serialize(&mut writer);
    writer.seek(0);
    header.serialize(&mut writer);
    writer.seek(end);

    let disk_path = package_disk_path(path);
    if let Some(parent) = disk_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("could not create directory {parent:?}"))?;
    }
    let bytes = writer.into_bytes();
    std::fs::write(&disk_path, &bytes)
        .with_context(|| format!("could not write package file {disk_path:?}"))?;

    // SOUND: saving is single-threaded per package.
    unsafe {
        if let Some(p) = package.get_mut() {
            p.import_table = imports;
            p.export_table = exports;
            p.loader = Some(PackageBlob { bytes, disk_path });
            p.clear_dirty();
        }
    }

    Ok(())
}
