//! Proxy archivers that teach plain archives how to serialize object
//! references.
//!
//! Inside a package graph references travel as [`PackageIndex`] values
//! (exports positive, imports negative); outside one, the generic
//! [`ObjectArchiver`] writes bare GUIDs and resolves them through the
//! object hashes and the installed load hook.

use ember_utils::{Guid, HashMap};

use crate::flags::ObjectFlags;
use crate::handle::{ObjectHandle, ObjectRef};
use crate::object::Object;
use crate::package::{Package, PackageIndex};
use crate::reflection::{PropertyType, StructType};
use crate::serialize::{Archive, MemoryReader, MemoryWriter, Serializable};
use crate::table::object_table;

/// Everything a package save needs to know about the object graph: which
/// objects are exports, and which outside objects they reference
/// (imports).
pub struct SaveContext {
    /// The package being saved.
    pub package: ObjectHandle,
    /// Export handles, in table order.
    pub exports: Vec<ObjectHandle>,
    /// Imported GUIDs, in first-reference order.
    pub imports: Vec<Guid>,
    export_index: HashMap<Guid, usize>,
    import_index: HashMap<Guid, usize>,
}

impl SaveContext {
    /// Walk the object table and the export property graphs to build the
    /// save context for `package`.
    pub fn build(package: ObjectHandle) -> SaveContext {
        let mut context = SaveContext {
            package,
            exports: Vec::new(),
            imports: Vec::new(),
            export_index: HashMap::default(),
            import_index: HashMap::default(),
        };

        // Exports: every non-transient object that lives in this package.
        object_table().for_each_object(|object, index| {
            // SOUND: the visitor runs while the caller owns the save
            // operation; objects are not destroyed concurrently.
            let object = unsafe { &*object };
            if object.package_handle() == package
                && !object.has_any_flags(ObjectFlags::TRANSIENT | ObjectFlags::DEFAULT_OBJECT)
            {
                let handle = object_table().handle_for_index(index as i32);
                context.export_index.insert(object.guid(), context.exports.len());
                context.exports.push(handle);
            }
        });

        // Imports: every distinct outside object referenced by an export.
        let exports = context.exports.clone();
        for handle in exports {
            let object = object_table().resolve(handle);
            if object.is_null() {
                continue;
            }
            // SOUND: see above.
            let object = unsafe { &*object };
            let class = object.class();
            // SOUND: the class describes this object's layout.
            unsafe {
                collect_object_refs(class, object as *const Object as *mut u8, &mut |target| {
                    context.note_reference(target);
                });
            }
        }

        context
    }

    fn note_reference(&mut self, target: ObjectHandle) {
        let object = object_table().resolve(target);
        if object.is_null() {
            return;
        }
        // SOUND: just resolved against the current generation.
        let object = unsafe { &*object };
        if object.package_handle() == self.package {
            return;
        }
        let guid = object.guid();
        if !self.import_index.contains_key(&guid) {
            self.import_index.insert(guid, self.imports.len());
            self.imports.push(guid);
        }
    }

    /// The package-local reference for `guid`, or null (with a warning)
    /// when the object is in neither table.
    pub fn index_for_guid(&self, guid: &Guid) -> PackageIndex {
        if let Some(&i) = self.export_index.get(guid) {
            return PackageIndex::from_export(i);
        }
        if let Some(&i) = self.import_index.get(guid) {
            return PackageIndex::from_import(i);
        }
        PackageIndex::NULL
    }
}

/// Visit every object reference reachable through `struct_type`'s
/// properties on the instance at `container`.
///
/// # Safety
///
/// `container` must point to a live instance of `struct_type`'s layout.
pub(crate) unsafe fn collect_object_refs(
    struct_type: &StructType,
    container: *mut u8,
    visit: &mut dyn FnMut(ObjectHandle),
) {
    for property in struct_type.properties() {
        let value_ptr = property.value_ptr(container);
        match property.type_tag() {
            PropertyType::Object => {
                let object_ref = &*(value_ptr as *const ObjectRef);
                if !object_ref.is_null() {
                    visit(object_ref.handle());
                }
            }
            PropertyType::Struct => {
                if let Some(inner) = property.as_struct() {
                    collect_object_refs(inner, value_ptr, visit);
                }
            }
            PropertyType::Vector => {
                let Some(inner) = property.vector_inner() else {
                    continue;
                };
                match inner.type_tag() {
                    PropertyType::Object => {
                        for i in 0..property.vector_len(value_ptr) {
                            let element = property.vector_at(value_ptr, i);
                            let object_ref = &*(element as *const ObjectRef);
                            if !object_ref.is_null() {
                                visit(object_ref.handle());
                            }
                        }
                    }
                    PropertyType::Struct => {
                        if let Some(inner_struct) = inner.as_struct() {
                            for i in 0..property.vector_len(value_ptr) {
                                let element = property.vector_at(value_ptr, i);
                                collect_object_refs(inner_struct, element, visit);
                            }
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

/// Write-mode proxy archive used by package saves: object references
/// become [`PackageIndex`] values against the save context.
pub struct PackageSaver<'a> {
    writer: &'a mut MemoryWriter,
    context: &'a SaveContext,
}

impl<'a> PackageSaver<'a> {
    /// Wrap `writer` with reference resolution against `context`.
    pub fn new(writer: &'a mut MemoryWriter, context: &'a SaveContext) -> Self {
        Self { writer, context }
    }
}

impl Archive for PackageSaver<'_> {
    fn is_reading(&self) -> bool {
        false
    }

    fn tell(&self) -> u64 {
        self.writer.tell()
    }

    fn seek(&mut self, pos: u64) {
        self.writer.seek(pos);
    }

    fn total_size(&self) -> u64 {
        self.writer.total_size()
    }

    fn serialize(&mut self, data: &mut [u8]) {
        self.writer.serialize(data);
    }

    fn has_error(&self) -> bool {
        self.writer.has_error()
    }

    fn set_error(&mut self) {
        self.writer.set_error();
    }

    fn serialize_object_ref(&mut self, value: &mut ObjectRef) {
        let mut index = PackageIndex::NULL;
        if let Some(object) = value.get() {
            index = self.context.index_for_guid(&object.guid());
            if index.is_null() {
                tracing::warn!(
                    "object '{}' is referenced but neither exported nor imported; writing null",
                    object.name()
                );
            }
        }
        index.serialize(self);
    }
}

/// Read-mode proxy archive used by package loads: object references are
/// read as [`PackageIndex`] values and resolved through the package's
/// tables.
pub struct PackageLoader<'a> {
    reader: MemoryReader<'a>,
    package: ObjectHandle,
}

impl<'a> PackageLoader<'a> {
    /// Wrap `reader` with reference resolution against the package behind
    /// `package`.
    pub fn new(reader: MemoryReader<'a>, package: ObjectHandle) -> Self {
        Self { reader, package }
    }
}

impl Archive for PackageLoader<'_> {
    fn is_reading(&self) -> bool {
        true
    }

    fn tell(&self) -> u64 {
        self.reader.tell()
    }

    fn seek(&mut self, pos: u64) {
        self.reader.seek(pos);
    }

    fn total_size(&self) -> u64 {
        self.reader.total_size()
    }

    fn serialize(&mut self, data: &mut [u8]) {
        self.reader.serialize(data);
    }

    fn has_error(&self) -> bool {
        self.reader.has_error()
    }

    fn set_error(&mut self) {
        self.reader.set_error();
    }

    fn serialize_object_ref(&mut self, value: &mut ObjectRef) {
        let mut index = PackageIndex::NULL;
        index.serialize(self);

        let package = object_table().resolve(self.package);
        if package.is_null() {
            *value = ObjectRef::null();
            return;
        }
        // SOUND: export deserialization holds no live `&mut Package`; the
        // package's tables are only read here.
        let package = unsafe { &*(package as *const Package) };
        *value = package.index_to_object(index).unwrap_or_else(ObjectRef::null);
    }
}

/// Generic proxy archive: object references are serialized as bare GUIDs
/// and resolved through [`find_object`][crate::find_object] and the
/// installed load hook.
pub struct ObjectArchiver<'a> {
    inner: &'a mut dyn Archive,
}

impl<'a> ObjectArchiver<'a> {
    /// Wrap any archive with GUID-based object reference support.
    pub fn new(inner: &'a mut dyn Archive) -> Self {
        Self { inner }
    }
}

impl Archive for ObjectArchiver<'_> {
    fn is_reading(&self) -> bool {
        self.inner.is_reading()
    }

    fn tell(&self) -> u64 {
        self.inner.tell()
    }

    fn seek(&mut self, pos: u64) {
        self.inner.seek(pos);
    }

    fn total_size(&self) -> u64 {
        self.inner.total_size()
    }

    fn serialize(&mut self, data: &mut [u8]) {
        self.inner.serialize(data);
    }

    fn has_error(&self) -> bool {
        self.inner.has_error()
    }

    fn set_error(&mut self) {
        self.inner.set_error();
    }

    fn serialize_object_ref(&mut self, value: &mut ObjectRef) {
        if self.is_writing() {
            let mut guid = value.get().map(|o| o.guid()).unwrap_or(Guid::NIL);
            guid.serialize(self);
        } else {
            let mut guid = Guid::NIL;
            guid.serialize(self);
            *value = if guid.is_nil() {
                ObjectRef::null()
            } else {
                crate::load_object(&guid).unwrap_or_else(ObjectRef::null)
            };
        }
    }
}
