//! The tagged property serializer.
//!
//! Property streams are written as `count` followed by `count` records of
//! `tag + payload`. Each tag carries the property's type name, field name,
//! and payload size, which is what buys the format its schema tolerance:
//! readers can skip unknown fields by size, match renamed-away fields by
//! name instead of position, and convert numeric fields whose type changed.

use ember_utils::Name;

use crate::reflection::property::{is_type_name_numeric, read_numeric_value};
use crate::reflection::{Property, StructType};
use crate::serialize::{Archive, Serializable};

/// The fixed-layout record written before every property payload.
#[derive(Debug, Default, Clone)]
pub struct PropertyTag {
    /// On-disk type name, e.g. `Int32Property`.
    pub type_name: Name,
    /// The field name.
    pub name: Name,
    /// Byte count of the payload following the tag.
    pub size: i32,
    /// Stream offset of the payload.
    pub offset: i64,
}

impl Serializable for PropertyTag {
    fn serialize(&mut self, ar: &mut dyn Archive) {
        self.type_name.serialize(ar);
        self.name.serialize(ar);
        self.size.serialize(ar);
        self.offset.serialize(ar);
    }
}

impl StructType {
    /// Write or read the tagged property stream for the instance at `data`.
    ///
    /// # Safety
    ///
    /// `data` must point to a live, exclusively-accessed instance of this
    /// struct's layout. The struct must have been [linked](StructType::link).
    pub unsafe fn serialize_tagged_properties(&self, ar: &mut dyn Archive, data: *mut u8) {
        if ar.is_writing() {
            self.write_tagged_properties(ar, data);
        } else {
            self.read_tagged_properties(ar, data);
        }
    }

    unsafe fn write_tagged_properties(&self, ar: &mut dyn Archive, data: *mut u8) {
        let mut num_properties: u32 = 0;
        let count_pos = ar.tell();
        num_properties.serialize(ar);

        let mut current = self.linked_property();
        while let Some(property) = current {
            let mut tag = PropertyTag {
                type_name: property.type_name(),
                name: property.name(),
                size: 0,
                offset: 0,
            };

            // Write a placeholder tag to measure its size.
            let tag_pos = ar.tell();
            tag.serialize(ar);
            let payload_pos = ar.tell();
            tag.offset = payload_pos as i64;

            property.serialize(ar, property.value_ptr(data));

            let end_pos = ar.tell();
            tag.size = (end_pos - payload_pos) as i32;

            // Go back and rewrite the tag with correct values.
            ar.seek(tag_pos);
            tag.serialize(ar);
            ar.seek(end_pos);

            num_properties += 1;
            current = property.next();
        }

        let end_pos = ar.tell();
        ar.seek(count_pos);
        num_properties.serialize(ar);
        ar.seek(end_pos);
    }

    unsafe fn read_tagged_properties(&self, ar: &mut dyn Archive, data: *mut u8) {
        let mut num_properties: u32 = 0;
        num_properties.serialize(ar);

        let mut current = self.linked_property();
        for _ in 0..num_properties {
            let mut tag = PropertyTag::default();
            tag.serialize(ar);
            if ar.has_error() {
                return;
            }

            let payload_start = ar.tell();

            // Fast path: the stream usually matches declaration order.
            let mut found: Option<&'static Property> = None;
            if let Some(property) = current {
                if property.name() == tag.name {
                    found = Some(property);
                    current = property.next();
                }
            }

            // Order changed; fall back to a name search over the whole list.
            if found.is_none() {
                found = self.find_property(tag.name);
            }

            match found {
                Some(property) if property.type_name() == tag.type_name => {
                    property.serialize(ar, property.value_ptr(data));
                }
                Some(property)
                    if property.type_tag().is_numeric()
                        && is_type_name_numeric(tag.type_name) =>
                {
                    match read_numeric_value(ar, tag.type_name) {
                        Some(old_value) if property.value_fits(old_value) => {
                            property.set_value(data, old_value);
                            tracing::warn!(
                                "property '{}' type changed from '{}' to '{}', converted value to new type",
                                tag.name,
                                tag.type_name,
                                property.type_name()
                            );
                        }
                        Some(_) => {
                            tracing::warn!(
                                "property '{}' type changed from '{}' to '{}', but the value cannot fit in the new type",
                                tag.name,
                                tag.type_name,
                                property.type_name()
                            );
                        }
                        None => {
                            tracing::error!(
                                "failed to read numeric value for property '{}'",
                                tag.name
                            );
                        }
                    }
                }
                Some(property) => {
                    tracing::warn!(
                        "property '{}' type changed incompatibly from '{}' to '{}', skipping",
                        tag.name,
                        tag.type_name,
                        property.type_name()
                    );
                }
                None => {
                    tracing::warn!(
                        "property '{}' of type '{}' not found in struct '{}', skipping",
                        tag.name,
                        tag.type_name,
                        self.name()
                    );
                }
            }

            // Always realign past this property's payload so the stream
            // survives skipped or short-read fields.
            ar.seek(payload_start + tag.size as u64);
        }
    }
}
