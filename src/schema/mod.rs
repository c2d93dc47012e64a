//! Dataset schemas and slot layout.
//!
//! A [`Schema`] is an ordered list of named, typed fields frozen at dataset
//! creation. Field order is what gives every record a computable slot
//! layout: the typed bucket sorts fields by name, the dynamic bucket keeps
//! the declaration order of its descriptor. Once a dataset has been written
//! its schema is immutable.
//!
//! Slot widths per field type:
//!
//!   Int32/Single           4 bytes
//!   Int64/Double           8 bytes
//!   Boolean                1 byte (0/1)
//!   DateTime/TimeSpan      8 bytes (ticks, 100 ns units)
//!   Guid                   16 bytes (RFC 4122 big-endian)
//!   String                 12 bytes (i64 heap offset + i32 length)
//!   FixedSizeByteArray(n)  n bytes, zero-padded at the tail

mod value;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{error::Result, Error};

pub use self::value::{DynamicRecord, FieldValue};

/// Width of an encoded string handle inside a slot.
pub(crate) const STRING_HANDLE_WIDTH: usize = 12;

/// Concrete type of one schema field, with fixed-array lengths resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Int32,
    Int64,
    Single,
    Double,
    Boolean,
    DateTime,
    TimeSpan,
    Guid,
    String,
    FixedBytes(u32),
}

impl FieldType {
    /// Number of slot bytes this type occupies.
    pub fn slot_width(&self) -> usize {
        match self {
            FieldType::Int32 | FieldType::Single => 4,
            FieldType::Int64 | FieldType::Double => 8,
            FieldType::Boolean => 1,
            FieldType::DateTime | FieldType::TimeSpan => 8,
            FieldType::Guid => 16,
            FieldType::String => STRING_HANDLE_WIDTH,
            FieldType::FixedBytes(n) => *n as usize,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            FieldType::Int32 => "Int32",
            FieldType::Int64 => "Int64",
            FieldType::Single => "Single",
            FieldType::Double => "Double",
            FieldType::Boolean => "Boolean",
            FieldType::DateTime => "DateTime",
            FieldType::TimeSpan => "TimeSpan",
            FieldType::Guid => "Guid",
            FieldType::String => "String",
            FieldType::FixedBytes(_) => "FixedSizeByteArray",
        }
    }
}

/// One frozen field: name, type, and precomputed slot offset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    name: String,
    ty: FieldType,
    offset: usize,
}

impl FieldDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> FieldType {
        self.ty
    }

    /// Byte offset of this field inside a slot.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Frozen, ordered field list with a computed slot layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldDef>,
    slot_size: usize,
    string_field_count: usize,
}

impl Schema {
    /// Builds a schema with fields sorted by name; this is the field order
    /// of the typed bucket.
    pub fn sorted_by_name(mut fields: Vec<(String, FieldType)>) -> Result<Self> {
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        Self::freeze(fields)
    }

    /// Builds a schema keeping declaration order; this is the field order of
    /// the dynamic bucket.
    pub fn declared(fields: Vec<(String, FieldType)>) -> Result<Self> {
        Self::freeze(fields)
    }

    fn freeze(fields: Vec<(String, FieldType)>) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::Schema {
                reason: "a schema requires at least one field".to_string(),
            });
        }

        let mut defs = Vec::with_capacity(fields.len());
        let mut offset = 0usize;
        let mut string_field_count = 0usize;
        for (name, ty) in fields {
            if defs.iter().any(|d: &FieldDef| d.name == name) {
                return Err(Error::Schema {
                    reason: format!("duplicate field name '{name}'"),
                });
            }
            if let FieldType::FixedBytes(0) = ty {
                return Err(Error::Schema {
                    reason: format!("fixed-size byte array '{name}' must have a non-zero length"),
                });
            }
            if ty == FieldType::String {
                string_field_count += 1;
            }
            let width = ty.slot_width();
            defs.push(FieldDef { name, ty, offset });
            offset += width;
        }

        Ok(Self {
            fields: defs,
            slot_size: offset,
            string_field_count,
        })
    }

    /// Fields in slot order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Total encoded width of one record.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of `String` fields per record.
    pub(crate) fn string_field_count(&self) -> usize {
        self.string_field_count
    }

    pub(crate) fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Field kind as it appears in a runtime descriptor, before fixed-array
/// lengths are resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Int32,
    Int64,
    Single,
    Double,
    Boolean,
    DateTime,
    TimeSpan,
    Guid,
    String,
    FixedSizeByteArray,
}

/// Runtime schema descriptor for the dynamic bucket.
///
/// Fields keep their declaration order. Fixed-size byte arrays declare
/// their lengths through `fixed_array_lengths`; a missing length fails the
/// build with `Schema`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    fields: Vec<(String, FieldKind)>,
    fixed_array_lengths: HashMap<String, u32>,
}

impl SchemaDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field in declaration order.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push((name.into(), kind));
        self
    }

    /// Declares the byte length of a fixed-size byte array field.
    pub fn fixed_array_length(mut self, name: impl Into<String>, len: u32) -> Self {
        self.fixed_array_lengths.insert(name.into(), len);
        self
    }

    /// Resolves the descriptor into a frozen [`Schema`].
    ///
    /// # Errors
    ///
    /// Returns `Schema` for an empty field list, duplicate names, or a
    /// fixed-size byte array without a declared length.
    pub fn build(self) -> Result<Schema> {
        let mut resolved = Vec::with_capacity(self.fields.len());
        for (name, kind) in self.fields {
            let ty = match kind {
                FieldKind::Int32 => FieldType::Int32,
                FieldKind::Int64 => FieldType::Int64,
                FieldKind::Single => FieldType::Single,
                FieldKind::Double => FieldType::Double,
                FieldKind::Boolean => FieldType::Boolean,
                FieldKind::DateTime => FieldType::DateTime,
                FieldKind::TimeSpan => FieldType::TimeSpan,
                FieldKind::Guid => FieldType::Guid,
                FieldKind::String => FieldType::String,
                FieldKind::FixedSizeByteArray => {
                    let len = self.fixed_array_lengths.get(&name).copied().ok_or_else(|| {
                        Error::Schema {
                            reason: format!("fixed-size byte array '{name}' has no declared length"),
                        }
                    })?;
                    FieldType::FixedBytes(len)
                }
            };
            resolved.push((name, ty));
        }
        Schema::declared(resolved)
    }
}
