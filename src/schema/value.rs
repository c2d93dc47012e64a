//! Runtime record values for the dynamic bucket.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// One field value, tagged by scalar kind.
///
/// `Null` is accepted for `String` fields at encode time and collapses to
/// the empty handle; no other field type accepts it.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    TimeSpan(Duration),
    Guid(Uuid),
    String(String),
    Bytes(Vec<u8>),
    Null,
}

impl FieldValue {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Int32(_) => "Int32",
            FieldValue::Int64(_) => "Int64",
            FieldValue::Single(_) => "Single",
            FieldValue::Double(_) => "Double",
            FieldValue::Boolean(_) => "Boolean",
            FieldValue::DateTime(_) => "DateTime",
            FieldValue::TimeSpan(_) => "TimeSpan",
            FieldValue::Guid(_) => "Guid",
            FieldValue::String(_) => "String",
            FieldValue::Bytes(_) => "FixedSizeByteArray",
            FieldValue::Null => "Null",
        }
    }
}

/// Schema-less record: a property bag keyed by field name.
///
/// The bucket's descriptor decides which properties exist and how they are
/// laid out; a record carrying a property the descriptor does not know is
/// rejected at encode time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DynamicRecord {
    properties: BTreeMap<String, FieldValue>,
}

impl DynamicRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, replacing any previous value.
    pub fn set(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.properties.get(name)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
