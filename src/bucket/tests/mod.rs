mod concurrent;
mod recovery;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    error::Result,
    schema::{FieldType, FieldValue, Schema},
    store::StoreConfig,
    Error,
};

use super::Recordable;

/// Store tuning small enough to exercise growth and eviction in tests.
pub(super) fn small_store_config() -> StoreConfig {
    StoreConfig {
        initial_size: 4096,
        page_size: 1024,
        max_resident_pages: 8,
        hot_tail_count: 2,
    }
}

/// Minimal two-field record: one primitive, one string.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct Pair {
    pub i: i32,
    pub s: String,
}

impl Recordable for Pair {
    fn schema() -> Schema {
        Schema::sorted_by_name(vec![
            ("i".to_string(), FieldType::Int32),
            ("s".to_string(), FieldType::String),
        ])
        .expect("schema should build")
    }

    fn to_values(&self) -> Vec<FieldValue> {
        vec![FieldValue::Int32(self.i), FieldValue::String(self.s.clone())]
    }

    fn from_values(values: Vec<FieldValue>) -> Result<Self> {
        match <[FieldValue; 2]>::try_from(values) {
            Ok([FieldValue::Int32(i), FieldValue::String(s)]) => Ok(Self { i, s }),
            other => Err(Error::Corruption {
                reason: format!("slot decoded to unexpected values: {other:?}"),
            }),
        }
    }
}

/// One field of every supported type.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct Sample {
    pub active: bool,
    pub at: DateTime<Utc>,
    pub comment: String,
    pub id: i64,
    pub label: String,
    pub score: f64,
    pub tag: Uuid,
    pub took: Duration,
}

impl Sample {
    pub fn numbered(id: i64) -> Self {
        Self {
            active: id % 2 == 0,
            at: DateTime::from_timestamp(1_700_000_000 + id, 500_000_000)
                .expect("timestamp is representable"),
            comment: format!("comment-{id}"),
            id,
            label: format!("label-{id}"),
            score: id as f64 / 2.0,
            tag: Uuid::from_u128(id as u128),
            took: Duration::milliseconds(id),
        }
    }
}

impl Recordable for Sample {
    fn schema() -> Schema {
        Schema::sorted_by_name(vec![
            ("active".to_string(), FieldType::Boolean),
            ("at".to_string(), FieldType::DateTime),
            ("comment".to_string(), FieldType::String),
            ("id".to_string(), FieldType::Int64),
            ("label".to_string(), FieldType::String),
            ("score".to_string(), FieldType::Double),
            ("tag".to_string(), FieldType::Guid),
            ("took".to_string(), FieldType::TimeSpan),
        ])
        .expect("schema should build")
    }

    fn to_values(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Boolean(self.active),
            FieldValue::DateTime(self.at),
            FieldValue::String(self.comment.clone()),
            FieldValue::Int64(self.id),
            FieldValue::String(self.label.clone()),
            FieldValue::Double(self.score),
            FieldValue::Guid(self.tag),
            FieldValue::TimeSpan(self.took),
        ]
    }

    fn from_values(values: Vec<FieldValue>) -> Result<Self> {
        match <[FieldValue; 8]>::try_from(values) {
            Ok(
                [FieldValue::Boolean(active), FieldValue::DateTime(at), FieldValue::String(comment), FieldValue::Int64(id), FieldValue::String(label), FieldValue::Double(score), FieldValue::Guid(tag), FieldValue::TimeSpan(took)],
            ) => Ok(Self {
                active,
                at,
                comment,
                id,
                label,
                score,
                tag,
                took,
            }),
            other => Err(Error::Corruption {
                reason: format!("slot decoded to unexpected values: {other:?}"),
            }),
        }
    }
}
