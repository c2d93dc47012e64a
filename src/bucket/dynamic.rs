//! Bucket over runtime-described records.

use std::path::Path;

use async_stream::try_stream;
use futures::Stream;

use crate::{
    error::Result,
    schema::{DynamicRecord, FieldValue, Schema, SchemaDescriptor},
    store::StoreConfig,
    Error,
};

use super::{BucketCore, RecordStore};

/// Append-only bucket whose schema is supplied at runtime.
///
/// Identical protocol to [`RecordBucket`](super::RecordBucket), but records
/// are [`DynamicRecord`] property bags checked against a
/// [`SchemaDescriptor`] instead of a compile-time schema. Field order is
/// the descriptor's declaration order.
pub struct DynamicRecordBucket {
    core: BucketCore,
}

impl DynamicRecordBucket {
    /// Opens (or creates) the bucket with the given descriptor.
    ///
    /// # Errors
    ///
    /// Returns `Schema` when the descriptor is invalid, `Corruption` on a
    /// torn append, and `Io` for file or lock failures.
    pub fn open(
        descriptor: SchemaDescriptor,
        structure_path: &Path,
        string_path: &Path,
        config: StoreConfig,
    ) -> Result<Self> {
        Ok(Self {
            core: BucketCore::open(descriptor.build()?, structure_path, string_path, config)?,
        })
    }

    /// The resolved schema, in declaration order.
    pub fn schema(&self) -> &Schema {
        self.core.schema()
    }

    /// Lazily yields every archived record in index order.
    pub fn as_enumerable(
        &self,
        page_size: usize,
    ) -> impl Stream<Item = Result<DynamicRecord>> + '_ {
        try_stream! {
            let total = self.count();
            let page = page_size.max(1);
            let mut index = 0;
            while index < total {
                let span = page.min(total - index);
                let records = self.read_bulk(index, span)?;
                for record in records {
                    yield record;
                }
                index += span;
            }
        }
    }

    /// Orders a record's properties into a schema-shaped row. Both a
    /// property the schema does not know and a field the record does not
    /// carry are schema violations.
    fn record_to_row(&self, record: &DynamicRecord) -> Result<Vec<FieldValue>> {
        let schema = self.core.schema();
        for name in record.property_names() {
            if schema.field_index(name).is_none() {
                return Err(Error::Schema {
                    reason: format!("record carries unknown field '{name}'"),
                });
            }
        }

        schema
            .fields()
            .iter()
            .map(|field| {
                record.get(field.name()).cloned().ok_or_else(|| Error::Schema {
                    reason: format!("record is missing a value for field '{}'", field.name()),
                })
            })
            .collect()
    }

    fn row_to_record(&self, row: Vec<FieldValue>) -> DynamicRecord {
        self.core
            .schema()
            .fields()
            .iter()
            .zip(row)
            .fold(DynamicRecord::new(), |record, (field, value)| {
                record.set(field.name().to_string(), value)
            })
    }
}

impl RecordStore<DynamicRecord> for DynamicRecordBucket {
    fn count(&self) -> usize {
        self.core.count()
    }

    fn add(&self, records: Vec<DynamicRecord>) -> Result<()> {
        let rows = records
            .iter()
            .map(|record| self.record_to_row(record))
            .collect::<Result<Vec<_>>>()?;
        self.core.add_rows(rows)
    }

    fn read(&self, index: usize) -> Result<DynamicRecord> {
        let mut rows = self.core.read_rows(index, 1)?;
        Ok(self.row_to_record(rows.pop().expect("read_rows returned one row")))
    }

    fn read_bulk(&self, index: usize, count: usize) -> Result<Vec<DynamicRecord>> {
        Ok(self
            .core
            .read_rows(index, count)?
            .into_iter()
            .map(|row| self.row_to_record(row))
            .collect())
    }

    fn sync(&self) -> Result<()> {
        self.core.sync()
    }

    fn delete(&self) -> Result<()> {
        self.core.delete()
    }

    fn output_statistics(&self) -> String {
        self.core.output_statistics()
    }
}
