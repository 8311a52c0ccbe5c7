use std::sync::{Arc, LazyLock};

use super::{LogMeta, LogMetaBuilder, log_meta_fields};
use crate::{
    COMMITMENT_INDEX,
    arrow::{
        array::{ArrayRef, BooleanBuilder, RecordBatch, StringBuilder},
        datatypes::{DataType, Field, Schema, SchemaRef},
        error::ArrowError,
    },
};

pub const TABLE_NAME: &str = "commits_processed";

pub static SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| Arc::new(schema()));

/// Prefer using the pre-computed SCHEMA
fn schema() -> Schema {
    let mut fields = vec![
        Field::new(COMMITMENT_INDEX, DataType::Utf8, false),
        Field::new("isSlash", DataType::Boolean, false),
    ];
    fields.extend(log_meta_fields());
    Schema::new(fields)
}

/// A `CommitmentProcessed` event: the oracle settled the commitment, either rewarding or
/// slashing the provider.
#[derive(Clone, Debug, Default)]
pub struct CommitProcessed {
    pub commitment_index: String,
    pub is_slash: bool,
    pub meta: LogMeta,
}

#[derive(Debug)]
pub struct CommitProcessedRowsBuilder {
    commitment_index: StringBuilder,
    is_slash: BooleanBuilder,
    meta: LogMetaBuilder,
}

impl CommitProcessedRowsBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commitment_index: StringBuilder::with_capacity(capacity, capacity * 66),
            is_slash: BooleanBuilder::with_capacity(capacity),
            meta: LogMetaBuilder::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, row: &CommitProcessed) {
        self.commitment_index.append_value(&row.commitment_index);
        self.is_slash.append_value(row.is_slash);
        self.meta.append(&row.meta);
    }

    pub fn build(self) -> Result<RecordBatch, ArrowError> {
        let Self {
            mut commitment_index,
            mut is_slash,
            meta,
        } = self;

        let mut columns = vec![
            Arc::new(commitment_index.finish()) as ArrayRef,
            Arc::new(is_slash.finish()),
        ];
        columns.extend(meta.finish());

        RecordBatch::try_new(SCHEMA.clone(), columns)
    }
}

#[test]
fn default_to_arrow() {
    let row = CommitProcessed::default();
    let rows = {
        let mut builder = CommitProcessedRowsBuilder::with_capacity(1);
        builder.append(&row);
        builder.build().unwrap()
    };
    assert_eq!(rows.num_columns(), 5);
    assert_eq!(rows.num_rows(), 1);
}
