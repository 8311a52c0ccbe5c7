use std::sync::{Arc, LazyLock};

use super::{LogMeta, LogMetaBuilder, log_meta_fields};
use crate::{
    COMMITMENT_INDEX,
    arrow::{
        array::{ArrayRef, RecordBatch, StringBuilder, UInt64Builder},
        datatypes::{DataType, Field, Schema, SchemaRef},
        error::ArrowError,
    },
};

pub const TABLE_NAME: &str = "encrypted_stores";

pub static SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| Arc::new(schema()));

/// Prefer using the pre-computed SCHEMA
fn schema() -> Schema {
    let mut fields = vec![
        Field::new(COMMITMENT_INDEX, DataType::Utf8, false),
        Field::new("commiter", DataType::Utf8, false),
        Field::new("commitmentDigest", DataType::Utf8, false),
        Field::new("commitmentSignature", DataType::Utf8, false),
        Field::new("dispatchTimestamp", DataType::UInt64, false),
    ];
    fields.extend(log_meta_fields());
    Schema::new(fields)
}

/// An `UnopenedCommitmentStored` event: the provider's commitment before the bid is revealed.
#[derive(Clone, Debug, Default)]
pub struct EncryptedStore {
    pub commitment_index: String,
    pub commiter: String,
    pub commitment_digest: String,
    pub commitment_signature: String,
    pub dispatch_timestamp: u64,
    pub meta: LogMeta,
}

#[derive(Debug)]
pub struct EncryptedStoreRowsBuilder {
    commitment_index: StringBuilder,
    commiter: StringBuilder,
    commitment_digest: StringBuilder,
    commitment_signature: StringBuilder,
    dispatch_timestamp: UInt64Builder,
    meta: LogMetaBuilder,
}

impl EncryptedStoreRowsBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commitment_index: StringBuilder::with_capacity(capacity, capacity * 66),
            commiter: StringBuilder::with_capacity(capacity, capacity * 42),
            commitment_digest: StringBuilder::with_capacity(capacity, capacity * 66),
            commitment_signature: StringBuilder::with_capacity(capacity, capacity * 132),
            dispatch_timestamp: UInt64Builder::with_capacity(capacity),
            meta: LogMetaBuilder::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, row: &EncryptedStore) {
        let EncryptedStore {
            commitment_index,
            commiter,
            commitment_digest,
            commitment_signature,
            dispatch_timestamp,
            meta,
        } = row;

        self.commitment_index.append_value(commitment_index);
        self.commiter.append_value(commiter);
        self.commitment_digest.append_value(commitment_digest);
        self.commitment_signature.append_value(commitment_signature);
        self.dispatch_timestamp.append_value(*dispatch_timestamp);
        self.meta.append(meta);
    }

    pub fn build(self) -> Result<RecordBatch, ArrowError> {
        let Self {
            mut commitment_index,
            mut commiter,
            mut commitment_digest,
            mut commitment_signature,
            mut dispatch_timestamp,
            meta,
        } = self;

        let mut columns = vec![
            Arc::new(commitment_index.finish()) as ArrayRef,
            Arc::new(commiter.finish()),
            Arc::new(commitment_digest.finish()),
            Arc::new(commitment_signature.finish()),
            Arc::new(dispatch_timestamp.finish()),
        ];
        columns.extend(meta.finish());

        RecordBatch::try_new(SCHEMA.clone(), columns)
    }
}

#[test]
fn default_to_arrow() {
    let row = EncryptedStore::default();
    let rows = {
        let mut builder = EncryptedStoreRowsBuilder::with_capacity(1);
        builder.append(&row);
        builder.build().unwrap()
    };
    assert_eq!(rows.num_columns(), 8);
    assert_eq!(rows.num_rows(), 1);
}
