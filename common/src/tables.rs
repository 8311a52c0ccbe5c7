pub mod commit_stores;
pub mod commitments;
pub mod commits_processed;
pub mod encrypted_stores;

use std::sync::Arc;

use crate::{
    BLOCK_NUM, BlockNum,
    arrow::{
        array::{ArrayRef, StringBuilder, UInt64Builder},
        datatypes::{DataType, Field},
    },
};

/// Log metadata appended to every decoded event row.
#[derive(Clone, Debug, Default)]
pub struct LogMeta {
    pub block_number: BlockNum,
    /// Block timestamp in seconds.
    pub timestamp: u64,
    /// Transaction hash, `0x`-prefixed.
    pub hash: String,
}

pub(crate) fn log_meta_fields() -> [Field; 3] {
    [
        Field::new(BLOCK_NUM, DataType::UInt64, false),
        Field::new("timestamp", DataType::UInt64, false),
        Field::new("hash", DataType::Utf8, false),
    ]
}

#[derive(Debug)]
pub(crate) struct LogMetaBuilder {
    block_number: UInt64Builder,
    timestamp: UInt64Builder,
    hash: StringBuilder,
}

impl LogMetaBuilder {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            block_number: UInt64Builder::with_capacity(capacity),
            timestamp: UInt64Builder::with_capacity(capacity),
            hash: StringBuilder::with_capacity(capacity, capacity * 66),
        }
    }

    pub(crate) fn append(&mut self, meta: &LogMeta) {
        self.block_number.append_value(meta.block_number);
        self.timestamp.append_value(meta.timestamp);
        self.hash.append_value(&meta.hash);
    }

    pub(crate) fn finish(mut self) -> [ArrayRef; 3] {
        [
            Arc::new(self.block_number.finish()),
            Arc::new(self.timestamp.finish()),
            Arc::new(self.hash.finish()),
        ]
    }
}
