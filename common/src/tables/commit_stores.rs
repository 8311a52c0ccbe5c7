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

pub const TABLE_NAME: &str = "commit_stores";

pub static SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| Arc::new(schema()));

/// Prefer using the pre-computed SCHEMA
fn schema() -> Schema {
    let mut fields = vec![
        Field::new(COMMITMENT_INDEX, DataType::Utf8, false),
        Field::new("bidder", DataType::Utf8, false),
        Field::new("commiter", DataType::Utf8, false),
        // uint256 as a decimal string
        Field::new("bid", DataType::Utf8, false),
        Field::new("blockNumber", DataType::UInt64, false),
        Field::new("bidHash", DataType::Utf8, false),
        Field::new("decayStartTimeStamp", DataType::UInt64, false),
        Field::new("decayEndTimeStamp", DataType::UInt64, false),
        Field::new("txnHash", DataType::Utf8, true),
        Field::new("revertingTxHashes", DataType::Utf8, true),
        Field::new("commitmentHash", DataType::Utf8, false),
        Field::new("bidSignature", DataType::Utf8, false),
        Field::new("commitmentSignature", DataType::Utf8, false),
        Field::new("dispatchTimestamp", DataType::UInt64, false),
        Field::new("sharedSecretKey", DataType::Utf8, false),
    ];
    fields.extend(log_meta_fields());
    Schema::new(fields)
}

/// An `OpenedCommitmentStored` event: the revealed bid matching a stored commitment.
#[derive(Clone, Debug, Default)]
pub struct CommitStore {
    pub commitment_index: String,
    pub bidder: String,
    pub commiter: String,
    pub bid: String,
    /// Target L1 block of the bid, not the block the event was emitted in.
    pub block_number: u64,
    pub bid_hash: String,
    pub decay_start_timestamp: u64,
    pub decay_end_timestamp: u64,
    /// Transaction hash as submitted by the bidder, usually without `0x`.
    pub txn_hash: Option<String>,
    pub reverting_tx_hashes: Option<String>,
    pub commitment_hash: String,
    pub bid_signature: String,
    pub commitment_signature: String,
    pub dispatch_timestamp: u64,
    pub shared_secret_key: String,
    pub meta: LogMeta,
}

#[derive(Debug)]
pub struct CommitStoreRowsBuilder {
    commitment_index: StringBuilder,
    bidder: StringBuilder,
    commiter: StringBuilder,
    bid: StringBuilder,
    block_number: UInt64Builder,
    bid_hash: StringBuilder,
    decay_start_timestamp: UInt64Builder,
    decay_end_timestamp: UInt64Builder,
    txn_hash: StringBuilder,
    reverting_tx_hashes: StringBuilder,
    commitment_hash: StringBuilder,
    bid_signature: StringBuilder,
    commitment_signature: StringBuilder,
    dispatch_timestamp: UInt64Builder,
    shared_secret_key: StringBuilder,
    meta: LogMetaBuilder,
}

impl CommitStoreRowsBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commitment_index: StringBuilder::with_capacity(capacity, capacity * 66),
            bidder: StringBuilder::with_capacity(capacity, capacity * 42),
            commiter: StringBuilder::with_capacity(capacity, capacity * 42),
            bid: StringBuilder::with_capacity(capacity, capacity * 20),
            block_number: UInt64Builder::with_capacity(capacity),
            bid_hash: StringBuilder::with_capacity(capacity, capacity * 66),
            decay_start_timestamp: UInt64Builder::with_capacity(capacity),
            decay_end_timestamp: UInt64Builder::with_capacity(capacity),
            txn_hash: StringBuilder::with_capacity(capacity, capacity * 64),
            reverting_tx_hashes: StringBuilder::with_capacity(capacity, 0),
            commitment_hash: StringBuilder::with_capacity(capacity, capacity * 66),
            bid_signature: StringBuilder::with_capacity(capacity, capacity * 132),
            commitment_signature: StringBuilder::with_capacity(capacity, capacity * 132),
            dispatch_timestamp: UInt64Builder::with_capacity(capacity),
            shared_secret_key: StringBuilder::with_capacity(capacity, capacity * 66),
            meta: LogMetaBuilder::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, row: &CommitStore) {
        let CommitStore {
            commitment_index,
            bidder,
            commiter,
            bid,
            block_number,
            bid_hash,
            decay_start_timestamp,
            decay_end_timestamp,
            txn_hash,
            reverting_tx_hashes,
            commitment_hash,
            bid_signature,
            commitment_signature,
            dispatch_timestamp,
            shared_secret_key,
            meta,
        } = row;

        self.commitment_index.append_value(commitment_index);
        self.bidder.append_value(bidder);
        self.commiter.append_value(commiter);
        self.bid.append_value(bid);
        self.block_number.append_value(*block_number);
        self.bid_hash.append_value(bid_hash);
        self.decay_start_timestamp
            .append_value(*decay_start_timestamp);
        self.decay_end_timestamp.append_value(*decay_end_timestamp);
        self.txn_hash.append_option(txn_hash.as_deref());
        self.reverting_tx_hashes
            .append_option(reverting_tx_hashes.as_deref());
        self.commitment_hash.append_value(commitment_hash);
        self.bid_signature.append_value(bid_signature);
        self.commitment_signature.append_value(commitment_signature);
        self.dispatch_timestamp.append_value(*dispatch_timestamp);
        self.shared_secret_key.append_value(shared_secret_key);
        self.meta.append(meta);
    }

    pub fn build(self) -> Result<RecordBatch, ArrowError> {
        let Self {
            mut commitment_index,
            mut bidder,
            mut commiter,
            mut bid,
            mut block_number,
            mut bid_hash,
            mut decay_start_timestamp,
            mut decay_end_timestamp,
            mut txn_hash,
            mut reverting_tx_hashes,
            mut commitment_hash,
            mut bid_signature,
            mut commitment_signature,
            mut dispatch_timestamp,
            mut shared_secret_key,
            meta,
        } = self;

        let mut columns = vec![
            Arc::new(commitment_index.finish()) as ArrayRef,
            Arc::new(bidder.finish()),
            Arc::new(commiter.finish()),
            Arc::new(bid.finish()),
            Arc::new(block_number.finish()),
            Arc::new(bid_hash.finish()),
            Arc::new(decay_start_timestamp.finish()),
            Arc::new(decay_end_timestamp.finish()),
            Arc::new(txn_hash.finish()),
            Arc::new(reverting_tx_hashes.finish()),
            Arc::new(commitment_hash.finish()),
            Arc::new(bid_signature.finish()),
            Arc::new(commitment_signature.finish()),
            Arc::new(dispatch_timestamp.finish()),
            Arc::new(shared_secret_key.finish()),
        ];
        columns.extend(meta.finish());

        RecordBatch::try_new(SCHEMA.clone(), columns)
    }
}

#[test]
fn default_to_arrow() {
    let row = CommitStore::default();
    let rows = {
        let mut builder = CommitStoreRowsBuilder::with_capacity(1);
        builder.append(&row);
        builder.build().unwrap()
    };
    assert_eq!(rows.num_columns(), 18);
    assert_eq!(rows.num_rows(), 1);
}
