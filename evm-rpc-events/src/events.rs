//! ABI bindings for the mev-commit events and their conversion to table rows.

use std::collections::HashMap;

use alloy::{
    hex,
    primitives::B256,
    rpc::types::Log as RpcLog,
    sol,
    sol_types::SolEvent,
};
use common::{
    BlockNum, EventKind,
    arrow::{array::RecordBatch, error::ArrowError},
    tables::{
        LogMeta,
        commit_stores::{CommitStore, CommitStoreRowsBuilder},
        commits_processed::{CommitProcessed, CommitProcessedRowsBuilder},
        encrypted_stores::{EncryptedStore, EncryptedStoreRowsBuilder},
    },
};
use thiserror::Error;

sol! {
    event OpenedCommitmentStored(
        bytes32 indexed commitmentIndex,
        address bidder,
        address committer,
        uint256 bidAmt,
        uint64 blockNumber,
        bytes32 bidHash,
        uint64 decayStartTimeStamp,
        uint64 decayEndTimeStamp,
        string txnHash,
        string revertingTxHashes,
        bytes32 commitmentHash,
        bytes bidSignature,
        bytes commitmentSignature,
        uint64 dispatchTimestamp,
        bytes sharedSecretKey
    );

    event UnopenedCommitmentStored(
        bytes32 indexed commitmentIndex,
        address committer,
        bytes32 commitmentDigest,
        bytes commitmentSignature,
        uint64 dispatchTimestamp
    );

    event CommitmentProcessed(bytes32 indexed commitmentIndex, bool isSlash);
}

#[derive(Error, Debug)]
pub enum ToRowError {
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("failed to decode {event} log")]
    Decode {
        event: EventKind,
        #[source]
        source: alloy::sol_types::Error,
    },
    #[error("failed to build record batch")]
    Arrow(#[from] ArrowError),
}

/// The topic0 of logs for `event`.
pub fn signature_hash(event: EventKind) -> B256 {
    match event {
        EventKind::OpenedCommitmentStored => OpenedCommitmentStored::SIGNATURE_HASH,
        EventKind::UnopenedCommitmentStored => UnopenedCommitmentStored::SIGNATURE_HASH,
        EventKind::CommitmentProcessed => CommitmentProcessed::SIGNATURE_HASH,
    }
}

/// Decodes `logs` of a single event kind into a record batch of the matching table.
///
/// `timestamps` must hold the timestamp of every block a log was emitted in, unless the node
/// already filled in `block_timestamp` on the log.
pub fn logs_to_batch(
    event: EventKind,
    logs: &[RpcLog],
    timestamps: &HashMap<BlockNum, u64>,
) -> Result<RecordBatch, ToRowError> {
    match event {
        EventKind::OpenedCommitmentStored => {
            let mut builder = CommitStoreRowsBuilder::with_capacity(logs.len());
            for log in logs {
                builder.append(&opened_to_row(log, timestamps)?);
            }
            Ok(builder.build()?)
        }
        EventKind::UnopenedCommitmentStored => {
            let mut builder = EncryptedStoreRowsBuilder::with_capacity(logs.len());
            for log in logs {
                builder.append(&unopened_to_row(log, timestamps)?);
            }
            Ok(builder.build()?)
        }
        EventKind::CommitmentProcessed => {
            let mut builder = CommitProcessedRowsBuilder::with_capacity(logs.len());
            for log in logs {
                builder.append(&processed_to_row(log, timestamps)?);
            }
            Ok(builder.build()?)
        }
    }
}

fn decode<E: SolEvent>(event: EventKind, log: &RpcLog) -> Result<E, ToRowError> {
    E::decode_log_data(log.data()).map_err(|source| ToRowError::Decode { event, source })
}

fn log_meta(log: &RpcLog, timestamps: &HashMap<BlockNum, u64>) -> Result<LogMeta, ToRowError> {
    let block_number = log
        .block_number
        .ok_or(ToRowError::Missing("block_number"))?;
    let timestamp = log
        .block_timestamp
        .or_else(|| timestamps.get(&block_number).copied())
        .ok_or(ToRowError::Missing("block_timestamp"))?;
    let hash = log
        .transaction_hash
        .ok_or(ToRowError::Missing("transaction_hash"))?;

    Ok(LogMeta {
        block_number,
        timestamp,
        hash: hex::encode_prefixed(hash),
    })
}

fn opened_to_row(
    log: &RpcLog,
    timestamps: &HashMap<BlockNum, u64>,
) -> Result<CommitStore, ToRowError> {
    let event: OpenedCommitmentStored = decode(EventKind::OpenedCommitmentStored, log)?;
    Ok(CommitStore {
        commitment_index: hex::encode_prefixed(event.commitmentIndex),
        bidder: hex::encode_prefixed(event.bidder),
        commiter: hex::encode_prefixed(event.committer),
        bid: event.bidAmt.to_string(),
        block_number: event.blockNumber,
        bid_hash: hex::encode_prefixed(event.bidHash),
        decay_start_timestamp: event.decayStartTimeStamp,
        decay_end_timestamp: event.decayEndTimeStamp,
        txn_hash: Some(event.txnHash),
        reverting_tx_hashes: Some(event.revertingTxHashes),
        commitment_hash: hex::encode_prefixed(event.commitmentHash),
        bid_signature: hex::encode_prefixed(&event.bidSignature),
        commitment_signature: hex::encode_prefixed(&event.commitmentSignature),
        dispatch_timestamp: event.dispatchTimestamp,
        shared_secret_key: hex::encode_prefixed(&event.sharedSecretKey),
        meta: log_meta(log, timestamps)?,
    })
}

fn unopened_to_row(
    log: &RpcLog,
    timestamps: &HashMap<BlockNum, u64>,
) -> Result<EncryptedStore, ToRowError> {
    let event: UnopenedCommitmentStored = decode(EventKind::UnopenedCommitmentStored, log)?;
    Ok(EncryptedStore {
        commitment_index: hex::encode_prefixed(event.commitmentIndex),
        commiter: hex::encode_prefixed(event.committer),
        commitment_digest: hex::encode_prefixed(event.commitmentDigest),
        commitment_signature: hex::encode_prefixed(&event.commitmentSignature),
        dispatch_timestamp: event.dispatchTimestamp,
        meta: log_meta(log, timestamps)?,
    })
}

fn processed_to_row(
    log: &RpcLog,
    timestamps: &HashMap<BlockNum, u64>,
) -> Result<CommitProcessed, ToRowError> {
    let event: CommitmentProcessed = decode(EventKind::CommitmentProcessed, log)?;
    Ok(CommitProcessed {
        commitment_index: hex::encode_prefixed(event.commitmentIndex),
        is_slash: event.isSlash,
        meta: log_meta(log, timestamps)?,
    })
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, Bytes, Log as PrimitiveLog, LogData, U256};
    use common::arrow::array::AsArray as _;
    use common::arrow::datatypes::UInt64Type;

    use super::*;

    fn rpc_log(data: LogData, block_number: u64, block_timestamp: Option<u64>) -> RpcLog {
        RpcLog {
            inner: PrimitiveLog {
                address: Address::repeat_byte(0xaa),
                data,
            },
            block_hash: Some(B256::repeat_byte(0xbb)),
            block_number: Some(block_number),
            block_timestamp,
            transaction_hash: Some(B256::repeat_byte(0xcc)),
            transaction_index: Some(0),
            log_index: Some(0),
            removed: false,
        }
    }

    #[test]
    fn processed_log_decodes_to_row() {
        //* Given
        let event = CommitmentProcessed {
            commitmentIndex: B256::repeat_byte(0x01),
            isSlash: true,
        };
        let log = rpc_log(event.encode_log_data(), 7, Some(1_700_000_000));

        //* When
        let batch = logs_to_batch(EventKind::CommitmentProcessed, &[log], &HashMap::new())
            .expect("should decode the log");

        //* Then
        assert_eq!(batch.num_rows(), 1);
        let index = batch.column_by_name("commitmentIndex").unwrap().as_string::<i32>();
        assert_eq!(index.value(0), format!("0x{}", "01".repeat(32)));
        let is_slash = batch.column_by_name("isSlash").unwrap().as_boolean();
        assert!(is_slash.value(0));
        let block = batch.column_by_name("block_number").unwrap().as_primitive::<UInt64Type>();
        assert_eq!(block.value(0), 7);
        let hash = batch.column_by_name("hash").unwrap().as_string::<i32>();
        assert_eq!(hash.value(0), format!("0x{}", "cc".repeat(32)));
    }

    #[test]
    fn opened_log_keeps_txn_hash_verbatim_and_bid_as_decimal() {
        //* Given
        let event = OpenedCommitmentStored {
            commitmentIndex: B256::repeat_byte(0x02),
            bidder: Address::repeat_byte(0x03),
            committer: Address::repeat_byte(0x04),
            bidAmt: U256::from(1_000_000_000_000_000_000u128),
            blockNumber: 42,
            bidHash: B256::repeat_byte(0x05),
            decayStartTimeStamp: 10,
            decayEndTimeStamp: 20,
            txnHash: "ab".repeat(32),
            revertingTxHashes: String::new(),
            commitmentHash: B256::repeat_byte(0x06),
            bidSignature: Bytes::from(vec![0x07; 65]),
            commitmentSignature: Bytes::from(vec![0x08; 65]),
            dispatchTimestamp: 15,
            sharedSecretKey: Bytes::from(vec![0x09; 32]),
        };
        let log = rpc_log(event.encode_log_data(), 9, None);
        let timestamps = HashMap::from([(9, 1_700_000_100)]);

        //* When
        let batch = logs_to_batch(EventKind::OpenedCommitmentStored, &[log], &timestamps)
            .expect("should decode the log");

        //* Then
        let txn_hash = batch.column_by_name("txnHash").unwrap().as_string::<i32>();
        assert_eq!(txn_hash.value(0), "ab".repeat(32));
        let bid = batch.column_by_name("bid").unwrap().as_string::<i32>();
        assert_eq!(bid.value(0), "1000000000000000000");
        let target = batch.column_by_name("blockNumber").unwrap().as_primitive::<UInt64Type>();
        assert_eq!(target.value(0), 42);
        let timestamp = batch.column_by_name("timestamp").unwrap().as_primitive::<UInt64Type>();
        assert_eq!(timestamp.value(0), 1_700_000_100);
    }

    #[test]
    fn missing_block_timestamp_is_an_error() {
        //* Given
        let event = UnopenedCommitmentStored {
            commitmentIndex: B256::repeat_byte(0x01),
            committer: Address::repeat_byte(0x02),
            commitmentDigest: B256::repeat_byte(0x03),
            commitmentSignature: Bytes::from(vec![0x04; 65]),
            dispatchTimestamp: 1,
        };
        let log = rpc_log(event.encode_log_data(), 3, None);

        //* When
        let result = logs_to_batch(EventKind::UnopenedCommitmentStored, &[log], &HashMap::new());

        //* Then
        assert!(matches!(
            result,
            Err(ToRowError::Missing("block_timestamp"))
        ));
    }

    #[test]
    fn log_of_another_event_fails_to_decode() {
        //* Given
        let event = CommitmentProcessed {
            commitmentIndex: B256::repeat_byte(0x01),
            isSlash: false,
        };
        let log = rpc_log(event.encode_log_data(), 3, Some(1));

        //* When
        let result = logs_to_batch(EventKind::UnopenedCommitmentStored, &[log], &HashMap::new());

        //* Then
        assert!(matches!(result, Err(ToRowError::Decode { .. })));
    }
}
