//! The joined commitments view.
//!
//! This table is never stored: it is recomputed from the three event tables on every sync
//! cycle. Columns read back from the store are nullable, so every field here is too.

use std::sync::{Arc, LazyLock};

use crate::arrow::datatypes::{DataType, Field, Schema, SchemaRef};

pub const TABLE_NAME: &str = "commitments";

/// `block_number` of the `encrypted_stores` row, renamed in the view.
pub const ENCRYPTED_BLOCK_NUM: &str = "block_number_encrypted";

/// Output columns, in order.
pub const COLUMNS: [&str; 18] = [
    ENCRYPTED_BLOCK_NUM,
    "timestamp",
    "txnHash",
    "bid",
    "commiter",
    "bidder",
    "isSlash",
    "decayStartTimeStamp",
    "decayEndTimeStamp",
    "dispatchTimestamp",
    "commitmentHash",
    "commitmentIndex",
    "commitmentDigest",
    "commitmentSignature",
    "revertingTxHashes",
    "bidHash",
    "bidSignature",
    "sharedSecretKey",
];

pub static SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| Arc::new(schema()));

fn schema() -> Schema {
    let fields = COLUMNS.iter().map(|&name| {
        let data_type = match name {
            ENCRYPTED_BLOCK_NUM
            | "timestamp"
            | "decayStartTimeStamp"
            | "decayEndTimeStamp"
            | "dispatchTimestamp" => DataType::UInt64,
            "isSlash" => DataType::Boolean,
            _ => DataType::Utf8,
        };
        Field::new(name, data_type, true)
    });
    Schema::new(fields.collect::<Vec<_>>())
}

#[test]
fn schema_follows_column_order() {
    let names: Vec<_> = SCHEMA.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, COLUMNS);
    assert_eq!(
        SCHEMA.field_with_name("isSlash").unwrap().data_type(),
        &DataType::Boolean
    );
}
