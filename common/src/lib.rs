pub mod logging;
pub mod registry;
pub mod tables;

pub use datafusion::arrow;
pub use datafusion::parquet;

use std::future::Future;

use arrow::array::RecordBatch;

pub use self::registry::{EventKind, EventRegistry, TableDef};

/// The block number column name carried by every event table.
pub const BLOCK_NUM: &str = "block_number";

/// The key correlating rows across the event tables.
pub const COMMITMENT_INDEX: &str = "commitmentIndex";

pub type BlockNum = u64;
pub type BoxError = Box<dyn std::error::Error + Sync + Send + 'static>;

/// Errors returned by an [`EventSource`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The source has no events for the table at or after `from_block`.
    ///
    /// This is not a failure: callers treat it as an empty batch.
    #[error("no data for table {table} from block {from_block}")]
    NoData { table: String, from_block: BlockNum },

    /// Any other failure of the underlying source.
    #[error("event source failed for table {table}")]
    Source {
        table: String,
        #[source]
        source: BoxError,
    },
}

impl FetchError {
    pub fn source_failed(table: &TableDef, err: impl Into<BoxError>) -> Self {
        Self::Source {
            table: table.name.clone(),
            source: err.into(),
        }
    }
}

/// A source of decoded contract events, one table at a time.
pub trait EventSource: Send + Sync {
    /// Fetch every event for `table` emitted at or after `from_block`.
    ///
    /// The returned batch has the schema of `table`.
    fn fetch(
        &self,
        table: &TableDef,
        from_block: BlockNum,
    ) -> impl Future<Output = Result<RecordBatch, FetchError>> + Send;
}
