use std::collections::{BTreeSet, HashMap};

use alloy::{
    eips::BlockNumberOrTag,
    primitives::Address,
    providers::{Provider as _, RootProvider},
    rpc::types::{Filter, Log as RpcLog},
};
use common::{BlockNum, EventSource, FetchError, TableDef, arrow::array::RecordBatch};

use crate::{EvmRpcConfig, events};

/// Fetches contract events through `eth_getLogs`.
#[derive(Clone)]
pub struct RpcEventSource {
    client: RootProvider,
    contract: Address,
    max_block_range: u64,
}

impl RpcEventSource {
    pub fn new(config: &EvmRpcConfig) -> Self {
        let client = RootProvider::new_http(config.url.clone());
        Self {
            client,
            contract: config.contract_address,
            max_block_range: config.max_block_range.max(1),
        }
    }

    /// Fetch all logs of `table`'s event from `from_block` to `to_block`, one window of at most
    /// `max_block_range` blocks at a time.
    async fn logs_in_range(
        &self,
        table: &TableDef,
        from_block: BlockNum,
        to_block: BlockNum,
    ) -> Result<Vec<RpcLog>, FetchError> {
        let topic0 = events::signature_hash(table.event);
        let mut logs = Vec::new();
        for (start, end) in block_windows(from_block, to_block, self.max_block_range) {
            let filter = Filter::new()
                .address(self.contract)
                .event_signature(topic0)
                .from_block(start)
                .to_block(end);
            let chunk = self
                .client
                .get_logs(&filter)
                .await
                .map_err(|err| FetchError::source_failed(table, err))?;
            tracing::debug!(
                table = %table.name,
                start,
                end,
                logs = chunk.len(),
                "fetched log window"
            );
            logs.extend(chunk);
        }
        Ok(logs)
    }

    /// Block timestamps for logs the node returned without one.
    async fn missing_timestamps(
        &self,
        table: &TableDef,
        logs: &[RpcLog],
    ) -> Result<HashMap<BlockNum, u64>, FetchError> {
        let blocks: BTreeSet<BlockNum> = logs
            .iter()
            .filter(|log| log.block_timestamp.is_none())
            .filter_map(|log| log.block_number)
            .collect();

        let mut timestamps = HashMap::with_capacity(blocks.len());
        for number in blocks {
            let block = self
                .client
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .await
                .map_err(|err| FetchError::source_failed(table, err))?
                .ok_or_else(|| {
                    FetchError::source_failed(table, format!("block {number} not found"))
                })?;
            timestamps.insert(number, block.header.timestamp);
        }
        Ok(timestamps)
    }
}

impl EventSource for RpcEventSource {
    #[tracing::instrument(skip_all, fields(table = %table.name, from_block = from_block))]
    async fn fetch(&self, table: &TableDef, from_block: BlockNum) -> Result<RecordBatch, FetchError> {
        let no_data = || FetchError::NoData {
            table: table.name.clone(),
            from_block,
        };

        let head = self
            .client
            .get_block_number()
            .await
            .map_err(|err| FetchError::source_failed(table, err))?;
        if from_block > head {
            return Err(no_data());
        }

        let logs = self.logs_in_range(table, from_block, head).await?;
        if logs.is_empty() {
            return Err(no_data());
        }

        let timestamps = self.missing_timestamps(table, &logs).await?;
        events::logs_to_batch(table.event, &logs, &timestamps)
            .map_err(|err| FetchError::source_failed(table, err))
    }
}

/// Splits `from..=to` into inclusive windows of at most `max_range` blocks.
fn block_windows(from: BlockNum, to: BlockNum, max_range: u64) -> Vec<(BlockNum, BlockNum)> {
    let mut windows = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(max_range - 1).min(to);
        windows.push((start, end));
        if end == to {
            break;
        }
        start = end + 1;
    }
    windows
}
