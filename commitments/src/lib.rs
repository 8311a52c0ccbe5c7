//! Keeps a local DuckDB copy of the mev-commit commitment events and joins them into a
//! commitments view on every poll.

pub mod config;
pub mod export;
pub mod join;
pub mod poll;
pub mod storage;
pub mod sync;

use std::future::Future;

use common::EventRegistry;
use evm_rpc_events::RpcEventSource;
use tracing::info;

use self::{
    config::Config,
    poll::Poller,
    storage::{RetryPolicy, Storage},
    sync::{SyncError, Syncer},
};

/// Polls the configured RPC endpoint until `shutdown` resolves or a cycle fails.
///
/// Returns the number of completed cycles.
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> Result<usize, SyncError> {
    let storage = Storage::new(&config.db_path, RetryPolicy::from(&config.retry));
    let source = RpcEventSource::new(&config.rpc);
    let registry = EventRegistry::mev_commit();
    let tables: Vec<_> = registry.names().collect();
    info!(?tables, "syncing event tables");
    let mut syncer = Syncer::new(source, storage, registry);
    if let Some(path) = &config.output.parquet_path {
        syncer = syncer.with_parquet_export(path);
    }

    info!(
        db = %config.db_path.display(),
        rpc = %config.rpc.url,
        contract = %config.rpc.contract_address,
        "starting commitments poller"
    );

    Poller::new(config.poll_interval_secs.into())
        .run(|| syncer.run_cycle(), shutdown)
        .await
}
