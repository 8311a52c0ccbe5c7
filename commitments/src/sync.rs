//! One sync cycle: read cursors, fetch new events, write them and rebuild the commitments view.

use std::{collections::BTreeMap, path::PathBuf};

use common::{
    BlockNum, EventRegistry, EventSource, FetchError, TableDef, arrow::array::RecordBatch,
};
use tracing::{error, info, instrument};

use crate::{
    export::{self, ExportError},
    join::{JoinError, join_commitments},
    storage::{Storage, StorageError, WriteOutcome},
};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to read the latest synced block of table {table}")]
    Cursor {
        table: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to fetch events")]
    Fetch(#[source] FetchError),

    #[error("failed to write table {table}")]
    Write {
        table: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to load commitments")]
    Load(#[source] LoadError),

    #[error("failed to export commitments")]
    Export(#[source] ExportError),
}

/// Errors building the commitments view from the stored tables.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read event tables")]
    Read(#[source] StorageError),

    #[error("failed to join event tables")]
    Join(#[source] JoinError),
}

/// What a cycle saw and did, table by table in registry order.
#[derive(Debug)]
pub struct CycleReport {
    pub latest_blocks: Vec<(String, BlockNum)>,
    pub fetched: Vec<(String, usize)>,
    pub writes: Vec<WriteOutcome>,
    pub commitments: RecordBatch,
}

/// Drives sync cycles for the tables of a registry.
pub struct Syncer<S> {
    source: S,
    storage: Storage,
    registry: EventRegistry,
    parquet_path: Option<PathBuf>,
}

impl<S: EventSource> Syncer<S> {
    pub fn new(source: S, storage: Storage, registry: EventRegistry) -> Self {
        Self {
            source,
            storage,
            registry,
            parquet_path: None,
        }
    }

    /// Also write the commitments view to `path` after every cycle.
    pub fn with_parquet_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.parquet_path = Some(path.into());
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Runs one full cycle. Fetch, write and join failures abort it.
    #[instrument(skip_all, err)]
    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let tables = self.registry.tables();

        let mut latest_blocks = Vec::with_capacity(tables.len());
        for table in tables {
            let latest = self
                .storage
                .latest_block(&table.name, &table.block_column)
                .await
                .map_err(|source| SyncError::Cursor {
                    table: table.name.clone(),
                    source,
                })?;
            latest_blocks.push((table.name.clone(), latest));
        }
        info!(
            "Latest blocks - {}",
            summary(&latest_blocks, |(name, latest)| format!("{name}: {latest}"))
        );

        let mut batches = Vec::with_capacity(tables.len());
        for (table, (_, latest)) in tables.iter().zip(&latest_blocks) {
            batches.push(self.fetch_new(table, latest + 1).await?);
        }
        let fetched: Vec<(String, usize)> = tables
            .iter()
            .zip(&batches)
            .map(|(table, rows)| (table.name.clone(), rows.num_rows()))
            .collect();
        info!(
            "Fetched records - {}",
            summary(&fetched, |(name, count)| format!("{name}: {count} new records"))
        );

        let mut writes = Vec::with_capacity(tables.len());
        for (table, rows) in tables.iter().zip(batches) {
            let outcome = self
                .storage
                .write_table(rows, &table.name)
                .await
                .map_err(|source| SyncError::Write {
                    table: table.name.clone(),
                    source,
                })?;
            writes.push(outcome);
        }
        info!(
            rows_written = writes.iter().map(WriteOutcome::rows_written).sum::<usize>(),
            "Write to DuckDB - {}",
            summary(&writes, ToString::to_string)
        );

        let commitments = read_and_join(&self.storage, &self.registry)
            .await
            .map_err(SyncError::Load)?;
        info!("Total commitments: {}", commitments.num_rows());

        if let Some(path) = &self.parquet_path {
            export::write_parquet(commitments.clone(), path.clone())
                .await
                .map_err(SyncError::Export)?;
        }

        Ok(CycleReport {
            latest_blocks,
            fetched,
            writes,
            commitments,
        })
    }

    /// Events of `table` from `from_block` on. A source with nothing new yields an empty batch.
    async fn fetch_new(
        &self,
        table: &TableDef,
        from_block: BlockNum,
    ) -> Result<RecordBatch, SyncError> {
        match self.source.fetch(table, from_block).await {
            Ok(rows) => Ok(rows),
            Err(FetchError::NoData { .. }) => Ok(RecordBatch::new_empty(table.schema.clone())),
            Err(err) => Err(SyncError::Fetch(err)),
        }
    }
}

/// Reads the event tables and joins them into the commitments view.
///
/// Tables not created yet count as empty. Failures are logged and returned.
pub async fn load_commitments(
    storage: &Storage,
    registry: &EventRegistry,
) -> Result<RecordBatch, LoadError> {
    let result = read_and_join(storage, registry).await;
    if let Err(err) = &result {
        error!(error = %err, db = %storage.db_path().display(), "failed to load commitments");
    }
    result
}

async fn read_and_join(
    storage: &Storage,
    registry: &EventRegistry,
) -> Result<RecordBatch, LoadError> {
    let mut tables = BTreeMap::new();
    let mut existing = Vec::new();
    for table in registry.tables() {
        if storage
            .table_exists(&table.name)
            .await
            .map_err(LoadError::Read)?
        {
            existing.push(table.name.as_str());
        } else {
            tables.insert(table.name.clone(), RecordBatch::new_empty(table.schema.clone()));
        }
    }
    if !existing.is_empty() {
        tables.extend(
            storage
                .read_tables(&existing)
                .await
                .map_err(LoadError::Read)?,
        );
    }
    join_commitments(&tables).await.map_err(LoadError::Join)
}

fn summary<T>(items: &[T], describe: impl Fn(&T) -> String) -> String {
    items.iter().map(describe).collect::<Vec<_>>().join("; ")
}
