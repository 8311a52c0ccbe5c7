//! Access to the DuckDB file holding the event tables.
//!
//! Every operation opens its own connection, runs on the blocking pool and is retried with
//! exponential backoff while another process holds a conflicting lock on the file.

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};

use backon::{ExponentialBuilder, Retryable};
use common::{
    BlockNum, COMMITMENT_INDEX,
    arrow::{array::RecordBatch, compute::concat_batches, error::ArrowError},
};
use duckdb::{
    Connection,
    vtab::{ArrowVTab, arrow_recordbatch_to_query_params},
};
use tracing::{instrument, warn};

/// Backoff applied while the database file is locked.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub backoff_factor: f32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_factor(self.backoff_factor)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

/// Errors that can occur when accessing the table store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Another connection holds a conflicting lock on the database file.
    #[error("database {} is locked", db.display())]
    Locked {
        db: PathBuf,
        #[source]
        source: duckdb::Error,
    },

    /// The database stayed locked through every attempt of the retry policy.
    #[error(
        "failed to access {} after {attempts} attempts due to lock conflicts",
        db.display()
    )]
    LockRetriesExhausted {
        db: PathBuf,
        attempts: usize,
        #[source]
        source: duckdb::Error,
    },

    /// Any other DuckDB failure: I/O, catalog or binder errors. Never retried.
    #[error("DuckDB error on {}", db.display())]
    DuckDb {
        db: PathBuf,
        #[source]
        source: duckdb::Error,
    },

    #[error("failed to assemble record batch")]
    Arrow(#[from] ArrowError),

    /// The blocking task running the DuckDB call panicked or was cancelled.
    #[error("storage task failed")]
    Blocking(#[source] tokio::task::JoinError),
}

impl StorageError {
    fn duckdb(db: &Path, source: duckdb::Error) -> Self {
        let db = db.to_path_buf();
        if is_lock_conflict(&source.to_string()) {
            StorageError::Locked { db, source }
        } else {
            StorageError::DuckDb { db, source }
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, StorageError::Locked { .. })
    }
}

fn is_lock_conflict(message: &str) -> bool {
    message.contains("Conflicting lock") || message.to_lowercase().contains("database is locked")
}

/// What a write did to its table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    NoNewData {
        table: String,
    },
    Created {
        table: String,
        rows: usize,
    },
    /// `inserted` counts the rows whose key was not already stored.
    Appended {
        table: String,
        attempted: usize,
        inserted: usize,
    },
}

impl WriteOutcome {
    pub fn rows_written(&self) -> usize {
        match self {
            WriteOutcome::NoNewData { .. } => 0,
            WriteOutcome::Created { rows, .. } => *rows,
            WriteOutcome::Appended { inserted, .. } => *inserted,
        }
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOutcome::NoNewData { table } => write!(f, "{table}: no new data"),
            WriteOutcome::Created { table, rows } => {
                write!(f, "{table}: created table with {rows} records")
            }
            WriteOutcome::Appended {
                table,
                attempted,
                inserted,
            } => {
                write!(f, "{table}: inserted {inserted} new records")?;
                if attempted > inserted {
                    write!(f, " ({} duplicates skipped)", attempted - inserted)?;
                }
                Ok(())
            }
        }
    }
}

/// Handle to a DuckDB file. Cheap to clone, holds no open connection.
#[derive(Clone, Debug)]
pub struct Storage {
    db_path: PathBuf,
    retry: RetryPolicy,
}

impl Storage {
    pub fn new(db_path: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            db_path: db_path.into(),
            retry,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Highest value of `block_column` in `table`, or 0 if the table is missing or empty.
    #[instrument(skip(self), err)]
    pub async fn latest_block(
        &self,
        table: &str,
        block_column: &str,
    ) -> Result<BlockNum, StorageError> {
        let table = table.to_string();
        let block_column = block_column.to_string();
        self.run(move |db| {
            let conn = open(db)?;
            if !table_exists(&conn, db, &table)? {
                return Ok(0);
            }
            let sql = format!(
                "SELECT MAX({}) FROM {}",
                quote_ident(&block_column),
                quote_ident(&table)
            );
            let max: Option<u64> = conn
                .query_row(&sql, [], |row| row.get(0))
                .map_err(|err| StorageError::duckdb(db, err))?;
            Ok(max.unwrap_or(0))
        })
        .await
    }

    #[instrument(skip(self), err)]
    pub async fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let table = table.to_string();
        self.run(move |db| {
            let conn = open(db)?;
            table_exists(&conn, db, &table)
        })
        .await
    }

    /// Reads every named table in full over a single connection.
    #[instrument(skip(self), err)]
    pub async fn read_tables(
        &self,
        tables: &[&str],
    ) -> Result<BTreeMap<String, RecordBatch>, StorageError> {
        let tables: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
        self.run(move |db| {
            let conn = open(db)?;
            let mut batches = BTreeMap::new();
            for table in &tables {
                batches.insert(table.clone(), read_table(&conn, db, table)?);
            }
            Ok(batches)
        })
        .await
    }

    #[instrument(skip(self), err)]
    pub async fn read_table(&self, table: &str) -> Result<RecordBatch, StorageError> {
        let table = table.to_string();
        self.run(move |db| {
            let conn = open(db)?;
            read_table(&conn, db, &table)
        })
        .await
    }

    /// Creates `table` from `rows`, or appends the rows whose `commitmentIndex` is not stored yet.
    ///
    /// At most one row per `commitmentIndex` is written, even when `rows` repeats a key. Safe to
    /// retry: a repeated append inserts nothing.
    #[instrument(skip(self, rows), fields(rows = rows.num_rows()), err)]
    pub async fn write_table(
        &self,
        rows: RecordBatch,
        table: &str,
    ) -> Result<WriteOutcome, StorageError> {
        if rows.num_rows() == 0 {
            return Ok(WriteOutcome::NoNewData {
                table: table.to_string(),
            });
        }

        let table = table.to_string();
        self.run(move |db| {
            let conn = open(db)?;
            write_table(&conn, db, rows.clone(), &table)
        })
        .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: Fn(&Path) -> Result<T, StorageError> + Clone + Send + 'static,
    {
        let db = self.db_path.clone();
        retry_on_lock(&self.retry, &self.db_path, || {
            let op = op.clone();
            let db = db.clone();
            async move {
                tokio::task::spawn_blocking(move || op(&db))
                    .await
                    .map_err(StorageError::Blocking)?
            }
        })
        .await
    }
}

/// Runs `op` until it succeeds, fails with anything but a lock conflict, or runs out of attempts.
pub(crate) async fn retry_on_lock<T, F, Fut>(
    policy: &RetryPolicy,
    db: &Path,
    op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 1;
    let notify_retry = |err: &StorageError, dur: Duration| {
        warn!(
            db = %db.display(),
            error = %err,
            attempt,
            max_attempts = policy.max_attempts,
            retry_delay_secs = dur.as_secs_f32(),
            "lock detected, retrying"
        );
        attempt += 1;
    };

    let result = op
        .retry(policy.backoff())
        .when(StorageError::is_locked)
        .notify(notify_retry)
        .await;

    match result {
        Err(StorageError::Locked { db, source }) => Err(StorageError::LockRetriesExhausted {
            db,
            attempts: policy.max_attempts,
            source,
        }),
        other => other,
    }
}

fn open(db: &Path) -> Result<Connection, StorageError> {
    Connection::open(db).map_err(|err| StorageError::duckdb(db, err))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_exists(conn: &Connection, db: &Path, table: &str) -> Result<bool, StorageError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            [table],
            |row| row.get(0),
        )
        .map_err(|err| StorageError::duckdb(db, err))?;
    Ok(count > 0)
}

fn read_table(conn: &Connection, db: &Path, table: &str) -> Result<RecordBatch, StorageError> {
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {}", quote_ident(table)))
        .map_err(|err| StorageError::duckdb(db, err))?;
    let arrow = stmt
        .query_arrow([])
        .map_err(|err| StorageError::duckdb(db, err))?;
    let schema = arrow.get_schema();
    let batches: Vec<RecordBatch> = arrow.collect();
    Ok(concat_batches(&schema, &batches)?)
}

fn write_table(
    conn: &Connection,
    db: &Path,
    rows: RecordBatch,
    table: &str,
) -> Result<WriteOutcome, StorageError> {
    conn.register_table_function::<ArrowVTab>("arrow")
        .map_err(|err| StorageError::duckdb(db, err))?;

    let exists = table_exists(conn, db, table)?;
    let attempted = rows.num_rows();
    let params = arrow_recordbatch_to_query_params(rows);
    let target = quote_ident(table);
    let key = quote_ident(COMMITMENT_INDEX);

    // A key repeated within the batch is kept once.
    if !exists {
        let sql = format!(
            "CREATE TABLE {target} AS \
             SELECT * FROM arrow(?, ?) \
             QUALIFY row_number() OVER (PARTITION BY {key}) = 1"
        );
        conn.execute(&sql, params)
            .map_err(|err| StorageError::duckdb(db, err))?;
        let rows: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {target}"), [], |row| row.get(0))
            .map_err(|err| StorageError::duckdb(db, err))?;
        return Ok(WriteOutcome::Created {
            table: table.to_string(),
            rows: usize::try_from(rows).unwrap_or_default(),
        });
    }

    let sql = format!(
        "INSERT INTO {target} \
         SELECT incoming.* FROM arrow(?, ?) AS incoming \
         LEFT JOIN {target} AS stored ON incoming.{key} = stored.{key} \
         WHERE stored.{key} IS NULL \
         QUALIFY row_number() OVER (PARTITION BY incoming.{key}) = 1"
    );
    let inserted = conn
        .execute(&sql, params)
        .map_err(|err| StorageError::duckdb(db, err))?;
    Ok(WriteOutcome::Appended {
        table: table.to_string(),
        attempted,
        inserted,
    })
}

#[cfg(test)]
mod tests {
    use common::{
        arrow::array::AsArray as _,
        tables::{
            LogMeta,
            commits_processed::{CommitProcessed, CommitProcessedRowsBuilder, TABLE_NAME},
        },
    };

    use super::*;

    fn processed_rows(rows: &[(&str, u64)]) -> RecordBatch {
        let mut builder = CommitProcessedRowsBuilder::with_capacity(rows.len());
        for (index, block) in rows {
            builder.append(&CommitProcessed {
                commitment_index: index.to_string(),
                is_slash: false,
                meta: LogMeta {
                    block_number: *block,
                    timestamp: 1_700_000_000 + block,
                    hash: format!("0x{block:064x}"),
                },
            });
        }
        builder.build().expect("should build rows")
    }

    fn temp_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let storage = Storage::new(dir.path().join("test.duckdb"), RetryPolicy::default());
        (dir, storage)
    }

    fn locked() -> StorageError {
        StorageError::Locked {
            db: PathBuf::from("test.duckdb"),
            source: duckdb::Error::QueryReturnedNoRows,
        }
    }

    #[tokio::test]
    async fn latest_block_of_missing_table_is_zero() {
        //* Given
        let (_dir, storage) = temp_storage();

        //* When
        let latest = storage
            .latest_block(TABLE_NAME, "block_number")
            .await
            .expect("should query missing table");

        //* Then
        assert_eq!(latest, 0);
    }

    #[tokio::test]
    async fn latest_block_of_empty_table_is_zero() {
        //* Given
        let (_dir, storage) = temp_storage();
        Connection::open(storage.db_path())
            .and_then(|conn| {
                conn.execute_batch(
                    r#"CREATE TABLE commits_processed ("commitmentIndex" VARCHAR, block_number UBIGINT)"#,
                )
            })
            .expect("should create empty table");

        //* When
        let latest = storage
            .latest_block(TABLE_NAME, "block_number")
            .await
            .expect("should query empty table");

        //* Then
        assert_eq!(latest, 0);
    }

    #[tokio::test]
    async fn latest_block_is_max_of_block_column() {
        //* Given
        let (_dir, storage) = temp_storage();
        storage
            .write_table(processed_rows(&[("0x01", 12), ("0x02", 40), ("0x03", 7)]), TABLE_NAME)
            .await
            .expect("should write rows");

        //* When
        let latest = storage
            .latest_block(TABLE_NAME, "block_number")
            .await
            .expect("should query latest block");

        //* Then
        assert_eq!(latest, 40);
    }

    #[tokio::test]
    async fn first_write_creates_table() {
        //* Given
        let (_dir, storage) = temp_storage();

        //* When
        let outcome = storage
            .write_table(processed_rows(&[("0x01", 1), ("0x02", 2)]), TABLE_NAME)
            .await
            .expect("should create table");

        //* Then
        assert_eq!(
            outcome,
            WriteOutcome::Created {
                table: TABLE_NAME.to_string(),
                rows: 2
            }
        );
        assert_eq!(
            outcome.to_string(),
            "commits_processed: created table with 2 records"
        );
        let stored = storage
            .read_table(TABLE_NAME)
            .await
            .expect("should read table back");
        assert_eq!(stored.num_rows(), 2);
        assert!(storage.table_exists(TABLE_NAME).await.expect("should check table"));
    }

    #[tokio::test]
    async fn repeated_write_inserts_nothing() {
        //* Given
        let (_dir, storage) = temp_storage();
        let rows = processed_rows(&[("0x01", 1), ("0x02", 2)]);
        storage
            .write_table(rows.clone(), TABLE_NAME)
            .await
            .expect("should create table");

        //* When
        let outcome = storage
            .write_table(rows, TABLE_NAME)
            .await
            .expect("should append");

        //* Then
        assert_eq!(
            outcome,
            WriteOutcome::Appended {
                table: TABLE_NAME.to_string(),
                attempted: 2,
                inserted: 0
            }
        );
        let stored = storage.read_table(TABLE_NAME).await.expect("should read table");
        assert_eq!(stored.num_rows(), 2);
    }

    #[tokio::test]
    async fn append_skips_stored_keys() {
        //* Given
        let (_dir, storage) = temp_storage();
        storage
            .write_table(processed_rows(&[("0x01", 1), ("0x02", 2)]), TABLE_NAME)
            .await
            .expect("should create table");

        //* When
        let outcome = storage
            .write_table(processed_rows(&[("0x02", 2), ("0x03", 3)]), TABLE_NAME)
            .await
            .expect("should append");

        //* Then
        assert_eq!(outcome.rows_written(), 1);
        assert_eq!(
            outcome.to_string(),
            "commits_processed: inserted 1 new records (1 duplicates skipped)"
        );
        let stored = storage
            .read_tables(&[TABLE_NAME])
            .await
            .expect("should read tables");
        assert_eq!(stored[TABLE_NAME].num_rows(), 3);
    }

    #[tokio::test]
    async fn keys_repeated_within_a_batch_are_stored_once() {
        //* Given
        let (_dir, storage) = temp_storage();

        //* When
        let created = storage
            .write_table(processed_rows(&[("0x01", 1), ("0x01", 1)]), TABLE_NAME)
            .await
            .expect("should create table");
        let appended = storage
            .write_table(processed_rows(&[("0x02", 2), ("0x02", 2)]), TABLE_NAME)
            .await
            .expect("should append");

        //* Then
        assert_eq!(
            created,
            WriteOutcome::Created {
                table: TABLE_NAME.to_string(),
                rows: 1
            }
        );
        assert_eq!(
            appended.to_string(),
            "commits_processed: inserted 1 new records (1 duplicates skipped)"
        );
        let stored = storage.read_table(TABLE_NAME).await.expect("should read table");
        let mut keys: Vec<_> = stored
            .column_by_name(COMMITMENT_INDEX)
            .expect("should have key column")
            .as_string::<i32>()
            .iter()
            .flatten()
            .collect();
        keys.sort();
        assert_eq!(keys, ["0x01", "0x02"]);
    }

    #[tokio::test]
    async fn empty_write_is_a_no_op() {
        //* Given
        let (_dir, storage) = temp_storage();

        //* When
        let outcome = storage
            .write_table(processed_rows(&[]), TABLE_NAME)
            .await
            .expect("should skip empty rows");

        //* Then
        assert_eq!(outcome.to_string(), "commits_processed: no new data");
        assert!(!storage.table_exists(TABLE_NAME).await.expect("should check table"));
    }

    #[tokio::test]
    async fn reading_missing_table_fails_without_retrying() {
        //* Given
        let (_dir, storage) = temp_storage();

        //* When
        let result = storage.read_table("nope").await;

        //* Then
        assert!(
            matches!(result, Err(StorageError::DuckDb { .. })),
            "expected a plain DuckDB error, got {result:?}"
        );
    }

    #[test]
    fn lock_messages_are_classified() {
        let db = Path::new("test.duckdb");
        let conflicting = duckdb::Error::InvalidParameterName(
            "IO Error: Could not set lock on file: Conflicting lock is held".to_string(),
        );
        assert!(StorageError::duckdb(db, conflicting).is_locked());

        let busy = duckdb::Error::InvalidParameterName("Database is LOCKED".to_string());
        assert!(StorageError::duckdb(db, busy).is_locked());

        let other = duckdb::Error::InvalidParameterName("Catalog Error".to_string());
        assert!(!StorageError::duckdb(db, other).is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_retries_back_off_exponentially() {
        //* Given
        let policy = RetryPolicy::default();
        let failures = 3;
        let mut calls = 0;
        let start = tokio::time::Instant::now();

        //* When
        let result = retry_on_lock(&policy, Path::new("test.duckdb"), || {
            calls += 1;
            let call = calls;
            async move {
                if call <= failures {
                    Err(locked())
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        //* Then
        assert_eq!(result.expect("should succeed after retries"), 4);
        // 1s + 2s + 4s
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn lock_retries_exhaust_after_max_attempts() {
        //* Given
        let policy = RetryPolicy::default();
        let mut calls = 0;

        //* When
        let result: Result<(), _> = retry_on_lock(&policy, Path::new("test.duckdb"), || {
            calls += 1;
            async { Err(locked()) }
        })
        .await;

        //* Then
        assert_eq!(calls, 5);
        let err = result.expect_err("should give up");
        assert!(matches!(
            err,
            StorageError::LockRetriesExhausted { attempts: 5, .. }
        ));
        assert!(err.to_string().contains("after 5 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried() {
        //* Given
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let start = tokio::time::Instant::now();

        //* When
        let result: Result<(), _> = retry_on_lock(&policy, Path::new("test.duckdb"), || {
            calls += 1;
            async {
                Err(StorageError::DuckDb {
                    db: PathBuf::from("test.duckdb"),
                    source: duckdb::Error::QueryReturnedNoRows,
                })
            }
        })
        .await;

        //* Then
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(StorageError::DuckDb { .. })));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
