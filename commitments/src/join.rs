//! Builds the commitments view by joining the three event tables on `commitmentIndex`.

use std::collections::BTreeMap;

use common::{
    COMMITMENT_INDEX,
    arrow::{array::RecordBatch, compute::concat_batches, error::ArrowError},
    tables::{commit_stores, commitments, commits_processed, encrypted_stores},
};
use datafusion::{
    common::Column,
    dataframe::DataFrame,
    error::DataFusionError,
    logical_expr::{Expr, JoinType},
    prelude::{SessionContext, concat, lit, starts_with, when},
};

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("table {0} is missing from the join inputs")]
    MissingTable(String),

    #[error("column {column} is missing from table {table}")]
    MissingColumn { table: String, column: String },

    #[error("failed to execute join")]
    DataFusion(#[from] DataFusionError),

    #[error("failed to assemble joined rows")]
    Arrow(#[from] ArrowError),
}

/// Column `name` of the input aliased `table`.
///
/// Built by hand since `col()` would normalize the camel-case names to lowercase.
fn qualified(table: &str, name: &str) -> Expr {
    Expr::Column(Column::new(Some(table), name))
}

/// One join input, aliased by its table name.
struct Input {
    table: &'static str,
    frame: DataFrame,
}

impl Input {
    fn new(
        ctx: &SessionContext,
        tables: &BTreeMap<String, RecordBatch>,
        table: &'static str,
    ) -> Result<Self, JoinError> {
        let batch = tables
            .get(table)
            .ok_or_else(|| JoinError::MissingTable(table.to_string()))?;
        if batch.schema().column_with_name(COMMITMENT_INDEX).is_none() {
            return Err(JoinError::MissingColumn {
                table: table.to_string(),
                column: COMMITMENT_INDEX.to_string(),
            });
        }
        let frame = ctx.read_batch(batch.clone())?.alias(table)?;
        Ok(Self { table, frame })
    }

    fn has_column(&self, name: &str) -> bool {
        self.frame
            .schema()
            .has_column(&Column::new(Some(self.table), name))
    }

    fn key(&self) -> Expr {
        qualified(self.table, COMMITMENT_INDEX)
    }
}

/// Inner-joins `encrypted_stores`, `commit_stores` and `commits_processed` into the commitments
/// view.
///
/// A column present in several inputs is taken from the first of them in that order. The
/// `block_number` of `encrypted_stores` becomes `block_number_encrypted` and `txnHash` is
/// given a `0x` prefix when it lacks one.
pub async fn join_commitments(
    tables: &BTreeMap<String, RecordBatch>,
) -> Result<RecordBatch, JoinError> {
    let ctx = SessionContext::new();
    let encrypted = Input::new(&ctx, tables, encrypted_stores::TABLE_NAME)?;
    let commits = Input::new(&ctx, tables, commit_stores::TABLE_NAME)?;
    let processed = Input::new(&ctx, tables, commits_processed::TABLE_NAME)?;

    for (input, column) in [
        (&processed, "isSlash"),
        (&commits, "txnHash"),
        (&encrypted, common::BLOCK_NUM),
    ] {
        if !input.has_column(column) {
            return Err(JoinError::MissingColumn {
                table: input.table.to_string(),
                column: column.to_string(),
            });
        }
    }

    let projection = commitments::COLUMNS
        .iter()
        .map(|&name| output_column(name, [&encrypted, &commits, &processed]))
        .collect::<Result<Vec<_>, _>>()?;

    let processed_frame = processed.frame.clone().select(vec![
        processed.key(),
        qualified(processed.table, "isSlash"),
    ])?;
    let joined = encrypted
        .frame
        .clone()
        .join_on(
            commits.frame.clone(),
            JoinType::Inner,
            [encrypted.key().eq(commits.key())],
        )?
        .join_on(
            processed_frame,
            JoinType::Inner,
            [encrypted.key().eq(processed.key())],
        )?
        .select(projection)?;

    let schema = joined.schema().inner().clone();
    let batches = joined.collect().await?;
    match batches.first() {
        Some(first) => Ok(concat_batches(&first.schema(), &batches)?),
        None => Ok(RecordBatch::new_empty(schema)),
    }
}

fn output_column(name: &str, inputs: [&Input; 3]) -> Result<Expr, JoinError> {
    let [encrypted, commits, _] = inputs;
    let expr = match name {
        commitments::ENCRYPTED_BLOCK_NUM => {
            qualified(encrypted.table, common::BLOCK_NUM).alias(name)
        }
        "txnHash" => {
            let txn_hash = qualified(commits.table, name);
            when(starts_with(txn_hash.clone(), lit("0x")), txn_hash.clone())
                .otherwise(concat(vec![lit("0x"), txn_hash]))?
                .alias(name)
        }
        _ => {
            let input = inputs
                .into_iter()
                .find(|input| input.has_column(name))
                .ok_or_else(|| JoinError::MissingColumn {
                    table: commitments::TABLE_NAME.to_string(),
                    column: name.to_string(),
                })?;
            qualified(input.table, name).alias(name)
        }
    };
    Ok(expr)
}
