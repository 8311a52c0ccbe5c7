//! The fixed set of event tables the poller keeps in sync.

use std::fmt;

use crate::{
    BLOCK_NUM,
    arrow::datatypes::SchemaRef,
    tables::{commit_stores, commits_processed, encrypted_stores},
};

/// Contract events the poller knows how to fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    OpenedCommitmentStored,
    UnopenedCommitmentStored,
    CommitmentProcessed,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::OpenedCommitmentStored => "OpenedCommitmentStored",
            EventKind::UnopenedCommitmentStored => "UnopenedCommitmentStored",
            EventKind::CommitmentProcessed => "CommitmentProcessed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Binds a local table to the event that fills it.
#[derive(Clone, Debug)]
pub struct TableDef {
    pub name: String,
    /// Column holding the block number, used to derive the sync cursor.
    pub block_column: String,
    pub event: EventKind,
    pub schema: SchemaRef,
}

/// Immutable list of synced tables, in sync order.
#[derive(Clone, Debug)]
pub struct EventRegistry {
    tables: Vec<TableDef>,
}

impl EventRegistry {
    pub fn new(tables: Vec<TableDef>) -> Self {
        Self { tables }
    }

    /// The three mev-commit event tables.
    pub fn mev_commit() -> Self {
        Self::new(vec![
            TableDef {
                name: commit_stores::TABLE_NAME.to_string(),
                block_column: BLOCK_NUM.to_string(),
                event: EventKind::OpenedCommitmentStored,
                schema: commit_stores::SCHEMA.clone(),
            },
            TableDef {
                name: encrypted_stores::TABLE_NAME.to_string(),
                block_column: BLOCK_NUM.to_string(),
                event: EventKind::UnopenedCommitmentStored,
                schema: encrypted_stores::SCHEMA.clone(),
            },
            TableDef {
                name: commits_processed::TABLE_NAME.to_string(),
                block_column: BLOCK_NUM.to_string(),
                event: EventKind::CommitmentProcessed,
                schema: commits_processed::SCHEMA.clone(),
            },
        ])
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mev_commit_registry_lists_tables_in_sync_order() {
        //* When
        let registry = EventRegistry::mev_commit();

        //* Then
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            ["commit_stores", "encrypted_stores", "commits_processed"]
        );
        for table in registry.tables() {
            assert_eq!(table.block_column, BLOCK_NUM);
            assert!(
                table.schema.field_with_name(&table.block_column).is_ok(),
                "table {} should carry its block column",
                table.name
            );
            assert!(
                table.schema.field_with_name(crate::COMMITMENT_INDEX).is_ok(),
                "table {} should carry the commitment index",
                table.name
            );
        }
    }
}
