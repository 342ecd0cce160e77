use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sfh_core::Row;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("table `{0}` does not exist")]
    MissingTable(String),
}

/// Row counts around one read-transform-replace pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteCounts {
    pub before: usize,
    pub after: usize,
}

pub type RowsTransform<'a> = &'a (dyn Fn(Vec<Row>) -> Vec<Row> + Send + Sync);

/// Persistent tabular store with one append-only table per entity.
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Add rows, creating the table or missing columns first. Never deletes.
    async fn append(&self, table: &str, rows: &[Row]) -> Result<(), SinkError>;

    /// Full table contents in insertion order.
    async fn read(&self, table: &str) -> Result<Vec<Row>, SinkError>;

    /// Atomically overwrite the full table contents.
    async fn replace(&self, table: &str, rows: &[Row]) -> Result<(), SinkError>;

    /// Read, transform and replace a table.
    ///
    /// The default is a plain `read` followed by `replace`, which is only
    /// correct with a single writer. Stores that can lock should override it.
    async fn rewrite(
        &self,
        table: &str,
        transform: RowsTransform<'_>,
    ) -> Result<RewriteCounts, SinkError> {
        let rows = self.read(table).await?;
        let before = rows.len();
        let rows = transform(rows);
        let after = rows.len();
        self.replace(table, &rows).await?;
        Ok(RewriteCounts { before, after })
    }

    /// Sorted distinct non-empty values of one column.
    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<String>, SinkError> {
        let rows = self.read(table).await?;
        let values = rows
            .into_iter()
            .filter_map(|mut row| row.remove(column))
            .filter(|value| !value.is_empty())
            .collect::<BTreeSet<_>>();
        Ok(values.into_iter().collect())
    }

    async fn ping(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Materialization {
    Table,
    View,
}

/// Store able to materialize a SQL query as a named relation.
#[async_trait]
pub trait ModelTarget: Send + Sync {
    async fn materialize(
        &self,
        schema: &str,
        name: &str,
        sql: &str,
        materialization: Materialization,
    ) -> Result<(), SinkError>;
}

/// Accept `[a-z0-9_]+` identifiers that do not start with a digit.
pub fn validate_ident(name: &str) -> Result<&str, SinkError> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(SinkError::InvalidIdentifier(name.to_string()))
    }
}

pub fn quote_ident(name: &str) -> Result<String, SinkError> {
    Ok(format!("\"{}\"", validate_ident(name)?))
}
