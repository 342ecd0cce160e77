use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use sfh_core::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, PgConnection, Postgres, QueryBuilder, Row as _};
use tracing::debug;

use crate::sink::{
    quote_ident, Materialization, ModelTarget, RewriteCounts, RowsTransform, SinkError,
    TableSink,
};

/// Hidden insertion-order column present on every sink table.
const SEQ_COLUMN: &str = "_seq";

/// Postgres allows at most 65535 bind parameters per statement.
const MAX_BINDS_PER_STATEMENT: usize = 60_000;

/// Postgres-backed sink. Every entity table lives in one schema and stores
/// all data columns as `TEXT NOT NULL DEFAULT ''`.
#[derive(Debug, Clone)]
pub struct PgSink {
    pool: PgPool,
    schema: String,
}

impl PgSink {
    pub async fn connect(database_url: &str, schema: &str) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Self::from_pool(pool, schema)
    }

    /// Pool that connects on first use, so connectivity problems surface as
    /// query errors (used by preflight to report instead of abort).
    pub fn connect_lazy(database_url: &str, schema: &str) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(database_url)?;
        Self::from_pool(pool, schema)
    }

    pub fn from_pool(pool: PgPool, schema: &str) -> Result<Self, SinkError> {
        quote_ident(schema)?;
        Ok(Self {
            pool,
            schema: schema.to_string(),
        })
    }

    fn qualified(&self, table: &str) -> Result<String, SinkError> {
        Ok(format!("{}.{}", quote_ident(&self.schema)?, quote_ident(table)?))
    }

    async fn table_exists(&self, conn: &mut PgConnection, table: &str) -> Result<bool, SinkError> {
        let qualified = self.qualified(table)?;
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(qualified)
            .fetch_one(&mut *conn)
            .await?;
        Ok(exists)
    }

    async fn existing_columns(
        &self,
        conn: &mut PgConnection,
        table: &str,
    ) -> Result<BTreeSet<String>, SinkError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
        Ok(names.into_iter().collect())
    }

    /// Create the table on first write and add only the columns it lacks.
    async fn ensure_table(
        &self,
        conn: &mut PgConnection,
        table: &str,
        columns: &BTreeSet<String>,
    ) -> Result<(), SinkError> {
        let qualified = self.qualified(table)?;
        let existing = self.existing_columns(conn, table).await?;
        if existing.is_empty() {
            sqlx::query(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_ident(&self.schema)?
            ))
            .execute(&mut *conn)
            .await?;
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {qualified} ({SEQ_COLUMN} BIGSERIAL PRIMARY KEY)"
            ))
            .execute(&mut *conn)
            .await?;
        }
        for column in missing_columns(columns, &existing) {
            sqlx::query(&format!(
                "ALTER TABLE {qualified} ADD COLUMN IF NOT EXISTS {} TEXT NOT NULL DEFAULT ''",
                quote_ident(column)?
            ))
            .execute(&mut *conn)
            .await?;
            debug!(table, column, "added column");
        }
        Ok(())
    }

    async fn insert_rows(
        &self,
        conn: &mut PgConnection,
        table: &str,
        rows: &[Row],
    ) -> Result<(), SinkError> {
        let columns = column_union(rows);
        if rows.is_empty() || columns.is_empty() {
            return Ok(());
        }
        self.ensure_table(conn, table, &columns).await?;

        let qualified = self.qualified(table)?;
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let rows_per_statement = (MAX_BINDS_PER_STATEMENT / columns.len()).max(1);

        for chunk in rows.chunks(rows_per_statement) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new(format!("INSERT INTO {qualified} ({column_list}) "));
            qb.push_values(chunk, |mut b, row| {
                for column in &columns {
                    b.push_bind(row.get(column).cloned().unwrap_or_default());
                }
            });
            qb.build().execute(&mut *conn).await?;
        }
        debug!(table, rows = rows.len(), "inserted rows");
        Ok(())
    }

    async fn select_rows(&self, conn: &mut PgConnection, table: &str) -> Result<Vec<Row>, SinkError> {
        let qualified = self.qualified(table)?;
        let rows: Vec<PgRow> = sqlx::query(&format!(
            "SELECT * FROM {qualified} ORDER BY {SEQ_COLUMN}"
        ))
        .fetch_all(&mut *conn)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for pg_row in rows {
            let mut row = Row::new();
            for column in pg_row.columns() {
                if column.name() == SEQ_COLUMN {
                    continue;
                }
                let value: Option<String> = pg_row.try_get(column.ordinal())?;
                row.insert(column.name().to_string(), value.unwrap_or_default());
            }
            out.push(row);
        }
        Ok(out)
    }
}

fn column_union(rows: &[Row]) -> BTreeSet<String> {
    rows.iter().flat_map(|row| row.keys().cloned()).collect()
}

fn missing_columns<'a>(
    wanted: &'a BTreeSet<String>,
    existing: &'a BTreeSet<String>,
) -> impl Iterator<Item = &'a str> {
    wanted.difference(existing).map(String::as_str)
}

#[async_trait]
impl TableSink for PgSink {
    async fn append(&self, table: &str, rows: &[Row]) -> Result<(), SinkError> {
        let mut tx = self.pool.begin().await?;
        self.insert_rows(&mut tx, table, rows).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn read(&self, table: &str) -> Result<Vec<Row>, SinkError> {
        let mut conn = self.pool.acquire().await?;
        if !self.table_exists(&mut conn, table).await? {
            return Err(SinkError::MissingTable(table.to_string()));
        }
        self.select_rows(&mut conn, table).await
    }

    async fn replace(&self, table: &str, rows: &[Row]) -> Result<(), SinkError> {
        let mut tx = self.pool.begin().await?;
        if self.table_exists(&mut tx, table).await? {
            sqlx::query(&format!("DELETE FROM {}", self.qualified(table)?))
                .execute(&mut *tx)
                .await?;
        }
        self.insert_rows(&mut tx, table, rows).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Read, transform and replace under an exclusive table lock so appends
    /// from another writer wait instead of being overwritten.
    async fn rewrite(
        &self,
        table: &str,
        transform: RowsTransform<'_>,
    ) -> Result<RewriteCounts, SinkError> {
        let qualified = self.qualified(table)?;
        let mut tx = self.pool.begin().await?;
        if !self.table_exists(&mut tx, table).await? {
            return Err(SinkError::MissingTable(table.to_string()));
        }
        sqlx::query(&format!("LOCK TABLE {qualified} IN EXCLUSIVE MODE"))
            .execute(&mut *tx)
            .await?;

        let rows = self.select_rows(&mut tx, table).await?;
        let before = rows.len();
        let rows = transform(rows);
        let after = rows.len();

        sqlx::query(&format!("DELETE FROM {qualified}"))
            .execute(&mut *tx)
            .await?;
        self.insert_rows(&mut tx, table, &rows).await?;
        tx.commit().await?;
        Ok(RewriteCounts { before, after })
    }

    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<String>, SinkError> {
        let qualified = self.qualified(table)?;
        let column = quote_ident(column)?;
        let mut conn = self.pool.acquire().await?;
        if !self.table_exists(&mut conn, table).await? {
            return Err(SinkError::MissingTable(table.to_string()));
        }
        let mut values: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT DISTINCT {column} FROM {qualified} WHERE {column} <> ''"
        ))
        .fetch_all(&mut *conn)
        .await?;
        // byte order, independent of the database collation
        values.sort();
        Ok(values)
    }

    async fn ping(&self) -> Result<(), SinkError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ModelTarget for PgSink {
    async fn materialize(
        &self,
        schema: &str,
        name: &str,
        sql: &str,
        materialization: Materialization,
    ) -> Result<(), SinkError> {
        let qualified = format!("{}.{}", quote_ident(schema)?, quote_ident(name)?);
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)?))
            .execute(&mut *tx)
            .await?;
        match materialization {
            Materialization::View => {
                sqlx::query(&format!("CREATE OR REPLACE VIEW {qualified} AS {sql}"))
                    .execute(&mut *tx)
                    .await?;
            }
            Materialization::Table => {
                sqlx::query(&format!("DROP TABLE IF EXISTS {qualified}"))
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(&format!("CREATE TABLE {qualified} AS {sql}"))
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
