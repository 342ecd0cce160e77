use std::collections::HashMap;

use async_trait::async_trait;
use sfh_core::Row;
use tokio::sync::Mutex;

use crate::sink::{
    validate_ident, Materialization, ModelTarget, RewriteCounts, RowsTransform, SinkError,
    TableSink,
};

/// Process-local sink used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    models: Mutex<Vec<MaterializedModel>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedModel {
    pub schema: String,
    pub name: String,
    pub sql: String,
    pub materialization: Materialization,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn materialized(&self) -> Vec<MaterializedModel> {
        self.models.lock().await.clone()
    }
}

#[async_trait]
impl TableSink for MemorySink {
    async fn append(&self, table: &str, rows: &[Row]) -> Result<(), SinkError> {
        validate_ident(table)?;
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(())
    }

    async fn read(&self, table: &str) -> Result<Vec<Row>, SinkError> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .ok_or_else(|| SinkError::MissingTable(table.to_string()))
    }

    async fn replace(&self, table: &str, rows: &[Row]) -> Result<(), SinkError> {
        validate_ident(table)?;
        self.tables
            .lock()
            .await
            .insert(table.to_string(), rows.to_vec());
        Ok(())
    }

    async fn rewrite(
        &self,
        table: &str,
        transform: RowsTransform<'_>,
    ) -> Result<RewriteCounts, SinkError> {
        let mut tables = self.tables.lock().await;
        let rows = tables
            .remove(table)
            .ok_or_else(|| SinkError::MissingTable(table.to_string()))?;
        let before = rows.len();
        let rows = transform(rows);
        let after = rows.len();
        tables.insert(table.to_string(), rows);
        Ok(RewriteCounts { before, after })
    }
}

#[async_trait]
impl ModelTarget for MemorySink {
    async fn materialize(
        &self,
        schema: &str,
        name: &str,
        sql: &str,
        materialization: Materialization,
    ) -> Result<(), SinkError> {
        validate_ident(schema)?;
        validate_ident(name)?;
        let mut models = self.models.lock().await;
        models.retain(|m| !(m.schema == schema && m.name == name));
        models.push(MaterializedModel {
            schema: schema.to_string(),
            name: name.to_string(),
            sql: sql.to_string(),
            materialization,
        });
        Ok(())
    }
}
