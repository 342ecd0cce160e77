//! Parquet snapshots of the sink tables plus a checksummed manifest.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sfh_core::{Row, TableSpec};
use sfh_storage::{SinkError, TableSink};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub exported_at: DateTime<Utc>,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub rows: usize,
    pub sha256: String,
    pub bytes: u64,
}

/// Write one parquet file per existing table under `out_dir` and a
/// `manifest.json` next to them. Returns the manifest path.
pub async fn export_tables(
    sink: &dyn TableSink,
    tables: impl IntoIterator<Item = TableSpec>,
    out_dir: &Path,
    run_id: Uuid,
) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut files = Vec::new();
    for spec in tables {
        let rows = match sink.read(spec.name).await {
            Ok(rows) => rows,
            Err(SinkError::MissingTable(_)) => {
                warn!(table = spec.name, "table does not exist; not exported");
                continue;
            }
            Err(err) => return Err(err).with_context(|| format!("reading {}", spec.name)),
        };
        if rows.is_empty() {
            warn!(table = spec.name, "table is empty; not exported");
            continue;
        }
        let path = out_dir.join(format!("{}.parquet", spec.name));
        write_rows_parquet(&path, &rows)?;
        files.push(manifest_entry(spec.name, out_dir, &path, rows.len())?);
        info!(table = spec.name, rows = rows.len(), "exported table");
    }

    let manifest = ParquetManifest {
        schema_version: 1,
        run_id,
        exported_at: Utc::now(),
        files,
    };
    let manifest_path = out_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

/// Text rows as a batch of non-null `Utf8` columns, one per column seen in
/// any row, in name order.
pub fn rows_to_batch(rows: &[Row]) -> Result<RecordBatch> {
    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();
    let schema = Arc::new(Schema::new(
        columns
            .iter()
            .map(|name| ArrowField::new(*name, DataType::Utf8, false))
            .collect::<Vec<_>>(),
    ));
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|name| {
            let values = rows
                .iter()
                .map(|row| row.get(*name).map(String::as_str).unwrap_or_default());
            Arc::new(StringArray::from_iter_values(values)) as ArrayRef
        })
        .collect();
    if arrays.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    RecordBatch::try_new(schema, arrays).context("building record batch")
}

fn write_rows_parquet(path: &Path, rows: &[Row]) -> Result<()> {
    let batch = rows_to_batch(rows)?;
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, out_dir: &Path, path: &Path, rows: usize) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let rel = path
        .strip_prefix(out_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        rows,
        sha256,
        bytes: bytes.len() as u64,
    })
}
