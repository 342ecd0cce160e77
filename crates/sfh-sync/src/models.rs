//! Analytical models: named SQL queries materialized over the raw tables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sfh_storage::{Materialization, ModelTarget};
use tokio::fs;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelRegistry {
    #[serde(default)]
    pub models: Vec<ModelDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    /// Path to the query, relative to the workspace root.
    pub sql: PathBuf,
    #[serde(default = "default_materialization")]
    pub materialized: Materialization,
}

fn default_materialization() -> Materialization {
    Materialization::Table
}

impl ModelRegistry {
    /// A missing registry file means no models.
    pub async fn load(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            warn!(path = %path.display(), "no model registry found");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Substitute `{schema}` with the raw table schema.
pub fn render_sql(template: &str, raw_schema: &str) -> String {
    template.replace("{schema}", raw_schema)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelRunReport {
    pub built: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl ModelRunReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Build every model in order; a failing model is recorded and skipped.
pub async fn run_models(
    target: &dyn ModelTarget,
    registry: &ModelRegistry,
    workspace_root: &Path,
    raw_schema: &str,
    model_schema: &str,
) -> ModelRunReport {
    let mut report = ModelRunReport::default();
    for model in &registry.models {
        match build_model(target, model, workspace_root, raw_schema, model_schema).await {
            Ok(()) => {
                info!(model = %model.name, materialized = ?model.materialized, "model built");
                report.built.push(model.name.clone());
            }
            Err(err) => {
                error!(model = %model.name, error = %format!("{err:#}"), "model failed");
                report.failed.push((model.name.clone(), format!("{err:#}")));
            }
        }
    }
    report
}

async fn build_model(
    target: &dyn ModelTarget,
    model: &ModelDefinition,
    workspace_root: &Path,
    raw_schema: &str,
    model_schema: &str,
) -> Result<()> {
    let path = workspace_root.join(&model.sql);
    let template = fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let sql = render_sql(&template, raw_schema);
    target
        .materialize(model_schema, &model.name, sql.trim(), model.materialized)
        .await
        .with_context(|| format!("materializing {}.{}", model_schema, model.name))
}
