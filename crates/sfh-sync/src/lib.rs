//! Harvest pipeline: fetch, parse, accumulate, append, then reconcile.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sfh_adapters::{parse_course_detail, parse_search_groups, CatalogApi};
use sfh_core::{accessed_at_stamp, all_tables, Course, Record, TableSpec, COURSE_TABLES, DETAIL_TABLES};
use sfh_storage::{ModelTarget, TableSink};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod accumulator;
pub mod config;
pub mod export;
pub mod fetcher;
pub mod models;
pub mod preflight;
pub mod reconcile;

pub use accumulator::{flush, CourseBatch, DetailBatch, SnapshotBatch};
pub use config::SyncConfig;
pub use export::{export_tables, ParquetManifest, ParquetManifestFile};
pub use fetcher::{
    fetch_detail, fetch_search_page, resume_keys, DetailOutcome, PageOutcome, Progress,
    SearchPaginator, StopReason,
};
pub use models::{run_models, ModelDefinition, ModelRegistry, ModelRunReport};
pub use preflight::{run_preflight, CheckResult, PreflightReport};
pub use reconcile::{latest_per_key, reconcile_tables, ReconcileReport, TableFailure, TableReconcile};

pub const CRATE_NAME: &str = "sfh-sync";

/// Log a progress line every this many detail keys.
const PROGRESS_LOG_EVERY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestKind {
    Courses,
    Details,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestSummary {
    pub kind: HarvestKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub requests: usize,
    pub batches: usize,
    pub rows_written: usize,
    /// Page offsets or course keys that yielded nothing.
    pub skipped: Vec<String>,
    pub stop_reason: Option<StopReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub harvests: Vec<HarvestSummary>,
    pub reconcile: ReconcileReport,
}

pub struct SyncPipeline {
    config: SyncConfig,
    api: Arc<dyn CatalogApi>,
    sink: Arc<dyn TableSink>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, api: Arc<dyn CatalogApi>, sink: Arc<dyn TableSink>) -> Self {
        Self { config, api, sink }
    }

    /// Walk the search endpoint from `start_row`, appending one batch every
    /// `flush_pages` pages.
    pub async fn harvest_courses(&self, start_row: usize) -> Result<HarvestSummary> {
        let started_at = Utc::now();
        let mut paginator = SearchPaginator::new(
            self.config.page_rows,
            start_row,
            self.config.max_page_failures,
        );
        info!(start_row = paginator.next_start(), "starting course harvest");

        let mut batch = CourseBatch::default();
        let mut pages_in_batch = 0;
        let mut batches = 0;
        let mut rows_written = 0;

        while let Some(groups) = paginator.next_page(self.api.as_ref()).await {
            batch.add(parse_search_groups(&groups));
            pages_in_batch += 1;
            if pages_in_batch >= self.config.flush_pages {
                rows_written += self.flush_batch(std::mem::take(&mut batch)).await?;
                batches += 1;
                pages_in_batch = 0;
                info!(next_start = paginator.next_start(), rows_written, "course batch flushed");
            }
        }
        if !batch.is_empty() {
            rows_written += self.flush_batch(batch).await?;
            batches += 1;
        }

        let summary = HarvestSummary {
            kind: HarvestKind::Courses,
            started_at,
            finished_at: Utc::now(),
            requests: paginator.requests(),
            batches,
            rows_written,
            skipped: paginator
                .skipped_pages()
                .iter()
                .map(|page| (page * self.config.page_rows).to_string())
                .collect(),
            stop_reason: paginator.stop_reason(),
        };
        info!(
            requests = summary.requests,
            rows_written,
            skipped = summary.skipped.len(),
            stop_reason = ?summary.stop_reason,
            "course harvest finished"
        );
        Ok(summary)
    }

    /// Fetch one detail document per known course key, in chunks of
    /// `detail_chunk_size` keys per appended batch.
    pub async fn harvest_details(&self, start_from_course: Option<&str>) -> Result<HarvestSummary> {
        let started_at = Utc::now();
        let courses = Course::SPEC.name;
        let known = self
            .sink
            .distinct_values(courses, "course_reference_number")
            .await
            .with_context(|| format!("listing course keys from `{courses}`"))?;
        let keys = resume_keys(known, start_from_course);
        info!(keys = keys.len(), start_from_course, "starting detail harvest");

        let mut progress = Progress::new(keys.len(), PROGRESS_LOG_EVERY);
        let mut skipped = Vec::new();
        let mut batches = 0;
        let mut rows_written = 0;

        for chunk in keys.chunks(self.config.detail_chunk_size) {
            let mut batch = DetailBatch::default();
            for key in chunk {
                match fetch_detail(self.api.as_ref(), key).await {
                    DetailOutcome::Found(document) => batch.add(parse_course_detail(&document)),
                    DetailOutcome::Missing | DetailOutcome::Failed => skipped.push(key.clone()),
                }
                progress.tick();
            }
            if !batch.is_empty() {
                rows_written += self.flush_batch(batch).await?;
                batches += 1;
            }
            info!(done = progress.done(), rows_written, "detail chunk flushed");
        }

        let summary = HarvestSummary {
            kind: HarvestKind::Details,
            started_at,
            finished_at: Utc::now(),
            requests: keys.len(),
            batches,
            rows_written,
            skipped,
            stop_reason: None,
        };
        info!(
            requests = summary.requests,
            rows_written,
            skipped = summary.skipped.len(),
            "detail harvest finished"
        );
        Ok(summary)
    }

    async fn flush_batch<B: SnapshotBatch>(&self, batch: B) -> Result<usize> {
        let accessed_at = accessed_at_stamp(Utc::now());
        flush(self.sink.as_ref(), &batch, &accessed_at).await
    }

    pub async fn reconcile(&self, tables: impl IntoIterator<Item = TableSpec>) -> ReconcileReport {
        let report = reconcile_tables(self.sink.as_ref(), tables).await;
        if !report.is_clean() {
            warn!(failed = report.failed.len(), "some tables could not be reconciled");
        }
        report
    }

    pub async fn run_courses(&self, start_row: usize) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, command = "harvest-courses");
        async {
            let harvest = self.harvest_courses(start_row).await;
            let reconcile = self.reconcile(COURSE_TABLES.iter().copied()).await;
            finish(run_id, harvest.map(|h| vec![h]), reconcile)
        }
        .instrument(span)
        .await
    }

    pub async fn run_details(&self, start_from_course: Option<&str>) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, command = "harvest-details");
        async {
            let harvest = self.harvest_details(start_from_course).await;
            let reconcile = self.reconcile(DETAIL_TABLES.iter().copied()).await;
            finish(run_id, harvest.map(|h| vec![h]), reconcile)
        }
        .instrument(span)
        .await
    }

    /// Course harvest, detail harvest, then every table reconciled.
    pub async fn run_full(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, command = "sync");
        async {
            let harvests = async {
                let courses = self.harvest_courses(0).await?;
                let details = self.harvest_details(None).await?;
                Ok::<_, anyhow::Error>(vec![courses, details])
            }
            .await;
            let reconcile = self.reconcile(all_tables()).await;
            finish(run_id, harvests, reconcile)
        }
        .instrument(span)
        .await
    }

    pub async fn export(&self, out_dir: &Path) -> Result<PathBuf> {
        let run_id = Uuid::new_v4();
        export_tables(self.sink.as_ref(), all_tables(), out_dir, run_id)
            .instrument(info_span!("export", %run_id))
            .await
    }

    pub async fn build_models(&self, target: &dyn ModelTarget) -> Result<ModelRunReport> {
        let registry = ModelRegistry::load(&self.config.models_path()).await?;
        Ok(run_models(
            target,
            &registry,
            &self.config.workspace_root,
            &self.config.schema,
            &self.config.model_schema,
        )
        .await)
    }
}

/// Reconciliation has already run; a harvest error is surfaced only now.
fn finish(
    run_id: Uuid,
    harvests: Result<Vec<HarvestSummary>>,
    reconcile: ReconcileReport,
) -> Result<RunReport> {
    let harvests = harvests.with_context(|| format!("harvest in run {run_id} failed"))?;
    Ok(RunReport {
        run_id,
        harvests,
        reconcile,
    })
}

/// A scheduler running the full sync on `sync_cron`, or `None` when disabled.
pub async fn maybe_build_scheduler(pipeline: Arc<SyncPipeline>) -> Result<Option<JobScheduler>> {
    if !pipeline.config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = pipeline.config.sync_cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            match pipeline.run_full().await {
                Ok(report) => info!(
                    run_id = %report.run_id,
                    rows_removed = report.reconcile.rows_removed(),
                    "scheduled sync finished"
                ),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled sync failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
