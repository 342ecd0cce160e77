use serde::Serialize;
use sfh_adapters::{AdapterError, CatalogApi};
use sfh_core::{Course, Record};
use sfh_storage::TableSink;
use tracing::{info, warn};

use crate::config::SyncConfig;

/// Reference number used to probe the detail endpoint.
pub const PROBE_COURSE: &str = "TGS-2024000001";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

pub async fn run_preflight(
    config: &SyncConfig,
    api: &dyn CatalogApi,
    sink: &dyn TableSink,
) -> PreflightReport {
    let checks = vec![
        match config.validate() {
            Ok(()) => CheckResult::pass("config", "configuration is valid"),
            Err(err) => CheckResult::fail("config", err.to_string()),
        },
        check_search_api(api).await,
        check_detail_api(api).await,
        match sink.ping().await {
            Ok(()) => CheckResult::pass("sink", "sink is reachable"),
            Err(err) => CheckResult::fail("sink", err.to_string()),
        },
        check_courses_table(sink).await,
    ];

    for check in &checks {
        if check.passed {
            info!(check = check.name, detail = %check.detail, "preflight check passed");
        } else {
            warn!(check = check.name, detail = %check.detail, "preflight check failed");
        }
    }
    PreflightReport { checks }
}

async fn check_search_api(api: &dyn CatalogApi) -> CheckResult {
    match api.search_page(0, 1).await {
        Ok(body) if body.get("grouped").is_some() => {
            CheckResult::pass("search_api", "search endpoint returned grouped results")
        }
        Ok(_) => CheckResult::fail("search_api", "search response has no `grouped` member"),
        Err(err) => CheckResult::fail("search_api", err.to_string()),
    }
}

async fn check_detail_api(api: &dyn CatalogApi) -> CheckResult {
    match api.course_detail(PROBE_COURSE).await {
        Ok(_) => CheckResult::pass("detail_api", "detail endpoint is reachable"),
        Err(AdapterError::Decode(_)) => {
            CheckResult::pass("detail_api", "detail endpoint is reachable (non-JSON body)")
        }
        Err(err) => CheckResult::fail("detail_api", err.to_string()),
    }
}

/// The detail harvest needs course keys from an earlier course harvest.
async fn check_courses_table(sink: &dyn TableSink) -> CheckResult {
    let table = Course::SPEC.name;
    match sink.distinct_values(table, "course_reference_number").await {
        Ok(keys) if !keys.is_empty() => {
            CheckResult::pass("courses_table", format!("{} known courses", keys.len()))
        }
        Ok(_) => CheckResult::fail("courses_table", format!("`{table}` has no course keys")),
        Err(err) => CheckResult::fail("courses_table", err.to_string()),
    }
}
