//! Page-by-page and key-by-key fetch loops over a [`CatalogApi`].

use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value as JsonValue;
use sfh_adapters::{detail_document, search_groups, AdapterError, CatalogApi};
use sfh_storage::FetchError;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Page(Vec<JsonValue>),
    /// The group list was present and empty.
    Exhausted,
    /// The body was not JSON or had no `grouped.GroupID.groups` list.
    Malformed,
    /// Transport error or non-success status after retries.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    Malformed,
    TooManyFailures,
}

pub async fn fetch_search_page(api: &dyn CatalogApi, start: usize, rows: usize) -> PageOutcome {
    match api.search_page(start, rows).await {
        Ok(body) => match search_groups(&body) {
            None => {
                warn!(start, "search response has no grouped result list");
                PageOutcome::Malformed
            }
            Some([]) => PageOutcome::Exhausted,
            Some(groups) => PageOutcome::Page(groups.to_vec()),
        },
        Err(AdapterError::Decode(err)) => {
            warn!(start, error = %err, "search response is not valid JSON");
            PageOutcome::Malformed
        }
        Err(AdapterError::Fetch(err)) => {
            warn!(start, error = %err, "search page fetch failed; skipping");
            PageOutcome::Failed
        }
    }
}

/// Cursor over the search endpoint.
///
/// Starts at the page containing `start_row` and advances one page per
/// request. Empty or malformed pages stop it; failed pages are skipped until
/// `max_failures` fail in a row.
#[derive(Debug)]
pub struct SearchPaginator {
    page_rows: usize,
    page_index: usize,
    max_failures: usize,
    consecutive_failures: usize,
    requests: usize,
    skipped_pages: Vec<usize>,
    stop: Option<StopReason>,
}

impl SearchPaginator {
    pub fn new(page_rows: usize, start_row: usize, max_failures: usize) -> Self {
        let page_rows = page_rows.max(1);
        Self {
            page_rows,
            page_index: start_row / page_rows,
            max_failures: max_failures.max(1),
            consecutive_failures: 0,
            requests: 0,
            skipped_pages: Vec::new(),
            stop: None,
        }
    }

    /// Row offset of the next request.
    pub fn next_start(&self) -> usize {
        self.page_index * self.page_rows
    }

    pub fn requests(&self) -> usize {
        self.requests
    }

    pub fn skipped_pages(&self) -> &[usize] {
        &self.skipped_pages
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// The next non-empty page of groups, or `None` once the cursor stopped.
    pub async fn next_page(&mut self, api: &dyn CatalogApi) -> Option<Vec<JsonValue>> {
        while self.stop.is_none() {
            let start = self.next_start();
            self.requests += 1;
            match fetch_search_page(api, start, self.page_rows).await {
                PageOutcome::Page(groups) => {
                    self.consecutive_failures = 0;
                    self.page_index += 1;
                    return Some(groups);
                }
                PageOutcome::Exhausted => self.stop = Some(StopReason::Exhausted),
                PageOutcome::Malformed => self.stop = Some(StopReason::Malformed),
                PageOutcome::Failed => {
                    self.skipped_pages.push(self.page_index);
                    self.consecutive_failures += 1;
                    self.page_index += 1;
                    if self.consecutive_failures >= self.max_failures {
                        warn!(
                            failures = self.consecutive_failures,
                            start, "too many consecutive search failures; stopping"
                        );
                        self.stop = Some(StopReason::TooManyFailures);
                    }
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetailOutcome {
    Found(JsonValue),
    /// Non-success status, undecodable body, or no `data` member.
    Missing,
    /// Transport error after retries.
    Failed,
}

pub async fn fetch_detail(api: &dyn CatalogApi, course_reference_number: &str) -> DetailOutcome {
    match api.course_detail(course_reference_number).await {
        Ok(body) => match detail_document(&body) {
            Some(document) => DetailOutcome::Found(document.clone()),
            None => {
                warn!(course_reference_number, "detail response has no data");
                DetailOutcome::Missing
            }
        },
        Err(AdapterError::Fetch(FetchError::HttpStatus { status, .. })) => {
            warn!(course_reference_number, status, "detail request rejected");
            DetailOutcome::Missing
        }
        Err(AdapterError::Decode(err)) => {
            warn!(course_reference_number, error = %err, "detail response is not valid JSON");
            DetailOutcome::Missing
        }
        Err(AdapterError::Fetch(err)) => {
            warn!(course_reference_number, error = %err, "detail fetch failed; skipping");
            DetailOutcome::Failed
        }
    }
}

/// Keys at or after `start_from` in byte order; all keys when `None`.
pub fn resume_keys(keys: Vec<String>, start_from: Option<&str>) -> Vec<String> {
    match start_from {
        Some(start) => keys.into_iter().filter(|key| key.as_str() >= start).collect(),
        None => keys,
    }
}

/// Remaining-time estimate for a fixed amount of work.
#[derive(Debug)]
pub struct Progress {
    total: usize,
    done: usize,
    log_every: usize,
    started: Instant,
}

impl Progress {
    pub fn new(total: usize, log_every: usize) -> Self {
        Self {
            total,
            done: 0,
            log_every: log_every.max(1),
            started: Instant::now(),
        }
    }

    pub fn done(&self) -> usize {
        self.done
    }

    /// Linear extrapolation from the average time per completed item.
    pub fn eta(&self) -> Option<Duration> {
        if self.done == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.done) as u32;
        let per_item = self.started.elapsed() / self.done as u32;
        Some(per_item * remaining)
    }

    pub fn tick(&mut self) {
        self.done += 1;
        if self.done % self.log_every == 0 || self.done == self.total {
            let eta_secs = self.eta().map(|d| d.as_secs()).unwrap_or_default();
            info!(done = self.done, total = self.total, eta_secs, "detail harvest progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves a scripted sequence of search responses, recording requested offsets.
    struct ScriptedSearch {
        responses: Mutex<Vec<Result<JsonValue, AdapterError>>>,
        starts: Mutex<Vec<usize>>,
    }

    impl ScriptedSearch {
        fn new(mut responses: Vec<Result<JsonValue, AdapterError>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                starts: Mutex::new(Vec::new()),
            }
        }

        fn starts(&self) -> Vec<usize> {
            self.starts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CatalogApi for ScriptedSearch {
        async fn search_page(&self, start: usize, _rows: usize) -> Result<JsonValue, AdapterError> {
            self.starts.lock().unwrap().push(start);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(page(0)))
        }

        async fn course_detail(&self, crn: &str) -> Result<JsonValue, AdapterError> {
            match crn {
                "found" => Ok(json!({"data": {"courseReferenceNumber": "found"}})),
                "null-data" => Ok(json!({"data": null})),
                "rejected" => Err(http_error(404)),
                _ => Ok(json!({"status": "error"})),
            }
        }
    }

    fn page(groups: usize) -> JsonValue {
        let groups: Vec<_> = (0..groups).map(|i| json!({"groupValue": i})).collect();
        json!({"grouped": {"GroupID": {"groups": groups}}})
    }

    fn http_error(status: u16) -> AdapterError {
        AdapterError::Fetch(FetchError::HttpStatus {
            status,
            url: "https://example.test".into(),
        })
    }

    async fn drain(paginator: &mut SearchPaginator, api: &ScriptedSearch) -> usize {
        let mut pages = 0;
        while paginator.next_page(api).await.is_some() {
            pages += 1;
        }
        pages
    }

    #[tokio::test]
    async fn n_full_pages_then_empty_takes_n_plus_one_requests() {
        let api = ScriptedSearch::new(vec![Ok(page(2)), Ok(page(2)), Ok(page(2)), Ok(page(0))]);
        let mut paginator = SearchPaginator::new(2, 0, 3);
        assert_eq!(drain(&mut paginator, &api).await, 3);
        assert_eq!(paginator.requests(), 4);
        assert_eq!(api.starts(), vec![0, 2, 4, 6]);
        assert_eq!(paginator.stop_reason(), Some(StopReason::Exhausted));
    }

    #[tokio::test]
    async fn resume_row_rounds_down_to_page_boundary() {
        let api = ScriptedSearch::new(vec![Ok(page(24)), Ok(page(0))]);
        let mut paginator = SearchPaginator::new(24, 50, 3);
        assert_eq!(paginator.next_start(), 48);
        drain(&mut paginator, &api).await;
        assert_eq!(api.starts(), vec![48, 72]);
    }

    #[tokio::test]
    async fn failed_pages_are_skipped_not_fatal() {
        let api = ScriptedSearch::new(vec![
            Ok(page(1)),
            Err(http_error(503)),
            Ok(page(1)),
            Ok(page(0)),
        ]);
        let mut paginator = SearchPaginator::new(1, 0, 3);
        assert_eq!(drain(&mut paginator, &api).await, 2);
        assert_eq!(paginator.skipped_pages(), &[1]);
        assert_eq!(api.starts(), vec![0, 1, 2, 3]);
        assert_eq!(paginator.stop_reason(), Some(StopReason::Exhausted));
    }

    #[tokio::test]
    async fn consecutive_failures_stop_the_loop() {
        let api = ScriptedSearch::new(vec![
            Ok(page(1)),
            Err(http_error(500)),
            Err(http_error(500)),
        ]);
        let mut paginator = SearchPaginator::new(1, 0, 2);
        assert_eq!(drain(&mut paginator, &api).await, 1);
        assert_eq!(paginator.requests(), 3);
        assert_eq!(paginator.stop_reason(), Some(StopReason::TooManyFailures));
    }

    #[tokio::test]
    async fn malformed_page_stops_the_loop() {
        let api = ScriptedSearch::new(vec![Ok(page(1)), Ok(json!({"response": []}))]);
        let mut paginator = SearchPaginator::new(1, 0, 3);
        assert_eq!(drain(&mut paginator, &api).await, 1);
        assert_eq!(paginator.stop_reason(), Some(StopReason::Malformed));
        assert!(paginator.next_page(&api).await.is_none());
        assert_eq!(paginator.requests(), 2);
    }

    #[tokio::test]
    async fn detail_outcomes_distinguish_data_from_missing() {
        let api = ScriptedSearch::new(vec![]);
        assert!(matches!(fetch_detail(&api, "found").await, DetailOutcome::Found(_)));
        assert_eq!(fetch_detail(&api, "null-data").await, DetailOutcome::Missing);
        assert_eq!(fetch_detail(&api, "rejected").await, DetailOutcome::Missing);
        assert_eq!(fetch_detail(&api, "other").await, DetailOutcome::Missing);
    }

    #[test]
    fn resume_keys_keep_the_start_key_and_later() {
        let keys = vec!["TGS-1".to_string(), "TGS-2".to_string(), "TGS-3".to_string()];
        assert_eq!(resume_keys(keys.clone(), Some("TGS-2")), vec!["TGS-2", "TGS-3"]);
        assert_eq!(resume_keys(keys.clone(), Some("TGS-25")), vec!["TGS-3"]);
        assert_eq!(resume_keys(keys.clone(), None), keys);
    }

    #[test]
    fn progress_has_no_eta_before_first_item() {
        let mut progress = Progress::new(10, 5);
        assert!(progress.eta().is_none());
        progress.tick();
        assert_eq!(progress.done(), 1);
        assert!(progress.eta().is_some());
    }
}
