//! Catalog API contract, the live SkillsFuture client and the response parser.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sfh_storage::{FetchError, FetchRequest, HttpFetcher};
use thiserror::Error;
use tracing::debug;

pub mod parser;

pub use parser::{
    detail_document, parse_course_detail, parse_course_group, parse_search_groups, search_groups,
    split_job_roles, ParsedCourses, ParsedDetail,
};

pub const CRATE_NAME: &str = "sfh-adapters";

pub const SEARCH_URL: &str =
    "https://www.myskillsfuture.gov.sg/services/tex/individual/course-search";
pub const SEARCH_REFERER: &str =
    "https://www.myskillsfuture.gov.sg/content/portal/en/portal-search/portal-search.html";
pub const DETAIL_URL: &str =
    "https://www.myskillsfuture.gov.sg/services/tex/individual/course-detail";
/// `{}` is replaced with the course reference number.
pub const DETAIL_REFERER_TEMPLATE: &str = "https://www.myskillsfuture.gov.sg/content/portal/en/training-exchange/course-directory/course-detail.html?courseReferenceNumber={}";
pub const DETAIL_ACTION: &str = "get-course-by-ref-number";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Read access to the public course catalog.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// One search page of at most `rows` course groups starting at row `start`.
    async fn search_page(&self, start: usize, rows: usize) -> Result<JsonValue, AdapterError>;

    /// Raw detail response for one course reference number.
    async fn course_detail(&self, course_reference_number: &str)
        -> Result<JsonValue, AdapterError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoints {
    pub search_url: String,
    pub search_referer: String,
    pub detail_url: String,
    pub detail_referer_template: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            search_url: SEARCH_URL.to_string(),
            search_referer: SEARCH_REFERER.to_string(),
            detail_url: DETAIL_URL.to_string(),
            detail_referer_template: DETAIL_REFERER_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct SkillsFutureApi {
    http: HttpFetcher,
    endpoints: ApiEndpoints,
}

impl SkillsFutureApi {
    pub fn new(http: HttpFetcher, endpoints: ApiEndpoints) -> Self {
        Self { http, endpoints }
    }

    pub fn search_request(&self, start: usize, rows: usize) -> FetchRequest {
        FetchRequest::get(&self.endpoints.search_url)
            .query(
                "query",
                format!("rows={rows}&facet=true&facet.mincount=1&json.nl=map&start={start}"),
            )
            .header("Accept", "application/json")
            .header("Referer", &self.endpoints.search_referer)
            .header("X-Requested-With", "XMLHttpRequest")
    }

    pub fn detail_request(&self, course_reference_number: &str) -> FetchRequest {
        let referer = self
            .endpoints
            .detail_referer_template
            .replace("{}", course_reference_number);
        FetchRequest::get(&self.endpoints.detail_url)
            .query("action", DETAIL_ACTION)
            .query("refNumber", course_reference_number)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("Referer", referer)
            .header("X-Requested-With", "XMLHttpRequest")
    }
}

#[async_trait]
impl CatalogApi for SkillsFutureApi {
    async fn search_page(&self, start: usize, rows: usize) -> Result<JsonValue, AdapterError> {
        let response = self
            .http
            .fetch("course-search", &self.search_request(start, rows))
            .await?;
        debug!(
            start,
            rows,
            status = %response.status,
            url = %response.final_url,
            bytes = response.body.len(),
            "search page downloaded"
        );
        Ok(serde_json::from_slice(&response.body)?)
    }

    async fn course_detail(
        &self,
        course_reference_number: &str,
    ) -> Result<JsonValue, AdapterError> {
        let response = self
            .http
            .fetch("course-detail", &self.detail_request(course_reference_number))
            .await?;
        debug!(
            course_reference_number,
            status = %response.status,
            url = %response.final_url,
            bytes = response.body.len(),
            "course detail downloaded"
        );
        Ok(serde_json::from_slice(&response.body)?)
    }
}
