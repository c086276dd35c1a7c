//! Client for creating user stories in Azure DevOps.
//!
//! One outbound POST per call, no retries: story creation is a user-triggered
//! action and a transient failure should surface to the caller instead of
//! being papered over. No timeout is imposed here either; the transport's
//! defaults apply.

use crate::error::{AzureError, Result};
use base64::Engine as _;
use serde_json::{Value, json};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://dev.azure.com";
const DEFAULT_API_VERSION: &str = "7.0";

/// Settings required to reach one Azure DevOps project.
#[derive(Debug, Clone)]
pub struct AzureDevOpsConfig {
    pub organization: String,
    pub project: String,
    pub personal_access_token: String,
    pub api_version: String,
    pub area_path: Option<String>,
    pub iteration_path: Option<String>,
    pub base_url: String,
}

impl AzureDevOpsConfig {
    #[must_use]
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        personal_access_token: impl Into<String>,
    ) -> Self {
        Self {
            organization: organization.into(),
            project: project.into(),
            personal_access_token: personal_access_token.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            area_path: None,
            iteration_path: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// A created work item, as echoed back by the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: u64,
    /// Canonical API URL (empty when the API omits it).
    pub url: String,
    /// Human-viewable URL from `_links.html.href`, when present.
    pub web_url: Option<String>,
    /// API-echoed title, falling back to the requested title.
    pub title: String,
}

#[derive(Debug)]
pub struct WorkItemClient {
    http: reqwest::Client,
    config: AzureDevOpsConfig,
}

impl WorkItemClient {
    /// Build a client from a static config.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured base URL is not a valid URL.
    pub fn new(config: AzureDevOpsConfig) -> Result<Self> {
        Url::parse(&config.base_url).map_err(|e| {
            AzureError::Config(format!(
                "Invalid Azure DevOps base URL '{}': {e}",
                config.base_url
            ))
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            config,
        })
    }

    /// Create a new "User Story" work item.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::Validation`] for an empty/whitespace-only title
    /// (no request is sent), [`AzureError::Api`] for a non-success response,
    /// [`AzureError::Transport`] for connection-level failures, and
    /// [`AzureError::Protocol`] when the response is missing a numeric `id`.
    pub async fn create_story(&self, title: &str, description: &str) -> Result<WorkItem> {
        if title.trim().is_empty() {
            return Err(AzureError::Validation(
                "story title must not be empty".to_string(),
            ));
        }

        let url = self.work_items_url();
        let document = self.build_patch_document(title, description);
        let body = serde_json::to_vec(&document)?;

        tracing::debug!(
            organization = %self.config.organization,
            project = %self.config.project,
            ops = document.len(),
            "creating work item"
        );

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json-patch+json")
            .header(reqwest::header::ACCEPT, "application/json")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", self.encode_pat()),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| AzureError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Best-effort body capture; fall back to the canonical reason.
            let body = response.text().await.unwrap_or_default();
            let body = if body.is_empty() {
                status.canonical_reason().unwrap_or("Unknown").to_string()
            } else {
                body
            };
            return Err(AzureError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AzureError::Transport(e.to_string()))?;
        parse_work_item(&payload, title)
    }

    fn work_items_url(&self) -> String {
        format!(
            "{}/{}/{}/_apis/wit/workitems/$User%20Story?api-version={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.organization,
            self.config.project,
            self.config.api_version
        )
    }

    fn encode_pat(&self) -> String {
        let credential = format!(":{}", self.config.personal_access_token);
        base64::engine::general_purpose::STANDARD.encode(credential)
    }

    fn build_patch_document(&self, title: &str, description: &str) -> Vec<Value> {
        let mut document = vec![
            patch_add("/fields/System.Title", json!(title)),
            patch_add(
                "/fields/System.Description",
                json!(format_description(description)),
            ),
        ];

        if let Some(area) = non_empty(self.config.area_path.as_deref()) {
            document.push(patch_add("/fields/System.AreaPath", json!(area)));
        }
        if let Some(iteration) = non_empty(self.config.iteration_path.as_deref()) {
            document.push(patch_add("/fields/System.IterationPath", json!(iteration)));
        }

        document
    }
}

fn patch_add(path: &str, value: Value) -> Value {
    json!({ "op": "add", "path": path, "value": value })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

/// Azure DevOps expects HTML in the description field: escape the basic
/// characters and translate newlines to `<br />` tags.
fn format_description(description: &str) -> String {
    if description.is_empty() {
        return String::new();
    }

    description
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\n', "<br />\n")
}

fn parse_work_item(payload: &Value, requested_title: &str) -> Result<WorkItem> {
    // A missing or non-numeric `id` is a protocol violation; fail loudly
    // instead of defaulting.
    let id = match payload.get("id") {
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            AzureError::Protocol(format!("work item response carried a non-integral id: {n}"))
        })?,
        Some(Value::String(s)) => s.parse().map_err(|_| {
            AzureError::Protocol(format!("work item response carried a non-numeric id: '{s}'"))
        })?,
        _ => {
            return Err(AzureError::Protocol(
                "work item response is missing the required 'id' field".to_string(),
            ));
        }
    };

    let url = payload
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // Missing/null nesting at any level yields None, never an error.
    let web_url = payload
        .pointer("/_links/html/href")
        .and_then(Value::as_str)
        .map(str::to_string);

    let title = payload
        .pointer("/fields/System.Title")
        .and_then(Value::as_str)
        .unwrap_or(requested_title)
        .to_string();

    Ok(WorkItem {
        id,
        url,
        web_url,
        title,
    })
}
