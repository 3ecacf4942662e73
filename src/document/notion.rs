//! Notion pages API client.
//!
//! Each job becomes one page in a configured database: the page title comes
//! from the plan, the optional due date from the task, and the body lists the
//! task, its summary, the to-do items and (when present) the research.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::DocumentError;
use crate::pipeline::{
    DocumentRef, DocumentRequest, DocumentSink, PlanOutput, ResearchOutput, StageError,
};

/// Notion REST API base URL.
pub const NOTION_API_BASE: &str = "https://api.notion.com/v1";

/// `Notion-Version` header sent when none is configured.
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";

/// Name of the database's title property when none is configured.
pub const DEFAULT_TITLE_PROP: &str = "Name";

const NOTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Notion caps a single rich text object at this many characters.
const RICH_TEXT_LIMIT: usize = 2000;

/// Connection and schema settings for the target database.
#[derive(Debug, Clone)]
pub struct NotionConfig {
    pub integration_secret: String,
    pub database_id: String,
    /// Property holding the page title.
    pub title_prop: String,
    /// Date property filled from the task's due date, if the database has one.
    pub due_prop: Option<String>,
    pub version: String,
    pub api_base: String,
}

impl NotionConfig {
    pub fn new(integration_secret: impl Into<String>, database_id: impl Into<String>) -> Self {
        Self {
            integration_secret: integration_secret.into(),
            database_id: database_id.into(),
            title_prop: DEFAULT_TITLE_PROP.to_string(),
            due_prop: None,
            version: DEFAULT_NOTION_VERSION.to_string(),
            api_base: NOTION_API_BASE.to_string(),
        }
    }

    pub fn with_title_prop(mut self, title_prop: impl Into<String>) -> Self {
        self.title_prop = title_prop.into();
        self
    }

    pub fn with_due_prop(mut self, due_prop: Option<String>) -> Self {
        self.due_prop = due_prop.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

/// Creates one Notion page per enriched task.
pub struct NotionClient {
    config: NotionConfig,
    http_client: Client,
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotionErrorResponse {
    #[serde(default)]
    code: String,
    message: String,
}

impl NotionClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns `DocumentError::MissingConfig` if the secret or the database id
    /// is empty.
    pub fn new(config: NotionConfig) -> Result<Self, DocumentError> {
        if config.integration_secret.trim().is_empty() {
            return Err(DocumentError::MissingConfig("NOTION_INTEGRATION_SECRET"));
        }
        if config.database_id.trim().is_empty() {
            return Err(DocumentError::MissingConfig("NOTION_DATABASE_ID"));
        }

        let http_client = Client::builder()
            .timeout(NOTION_TIMEOUT)
            .build()
            .map_err(|e| DocumentError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Creates a page and returns its id and URL.
    pub async fn create_page(
        &self,
        request: DocumentRequest<'_>,
    ) -> Result<DocumentRef, DocumentError> {
        let body = page_body(&self.config, request);
        let url = format!("{}/pages", self.config.api_base);

        debug!(database_id = %self.config.database_id, "Creating Notion page");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.integration_secret)
            .header("Notion-Version", &self.config.version)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            let message = match serde_json::from_str::<NotionErrorResponse>(&text) {
                Ok(err) if !err.code.is_empty() => format!("{}: {}", err.code, err.message),
                Ok(err) => err.message,
                Err(_) => text,
            };
            return Err(DocumentError::ApiError {
                code: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        let page: PageResponse = serde_json::from_str(&text)?;
        let document = document_ref(page)?;

        info!(page_id = %document.document_id, "Notion page created");
        Ok(document)
    }
}

#[async_trait]
impl DocumentSink for NotionClient {
    async fn create_document(&self, request: DocumentRequest<'_>) -> Result<DocumentRef, StageError> {
        Ok(self.create_page(request).await?)
    }
}

fn document_ref(page: PageResponse) -> Result<DocumentRef, DocumentError> {
    if page.id.is_empty() {
        return Err(DocumentError::MissingPageId);
    }
    let document_url = match page.url {
        Some(url) if !url.is_empty() => url,
        _ => fallback_page_url(&page.id),
    };
    Ok(DocumentRef {
        document_id: page.id,
        document_url,
    })
}

/// Public URL of a page, derived from its id.
pub fn fallback_page_url(page_id: &str) -> String {
    format!("https://www.notion.so/{}", page_id.replace('-', ""))
}

/// Full request body for `POST /pages`.
pub fn page_body(config: &NotionConfig, request: DocumentRequest<'_>) -> Value {
    json!({
        "parent": { "database_id": config.database_id },
        "properties": build_properties(
            &config.title_prop,
            config.due_prop.as_deref(),
            &request.plan.document_title,
            request.payload.task_date,
        ),
        "children": build_blocks(&request.payload.task_content, request.plan, request.research),
    })
}

/// Page properties: the title, plus the due date when both the property and
/// the date exist.
pub fn build_properties(
    title_prop: &str,
    due_prop: Option<&str>,
    title: &str,
    task_date: Option<DateTime<FixedOffset>>,
) -> Value {
    let mut props = Map::new();
    props.insert(title_prop.to_string(), json!({ "title": rich_text(title) }));
    if let (Some(due_prop), Some(task_date)) = (due_prop, task_date) {
        props.insert(
            due_prop.to_string(),
            json!({ "date": { "start": task_date.to_rfc3339() } }),
        );
    }
    Value::Object(props)
}

/// Page body blocks.
///
/// Layout: task content, summary, a "Todos" heading with one unchecked to-do
/// per human todo, then a "Deep Research" section when research ran.
pub fn build_blocks(
    task_content: &str,
    plan: &PlanOutput,
    research: Option<&ResearchOutput>,
) -> Vec<Value> {
    let mut blocks = vec![
        text_block("paragraph", task_content),
        text_block("paragraph", &plan.summary),
        text_block("heading_2", "Todos"),
    ];

    blocks.extend(plan.human_todos.iter().map(|todo| {
        json!({
            "object": "block",
            "type": "to_do",
            "to_do": { "rich_text": rich_text(todo), "checked": false },
        })
    }));

    if let Some(research) = research {
        blocks.push(text_block("heading_2", "Deep Research"));
        blocks.push(text_block("paragraph", &research.research_summary));
        blocks.push(text_block("heading_3", "Key takeaways"));
        blocks.extend(
            research
                .key_takeaways
                .iter()
                .map(|t| text_block("bulleted_list_item", t)),
        );
        blocks.push(text_block("heading_3", "Sources"));
        blocks.extend(
            research
                .sources
                .iter()
                .map(|s| text_block("bulleted_list_item", s)),
        );
    }

    blocks
}

fn text_block(block_type: &str, content: &str) -> Value {
    json!({
        "object": "block",
        "type": block_type,
        block_type: { "rich_text": rich_text(content) },
    })
}

/// Rich text array for `content`, split into segments Notion accepts.
fn rich_text(content: &str) -> Value {
    let chars: Vec<char> = content.chars().collect();
    if chars.is_empty() {
        return json!([{ "type": "text", "text": { "content": "" } }]);
    }
    Value::Array(
        chars
            .chunks(RICH_TEXT_LIMIT)
            .map(|chunk| {
                let segment: String = chunk.iter().collect();
                json!({ "type": "text", "text": { "content": segment } })
            })
            .collect(),
    )
}
