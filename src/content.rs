//! Notion content source: database pagination and block text extraction.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Public Notion API root.
pub const NOTION_API_URL: &str = "https://api.notion.com/v1";
/// `Notion-Version` header sent with every request.
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";

const PAGE_SIZE: usize = 100;
const MAX_BLOCK_DEPTH: usize = 3;

/// Structural role of a content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockKind {
    /// Heading of level 1 to 3.
    Heading {
        /// Heading depth.
        level: u8,
    },
    /// Body text, toggles and callouts.
    Paragraph,
    /// Bulleted, numbered or to-do item.
    ListItem,
    /// Code.
    Preformatted,
    /// Quotation.
    Quote,
}

/// One block's plain text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentBlock {
    /// Block role.
    pub kind: BlockKind,
    /// Concatenated rich-text content.
    pub text: String,
}

impl ContentBlock {
    /// Convenience constructor.
    pub fn new(kind: BlockKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// A page listed by the content source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourcePage {
    /// Page identifier.
    pub id: String,
    /// Title, when the page has a non-empty one.
    pub title: Option<String>,
}

impl SourcePage {
    /// The page title, or a `PartialData` error for untitled pages.
    pub fn require_title(&self) -> Result<&str> {
        self.title
            .as_deref()
            .ok_or_else(|| Error::PartialData(format!("page {} has no title", self.id)))
    }
}

/// Where indexed pages come from.
pub trait ContentSource: Send + Sync {
    /// Every page in the dataset, following pagination to the end.
    fn fetch_pages(&self) -> Result<Vec<SourcePage>>;

    /// Typed text blocks of one page, in document order.
    fn fetch_blocks(&self, page_id: &str) -> Result<Vec<ContentBlock>>;
}

/// Page text handed to the chunker: one line per non-empty block.
pub fn page_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .map(|block| block.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Blocking client for a single Notion database.
#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: String,
    database_id: String,
    retry: RetryPolicy,
}

impl NotionClient {
    /// Builds a client; a blank key or database id is a configuration error.
    pub fn new(
        api_key: &str,
        database_id: &str,
        version: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("missing Notion API key".to_string()));
        }
        if database_id.trim().is_empty() {
            return Err(Error::Config("missing Notion database id".to_string()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .map_err(|_| Error::Config("invalid Notion API key".to_string()))?,
        );
        headers.insert(
            HeaderName::from_static("notion-version"),
            HeaderValue::from_str(version)
                .map_err(|_| Error::Config(format!("invalid Notion version {version:?}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| Error::Config(format!("failed to build Notion HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url: NOTION_API_URL.to_string(),
            database_id: database_id.trim().to_string(),
            retry,
        })
    }

    /// Points the client at another API root (proxies, mocks).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn fetch<T, F>(&self, operation: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        self.retry.run(operation, |_| {
            let resp = build(&self.http)
                .send()
                .map_err(|err| Error::from_transport(operation, err))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp
                    .text()
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                return Err(Error::from_status(status, body));
            }
            resp.json()
                .map_err(|err| Error::from_transport(operation, err))
        })
    }

    fn block_children(&self, block_id: &str, depth: usize, out: &mut Vec<ContentBlock>) -> Result<()> {
        let url = format!("{}/blocks/{}/children", self.base_url, block_id);
        let mut cursor: Option<String> = None;
        loop {
            let page_size = PAGE_SIZE.to_string();
            let listing: Listing = self.fetch("notion block children", |http| {
                let mut req = http.get(&url).query(&[("page_size", page_size.as_str())]);
                if let Some(cursor) = &cursor {
                    req = req.query(&[("start_cursor", cursor.as_str())]);
                }
                req
            })?;
            for raw in &listing.results {
                if let Some(block) = block_from_value(raw) {
                    out.push(block);
                }
                if depth < MAX_BLOCK_DEPTH && descends_into(raw) {
                    if let Some(child_id) = raw.get("id").and_then(Value::as_str) {
                        self.block_children(child_id, depth + 1, out)?;
                    }
                }
            }
            match listing.next() {
                Some(next) => cursor = Some(next),
                None => return Ok(()),
            }
        }
    }
}

impl ContentSource for NotionClient {
    fn fetch_pages(&self) -> Result<Vec<SourcePage>> {
        let url = format!("{}/databases/{}/query", self.base_url, self.database_id);
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }
            let listing: Listing =
                self.fetch("notion database query", |http| http.post(&url).json(&body))?;
            info!(fetched = listing.results.len(), "fetched pages from Notion");
            pages.extend(listing.results.iter().filter_map(page_from_value));
            match listing.next() {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(pages)
    }

    fn fetch_blocks(&self, page_id: &str) -> Result<Vec<ContentBlock>> {
        let mut blocks = Vec::new();
        self.block_children(page_id, 0, &mut blocks)?;
        debug!(page_id, blocks = blocks.len(), "fetched page blocks");
        Ok(blocks)
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl Listing {
    fn next(&self) -> Option<String> {
        if self.has_more {
            self.next_cursor.clone()
        } else {
            None
        }
    }
}

fn page_from_value(raw: &Value) -> Option<SourcePage> {
    let id = raw.get("id").and_then(Value::as_str)?;
    Some(SourcePage {
        id: id.to_string(),
        title: page_title(raw),
    })
}

/// Text of the first `title`-typed property, if non-empty.
pub fn page_title(page: &Value) -> Option<String> {
    let properties = page.get("properties")?.as_object()?;
    let property = properties
        .values()
        .find(|prop| prop.get("type").and_then(Value::as_str) == Some("title"))?;
    let title = rich_text(property.get("title")?);
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

fn rich_text(value: &Value) -> String {
    value
        .as_array()
        .map(|spans| {
            spans
                .iter()
                .filter_map(|span| {
                    span.get("plain_text")
                        .or_else(|| span.pointer("/text/content"))
                        .and_then(Value::as_str)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Maps a raw Notion block to its text; unsupported block types yield `None`.
pub fn block_from_value(raw: &Value) -> Option<ContentBlock> {
    let kind_name = raw.get("type").and_then(Value::as_str)?;
    let kind = match kind_name {
        "paragraph" | "toggle" | "callout" => BlockKind::Paragraph,
        "heading_1" => BlockKind::Heading { level: 1 },
        "heading_2" => BlockKind::Heading { level: 2 },
        "heading_3" => BlockKind::Heading { level: 3 },
        "bulleted_list_item" | "numbered_list_item" | "to_do" => BlockKind::ListItem,
        "code" => BlockKind::Preformatted,
        "quote" => BlockKind::Quote,
        _ => return None,
    };
    let text = rich_text(raw.get(kind_name)?.get("rich_text")?);
    Some(ContentBlock { kind, text })
}

fn descends_into(raw: &Value) -> bool {
    let has_children = raw
        .get("has_children")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    // child pages are listed by the database on their own
    let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
    has_children && !matches!(kind, "child_page" | "child_database")
}
