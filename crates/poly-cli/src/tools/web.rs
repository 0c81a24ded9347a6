//! Web search and crawl tools backed by the Tavily API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use poly_agent::tool::{
    Arguments, Tool, ToolError, ToolResult, optional_str, optional_str_list, optional_u64,
    required_str,
};
use poly_ai::{BackoffTransport, RetryConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::utils::truncate_chars;

pub const DEFAULT_SEARCH_URL: &str = "https://api.tavily.com/search";
pub const DEFAULT_CRAWL_URL: &str = "https://api.tavily.com/crawl";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
const SNIPPET_CHARS: usize = 200;

/// Shared settings for the web tools
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub api_key: Option<String>,
    pub search_url: String,
    pub crawl_url: String,
    pub retry: RetryConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            crawl_url: DEFAULT_CRAWL_URL.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl WebConfig {
    fn key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    fn transport(&self) -> BackoffTransport {
        let client = reqwest::Client::builder()
            .connect_timeout(BackoffTransport::CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        BackoffTransport::with_client(client).with_retry_config(self.retry.clone())
    }
}

fn setup_notice(tool: &str) -> String {
    format!(
        "{} needs a Tavily API key.\n\n\
         1. Sign up at https://tavily.com/ and create a free API key\n\
         2. Add it to the config file as `tavily_api_key = \"tvly-...\"`,\n   \
            or export TAVILY_API_KEY\n\n\
         Then run the request again.",
        tool
    )
}

async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
    transport: &BackoffTransport,
    url: &str,
    body: &B,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<R, ToolError> {
    let request = transport
        .client()
        .post(url)
        .timeout(timeout)
        .json(body)
        .build()
        .map_err(|e| ToolError::failed(format!("Failed to build request: {}", e)))?;

    let response = transport
        .clone()
        .with_response_timeout(timeout)
        .execute(request, cancel)
        .await
        .map_err(|e| {
            if e.is_cancelled() {
                ToolError::Cancelled
            } else {
                ToolError::failed(e.to_string())
            }
        })?;

    response
        .json()
        .await
        .map_err(|e| ToolError::failed(format!("Failed to decode response: {}", e)))
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u64,
    search_depth: &'a str,
    time_range: &'a str,
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Web search tool
pub struct WebSearchTool {
    config: Arc<WebConfig>,
    transport: BackoffTransport,
}

impl WebSearchTool {
    pub fn new(config: Arc<WebConfig>) -> Self {
        let transport = config.transport();
        Self { config, transport }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns titles, URLs and short snippets."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results, 1-10 (default: 5)"
                },
                "search_depth": {
                    "type": "string",
                    "enum": ["basic", "advanced"],
                    "description": "Search depth (default: basic)"
                },
                "time_range": {
                    "type": "string",
                    "enum": ["day", "week", "month", "year", "all"],
                    "description": "How recent results must be (default: month)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Arguments, cancel: CancellationToken) -> ToolResult {
        let Some(api_key) = self.config.key() else {
            return Ok(setup_notice("web_search"));
        };

        let query = required_str(&arguments, "query")?.trim();
        if query.is_empty() {
            return Err(ToolError::invalid("'query' must not be empty"));
        }
        let max_results = optional_u64(&arguments, "max_results").unwrap_or(5).clamp(1, 10);
        let search_depth = match optional_str(&arguments, "search_depth") {
            Some(d @ ("basic" | "advanced")) => d,
            _ => "basic",
        };
        let time_range = match optional_str(&arguments, "time_range") {
            Some(t @ ("day" | "week" | "month" | "year" | "all")) => t,
            _ => "month",
        };

        let body = SearchRequest {
            query,
            max_results,
            search_depth,
            time_range,
            api_key,
        };
        tracing::debug!("web_search: {:?} (max {})", query, max_results);
        let response: SearchResponse = post_json(
            &self.transport,
            &self.config.search_url,
            &body,
            SEARCH_TIMEOUT,
            &cancel,
        )
        .await?;

        Ok(format_search(query, &response.results))
    }
}

fn format_search(query: &str, results: &[SearchResult]) -> String {
    let mut out = format!("# Search results: {:?}\n\n", query);
    if results.is_empty() {
        out.push_str("No results found.\n");
        return out;
    }

    out.push_str(&format!("Found {} results:\n\n", results.len()));
    for (i, result) in results.iter().enumerate() {
        let title = result.title.replace('[', "\\[").replace(']', "\\]");
        out.push_str(&format!("## {}. [{}]({})\n\n", i + 1, title, result.url));
        if !result.content.is_empty() {
            let flat = result.content.split_whitespace().collect::<Vec<_>>().join(" ");
            out.push_str(&truncate_chars(&flat, SNIPPET_CHARS));
            out.push_str("\n\n");
        }
        out.push_str("---\n\n");
    }
    out
}

#[derive(Debug, Serialize)]
struct CrawlRequest<'a> {
    base_url: &'a str,
    max_depth: u64,
    max_links_per_level: u64,
    total_max_links: u64,
    format: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    include_patterns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    exclude_patterns: Vec<String>,
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct CrawlResponse {
    #[serde(default)]
    results: Vec<CrawlResult>,
}

#[derive(Debug, Deserialize)]
struct CrawlResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Website crawl tool
pub struct WebCrawlTool {
    config: Arc<WebConfig>,
    transport: BackoffTransport,
}

impl WebCrawlTool {
    pub fn new(config: Arc<WebConfig>) -> Self {
        let transport = config.transport();
        Self { config, transport }
    }
}

#[async_trait]
impl Tool for WebCrawlTool {
    fn name(&self) -> &str {
        "web_crawl"
    }

    fn description(&self) -> &str {
        "Crawl a website starting from a URL and return the content of the pages found. Good for reading whole documentation sites."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "base_url": {
                    "type": "string",
                    "description": "URL to start crawling from"
                },
                "max_depth": {
                    "type": "integer",
                    "description": "How many links deep to follow (default: 2)"
                },
                "max_links_per_level": {
                    "type": "integer",
                    "description": "Links followed per page (default: 10)"
                },
                "total_max_links": {
                    "type": "integer",
                    "description": "Total pages to crawl (default: 50)"
                },
                "format": {
                    "type": "string",
                    "enum": ["markdown", "text"],
                    "description": "Content format (default: markdown)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Crawl timeout in seconds, 10-150 (default: 60)"
                },
                "include_patterns": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "URL regex patterns to include"
                },
                "exclude_patterns": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "URL regex patterns to exclude"
                }
            },
            "required": ["base_url"]
        })
    }

    async fn execute(&self, arguments: Arguments, cancel: CancellationToken) -> ToolResult {
        let Some(api_key) = self.config.key() else {
            return Ok(setup_notice("web_crawl"));
        };

        let base_url = required_str(&arguments, "base_url")?.trim();
        if base_url.is_empty() {
            return Err(ToolError::invalid("'base_url' must not be empty"));
        }
        let timeout = optional_u64(&arguments, "timeout").unwrap_or(60).clamp(10, 150);
        let format = match optional_str(&arguments, "format") {
            Some(f @ ("markdown" | "text")) => f,
            _ => "markdown",
        };

        let body = CrawlRequest {
            base_url,
            max_depth: optional_u64(&arguments, "max_depth").unwrap_or(2),
            max_links_per_level: optional_u64(&arguments, "max_links_per_level").unwrap_or(10),
            total_max_links: optional_u64(&arguments, "total_max_links").unwrap_or(50),
            format,
            timeout,
            include_patterns: optional_str_list(&arguments, "include_patterns"),
            exclude_patterns: optional_str_list(&arguments, "exclude_patterns"),
            api_key,
        };
        tracing::debug!("web_crawl: {} (timeout {}s)", base_url, timeout);
        let response: CrawlResponse = post_json(
            &self.transport,
            &self.config.crawl_url,
            &body,
            Duration::from_secs(timeout + 10),
            &cancel,
        )
        .await?;

        Ok(format_crawl(base_url, &response.results))
    }
}

fn format_crawl(base_url: &str, results: &[CrawlResult]) -> String {
    let mut out = format!("# Crawl results: {}\n\n", base_url);
    if results.is_empty() {
        out.push_str("No pages were crawled.\n");
        return out;
    }

    out.push_str(&format!("Crawled {} pages:\n\n", results.len()));
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!("## Page {}: {}\n\n", i + 1, result.url));
        if !result.content.is_empty() {
            out.push_str(&result.content);
            out.push_str("\n\n");
        }
        out.push_str("---\n\n");
    }
    out
}
