//! `web_search` — external search API wrapper. Opaque to the core beyond
//! the envelope shape.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ErrorKind, Tool, ToolContext, ToolEnvelope};

const SEARCH_ENDPOINT: &str = "https://google.serper.dev/search";

pub struct WebSearchTool {
    ctx: Arc<ToolContext>,
}

impl WebSearchTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, links and snippets for the top \
         results. Use for current events, facts you are unsure about, or \
         anything newer than your training data."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query."
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results to return (default 5, max 10).",
                    "minimum": 1,
                    "maximum": 10
                }
            },
            "required": ["query"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["query"]
    }

    async fn execute(&self, args: serde_json::Value) -> ToolEnvelope {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let count = args
            .get("count")
            .and_then(|v| v.as_u64())
            .unwrap_or(5)
            .min(10) as usize;

        let Some(api_key) = self.ctx.search_api_key.as_deref() else {
            return ToolEnvelope::failure(
                self.name(),
                ErrorKind::ExternalApi,
                "web search is not configured (providers.search_api_key missing)",
            );
        };

        debug!(query, count, "web search");

        let resp = match self
            .ctx
            .http
            .post(SEARCH_ENDPOINT)
            .header("X-API-KEY", api_key)
            .json(&serde_json::json!({ "q": query, "num": count }))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ToolEnvelope::failure(self.name(), ErrorKind::Network, e.to_string())
            }
        };

        let status = resp.status().as_u16();
        if status == 429 {
            return ToolEnvelope::failure(
                self.name(),
                ErrorKind::RateLimit,
                "search API rate limit reached",
            );
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return ToolEnvelope::failure(
                self.name(),
                ErrorKind::ExternalApi,
                format!("search API returned {status}: {text}"),
            );
        }

        let parsed: SearchResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::DataFormat,
                    format!("undecodable search response: {e}"),
                )
            }
        };

        let results: Vec<serde_json::Value> = parsed
            .organic
            .into_iter()
            .take(count)
            .map(|r| {
                serde_json::json!({
                    "title": r.title,
                    "link": r.link,
                    "snippet": r.snippet,
                })
            })
            .collect();

        ToolEnvelope::success(
            self.name(),
            serde_json::json!({
                "query": query,
                "result_count": results.len(),
                "results": results,
            }),
        )
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}
