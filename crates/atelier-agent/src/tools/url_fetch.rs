//! `url_fetch` — download a page and return its text content.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{ErrorKind, Tool, ToolContext, ToolEnvelope};

/// Cap on returned characters to protect the context window.
const MAX_CONTENT_CHARS: usize = 20_000;

pub struct UrlFetchTool {
    ctx: Arc<ToolContext>,
}

impl UrlFetchTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for UrlFetchTool {
    fn name(&self) -> &str {
        "url_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its text content (HTML tags stripped). Use \
         after web_search to read a result in full. Output is truncated at \
         20000 characters."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL to fetch."
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 20).",
                    "minimum": 1
                }
            },
            "required": ["url"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["url"]
    }

    async fn execute(&self, args: serde_json::Value) -> ToolEnvelope {
        let url = args.get("url").and_then(|v| v.as_str()).unwrap_or_default();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolEnvelope::failure(
                self.name(),
                ErrorKind::ParameterValidation,
                "url must start with http:// or https://",
            );
        }
        let timeout = args.get("timeout").and_then(|v| v.as_u64()).unwrap_or(20);

        debug!(url, "fetching url");

        let resp = match self
            .ctx
            .http
            .get(url)
            .timeout(Duration::from_secs(timeout))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ToolEnvelope::failure(self.name(), ErrorKind::Network, e.to_string())
            }
        };

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return ToolEnvelope::failure(
                self.name(),
                ErrorKind::ExternalApi,
                format!("fetch returned HTTP {status}"),
            );
        }

        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                return ToolEnvelope::failure(self.name(), ErrorKind::DataFormat, e.to_string())
            }
        };

        let text = strip_html(&body);
        let truncated = text.chars().count() > MAX_CONTENT_CHARS;
        let text = if truncated {
            text.chars().take(MAX_CONTENT_CHARS).collect::<String>()
        } else {
            text
        };

        ToolEnvelope::success(
            self.name(),
            serde_json::json!({
                "url": url,
                "content": text,
                "truncated": truncated,
            }),
        )
    }
}

/// Crude tag stripper: drops script/style bodies, removes tags, collapses
/// blank runs. Enough for the model to read article text.
fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut skip_until: Option<usize> = None;

    for (i, c) in html.char_indices() {
        if let Some(end) = skip_until {
            if i < end {
                continue;
            }
            skip_until = None;
        }

        if c == '<' {
            let rest = &html[i..];
            for (open, close) in [("<script", "</script>"), ("<style", "</style>")] {
                if starts_with_ignore_case(rest, open) {
                    if let Some(pos) = find_ignore_case(rest, close) {
                        skip_until = Some(i + pos + close.len());
                    }
                }
            }
            if skip_until.is_none() {
                // Skip the tag itself.
                if let Some(pos) = html[i..].find('>') {
                    skip_until = Some(i + pos + 1);
                }
            }
            continue;
        }
        out.push(c);
    }

    // Collapse whitespace runs into single spaces / newlines.
    let mut collapsed = String::with_capacity(out.len());
    let mut last_was_space = false;
    for c in out.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                collapsed.push(if c == '\n' { '\n' } else { ' ' });
            }
            last_was_space = true;
        } else {
            collapsed.push(c);
            last_was_space = false;
        }
    }
    collapsed.trim().to_string()
}

fn starts_with_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .as_bytes()
        .get(..needle.len())
        .map(|head| head.eq_ignore_ascii_case(needle.as_bytes()))
        .unwrap_or(false)
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .filter(|i| haystack.is_char_boundary(*i))
        .find(|i| starts_with_ignore_case(&haystack[*i..], needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_scripts() {
        let html = "<html><head><style>body{color:red}</style></head>\
                    <body><h1>Title</h1><script>alert(1)</script><p>Hello  world</p></body></html>";
        let text = strip_html(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Hello world"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
    }
}
