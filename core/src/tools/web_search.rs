use crate::tools::{extract_string_arg, extract_usize_arg_opt};
use crate::traits::{Tool, ToolContext, ToolResult};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com/";
const DEFAULT_MAX_RESULTS: usize = 5;

/// Web lookups through the DuckDuckGo Instant Answer API.
pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: String,
}

impl WebSearchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: DUCKDUCKGO_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Flattens an Instant Answer body into readable lines. Nested topic groups
/// (`{"Name": .., "Topics": [..]}`) are walked one level deep.
fn format_instant_answer(body: &Value, max_results: usize) -> Option<String> {
    let mut lines = Vec::new();

    for key in ["Answer", "AbstractText", "Definition"] {
        if let Some(text) = body.get(key).and_then(Value::as_str)
            && !text.trim().is_empty()
        {
            let source = body
                .get("AbstractURL")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty() && key == "AbstractText");
            match source {
                Some(url) => lines.push(format!("{} ({})", text.trim(), url)),
                None => lines.push(text.trim().to_string()),
            }
        }
    }

    let topics = body
        .get("RelatedTopics")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .flat_map(|topic| match topic.get("Topics").and_then(Value::as_array) {
            Some(group) => group.iter().collect::<Vec<_>>(),
            None => vec![topic],
        })
        .filter_map(|topic| {
            let text = topic.get("Text").and_then(Value::as_str)?;
            let url = topic.get("FirstURL").and_then(Value::as_str).unwrap_or("");
            Some(if url.is_empty() {
                format!("- {}", text)
            } else {
                format!("- {} ({})", text, url)
            })
        })
        .take(max_results);
    lines.extend(topics);

    (!lines.is_empty()).then(|| lines.join("\n"))
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for general knowledge and current facts. Returns a short summary and related results."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of related results (default: 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> anyhow::Result<ToolResult> {
        let query = extract_string_arg(&args, "query")?;
        let max_results = extract_usize_arg_opt(&args, "max_results", DEFAULT_MAX_RESULTS);

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .with_context(|| format!("Web search failed for '{}'", query))?;

        if !response.status().is_success() {
            return Ok(ToolResult::error(format!(
                "Search service returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .context("Search service returned invalid JSON")?;

        Ok(ToolResult::success(
            format_instant_answer(&body, max_results)
                .unwrap_or_else(|| format!("No results found for '{}'.", query)),
        ))
    }
}
