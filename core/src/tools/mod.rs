use crate::config::Config;
use crate::providers::resolve_api_key;
use crate::traits::Tool;
use serde_json::Value;
use std::sync::Arc;

pub mod retrieval;
pub mod stock_price;
pub mod web_search;

pub use retrieval::RetrievalTool;
pub use stock_price::StockPriceTool;
pub use web_search::WebSearchTool;

/// Reserved name: the dispatcher injects the thread's retriever for this tool
/// and refuses the call when none is associated.
pub const RETRIEVAL_TOOL_NAME: &str = "rag_tool";

pub fn create_local_tools(config: &Config) -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = vec![Arc::new(RetrievalTool::new())];

    let stock_key = resolve_api_key(
        &["ALPHAVANTAGE_API_KEY"],
        config.tools.stock_api_key.as_deref().unwrap_or_default(),
    );
    tools.push(Arc::new(StockPriceTool::new(stock_key)));

    if config.tools.web_search {
        tools.push(Arc::new(WebSearchTool::new()));
    }

    tools
}

pub fn extract_string_arg(args: &Value, key: &str) -> anyhow::Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' parameter", key))
        .map(|s| s.to_string())
}

pub fn extract_usize_arg_opt(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_arg_rejects_blank() {
        assert_eq!(
            extract_string_arg(&json!({"q": " rust "}), "q").unwrap(),
            "rust"
        );
        assert!(extract_string_arg(&json!({"q": "  "}), "q").is_err());
        assert!(extract_string_arg(&json!({}), "q").is_err());
        assert!(extract_string_arg(&json!({"q": 3}), "q").is_err());
    }

    #[test]
    fn local_tools_respect_config() {
        let mut config = Config::default();
        let names: Vec<String> = create_local_tools(&config)
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["rag_tool", "stock_price", "web_search"]);

        config.tools.web_search = false;
        assert_eq!(create_local_tools(&config).len(), 2);
    }
}
