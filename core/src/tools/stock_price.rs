use crate::tools::extract_string_arg;
use crate::traits::{Tool, ToolContext, ToolResult};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";

pub struct StockPriceTool {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl StockPriceTool {
    pub fn new(api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key,
            base_url: ALPHA_VANTAGE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Tool for StockPriceTool {
    fn name(&self) -> &str {
        "stock_price"
    }

    fn description(&self) -> &str {
        "Fetch the latest stock quote for a ticker symbol (e.g. 'AAPL') using Alpha Vantage. \
         Returns the raw GLOBAL_QUOTE JSON."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": {
                    "type": "string",
                    "description": "Ticker symbol, e.g. AAPL or MSFT"
                }
            },
            "required": ["symbol"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> anyhow::Result<ToolResult> {
        let symbol = match extract_string_arg(&args, "symbol") {
            Ok(symbol) => symbol.to_uppercase(),
            Err(e) => return Ok(ToolResult::error(e.to_string())),
        };

        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(ToolResult::error(
                "No Alpha Vantage API key configured (set ALPHAVANTAGE_API_KEY)",
            ));
        };

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol.as_str()),
                ("apikey", api_key),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to fetch quote for {}", symbol))?;

        if !response.status().is_success() {
            return Ok(ToolResult::error(format!(
                "Alpha Vantage returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Alpha Vantage returned invalid JSON")?;

        Ok(ToolResult::success(body.to_string()))
    }
}
