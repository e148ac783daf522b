use crate::remote::McpTransport;
use crate::traits::{Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

/// A tool advertised by an MCP server. Calls go over the server's transport.
pub struct McpTool {
    server: String,
    name: String,
    description: String,
    input_schema: Value,
    transport: Arc<dyn McpTransport>,
}

impl McpTool {
    pub fn new(
        server: impl Into<String>,
        definition: &Value,
        transport: Arc<dyn McpTransport>,
    ) -> Option<Self> {
        let name = definition.get("name")?.as_str()?.to_string();
        let description = definition
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("MCP tool")
            .to_string();
        let input_schema = definition
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}}));

        Some(Self {
            server: server.into(),
            name,
            description,
            input_schema,
            transport,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

/// Joins the text parts of a `tools/call` result. Non-text parts are noted
/// by type; `structuredContent` is used when nothing else is present.
pub(crate) fn render_call_result(result: &Value) -> String {
    let parts: Vec<String> = result
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|part| match part.get("type").and_then(Value::as_str) {
            Some("text") => part
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some(other) => format!("[{} content]", other),
            None => part.to_string(),
        })
        .collect();

    if !parts.is_empty() {
        return parts.join("\n");
    }

    result
        .get("structuredContent")
        .map(Value::to_string)
        .unwrap_or_default()
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let result = self
            .transport
            .request(
                "tools/call",
                json!({
                    "name": self.name,
                    "arguments": args,
                }),
            )
            .await?;

        let text = render_call_result(&result);
        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(ToolResult::error(text));
        }
        Ok(ToolResult::success(text))
    }
}
