use crate::tools::{RETRIEVAL_TOOL_NAME, extract_string_arg};
use crate::traits::{Tool, ToolContext, ToolResult};
use async_trait::async_trait;
use serde_json::json;

/// Answers from the document attached to the calling thread. The retriever
/// arrives through the `ToolContext`, never from the model's arguments.
pub struct RetrievalTool;

impl RetrievalTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RetrievalTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        RETRIEVAL_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Retrieve relevant passages from the document uploaded to this chat. \
         Use this tool when the user asks factual or conceptual questions \
         that might be answered from that document."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The user's query for searching the document"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> anyhow::Result<ToolResult> {
        let query = extract_string_arg(&args, "query")?;

        let Some(retriever) = &ctx.retriever else {
            return Ok(ToolResult::error(
                "No document indexed for this chat. Upload a document first.",
            ));
        };

        tracing::debug!(thread_id = %ctx.thread_id, query = %query, "Searching document");
        let passages = retriever.query(&query).await?;

        let context: Vec<&str> = passages.iter().map(|p| p.text.as_str()).collect();
        let metadata: Vec<&serde_json::Value> = passages.iter().map(|p| &p.metadata).collect();

        Ok(ToolResult::success(
            json!({
                "query": query,
                "context": context,
                "metadata": metadata,
            })
            .to_string(),
        ))
    }
}
