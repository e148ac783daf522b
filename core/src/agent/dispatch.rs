use crate::agent::ToolRegistry;
use crate::error::AgentError;
use crate::retrieval::RetrievalContextStore;
use crate::tools::RETRIEVAL_TOOL_NAME;
use crate::traits::{Message, ToolCall, ToolContext};
use futures_util::FutureExt;
use serde_json::{Value, json};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs the calls of one assistant message and turns every outcome, failures
/// included, into a tool message bound to the originating call id.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    retrieval: Arc<RetrievalContextStore>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, retrieval: Arc<RetrievalContextStore>) -> Self {
        Self {
            registry,
            retrieval,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Sequential, in request order. Always one result per call.
    pub async fn dispatch_all(&self, thread_id: &str, calls: &[ToolCall]) -> Vec<Message> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.dispatch(thread_id, call).await);
        }
        results
    }

    pub async fn dispatch(&self, thread_id: &str, call: &ToolCall) -> Message {
        let content = match self.invoke(thread_id, call).await {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(thread_id, tool = %call.name, error = %err, "Tool call failed");
                render_error(&err)
            }
        };
        Message::tool_result(call.id.clone(), call.name.clone(), content)
    }

    async fn invoke(&self, thread_id: &str, call: &ToolCall) -> Result<String, AgentError> {
        let tool = self
            .registry
            .find(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        let args = call.parsed_arguments().map_err(|e| {
            AgentError::ToolInvocation(format!("invalid arguments for '{}': {}", call.name, e))
        })?;

        let mut ctx = ToolContext::new(thread_id);
        if call.name == RETRIEVAL_TOOL_NAME {
            let retriever = self
                .retrieval
                .lookup(thread_id)
                .ok_or(AgentError::RetrievalContextMissing)?;
            ctx = ctx.with_retriever(retriever);
        }

        tracing::debug!(thread_id, tool = %call.name, remote = tool.is_remote(), "Invoking tool");

        let execution = AssertUnwindSafe(tool.execute(Value::Object(args), &ctx)).catch_unwind();
        let result = tokio::time::timeout(self.timeout, execution)
            .await
            .map_err(|_| {
                AgentError::ToolInvocation(format!(
                    "tool '{}' timed out after {:?}",
                    call.name, self.timeout
                ))
            })?
            .map_err(|panic| {
                AgentError::ToolInvocation(format!(
                    "tool '{}' panicked: {}",
                    call.name,
                    panic_message(&*panic)
                ))
            })?
            .map_err(|e| AgentError::ToolInvocation(format!("{:#}", e)))?;

        if !result.success {
            tracing::warn!(thread_id, tool = %call.name, "Tool reported an error");
        }
        Ok(result.into_content())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn render_error(err: &AgentError) -> String {
    match err {
        AgentError::RetrievalContextMissing => json!({ "error": err.to_string() }).to_string(),
        other => format!("Error: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{EchoTool, FailingTool, PanickingTool, SlowTool};
    use crate::retrieval::{DocumentSource, KeywordIndexer};
    use crate::tools::RetrievalTool;

    fn dispatcher() -> (ToolDispatcher, Arc<EchoTool>, Arc<RetrievalContextStore>) {
        let registry = Arc::new(ToolRegistry::new());
        let echo = Arc::new(EchoTool::named("echo"));
        registry.register(echo.clone());
        registry.register(Arc::new(RetrievalTool::new()));
        registry.register(Arc::new(FailingTool::new("broken", "disk on fire")));
        registry.register(Arc::new(SlowTool::new("sleepy", Duration::from_secs(5))));
        registry.register(Arc::new(PanickingTool::new("explodes", "index out of range")));

        let retrieval = Arc::new(RetrievalContextStore::new(Arc::new(KeywordIndexer::new(
            200, 20, 2,
        ))));
        let dispatcher = ToolDispatcher::new(registry, retrieval.clone())
            .with_timeout(Duration::from_millis(50));
        (dispatcher, echo, retrieval)
    }

    #[tokio::test]
    async fn one_result_per_call_in_order() {
        let (dispatcher, echo, _) = dispatcher();
        let calls = vec![
            ToolCall::new("c1", "echo", r#"{"n": 1}"#),
            ToolCall::new("c2", "missing", "{}"),
            ToolCall::new("c3", "echo", r#"{"n": 3}"#),
        ];

        let results = dispatcher.dispatch_all("t1", &calls).await;
        assert_eq!(results.len(), 3);
        let ids: Vec<&str> = results
            .iter()
            .map(|m| match m {
                Message::Tool { tool_call_id, .. } => tool_call_id.as_str(),
                _ => panic!("expected tool message"),
            })
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(echo.invocations(), 2);

        let first: Value = serde_json::from_str(results[0].content()).unwrap();
        assert_eq!(first["args"]["n"], 1);
        assert_eq!(first["thread"], "t1");
    }

    #[tokio::test]
    async fn unknown_tool_is_content_not_error() {
        let (dispatcher, _, _) = dispatcher();
        let msg = dispatcher
            .dispatch("t1", &ToolCall::new("c1", "weather", "{}"))
            .await;
        assert_eq!(msg.content(), "Error: Tool 'weather' not found.");
        assert!(matches!(msg, Message::Tool { ref tool_name, .. } if tool_name == "weather"));
    }

    #[tokio::test]
    async fn unknown_tool_with_bad_arguments_is_not_found() {
        let (dispatcher, _, _) = dispatcher();
        let msg = dispatcher
            .dispatch("t1", &ToolCall::new("c1", "weather", "{not json"))
            .await;
        assert_eq!(msg.content(), "Error: Tool 'weather' not found.");
    }

    #[tokio::test]
    async fn panicking_tool_becomes_error_result() {
        let (dispatcher, _, _) = dispatcher();
        let results = dispatcher
            .dispatch_all(
                "t1",
                &[
                    ToolCall::new("c1", "explodes", "{}"),
                    ToolCall::new("c2", "echo", "{}"),
                ],
            )
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].content(),
            "Error: tool 'explodes' panicked: index out of range"
        );
        assert!(!results[1].content().starts_with("Error"));
    }

    #[tokio::test]
    async fn retrieval_without_document() {
        let (dispatcher, _, _) = dispatcher();
        let msg = dispatcher
            .dispatch("t1", &ToolCall::new("c1", RETRIEVAL_TOOL_NAME, r#"{"query": "x"}"#))
            .await;
        assert_eq!(
            msg.content(),
            r#"{"error":"No document indexed for this chat. Upload a document first."}"#
        );
    }

    #[tokio::test]
    async fn retrieval_uses_thread_document() {
        let (dispatcher, _, retrieval) = dispatcher();
        retrieval
            .associate(
                "t1",
                DocumentSource::text("faq.txt", "Refunds are processed within five business days."),
            )
            .await
            .unwrap();

        let call = ToolCall::new("c1", RETRIEVAL_TOOL_NAME, r#"{"query": "refunds"}"#);
        let msg = dispatcher.dispatch("t1", &call).await;
        let body: Value = serde_json::from_str(msg.content()).unwrap();
        assert!(body["context"][0].as_str().unwrap().contains("Refunds"));

        let other = dispatcher.dispatch("t2", &call).await;
        assert!(other.content().contains("No document indexed"));
    }

    #[tokio::test]
    async fn malformed_arguments() {
        let (dispatcher, echo, _) = dispatcher();
        let msg = dispatcher
            .dispatch("t1", &ToolCall::new("c1", "echo", "{not json"))
            .await;
        assert!(msg.content().starts_with("Error: invalid arguments for 'echo':"));

        let msg = dispatcher
            .dispatch("t1", &ToolCall::new("c2", "echo", "[1, 2]"))
            .await;
        assert!(msg.content().starts_with("Error: invalid arguments for 'echo':"));
        assert_eq!(echo.invocations(), 0);

        let msg = dispatcher
            .dispatch("t1", &ToolCall::new("c3", "echo", ""))
            .await;
        assert!(!msg.content().starts_with("Error"));
        assert_eq!(echo.invocations(), 1);
    }

    #[tokio::test]
    async fn failure_and_timeout_become_content() {
        let (dispatcher, _, _) = dispatcher();
        let msg = dispatcher
            .dispatch("t1", &ToolCall::new("c1", "broken", "{}"))
            .await;
        assert_eq!(msg.content(), "Error: disk on fire");

        let msg = dispatcher
            .dispatch("t1", &ToolCall::new("c2", "sleepy", "{}"))
            .await;
        assert_eq!(msg.content(), "Error: tool 'sleepy' timed out after 50ms");
    }
}
