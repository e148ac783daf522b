use crate::traits::{
    ChatRequest, ChatResponse, Message, Provider, ProviderEvent, ToolCall, ToolSpec,
};
use crate::providers::lines::LineBuffer;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCallRequest<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCallRequest<'a> {
    id: &'a str,
    r#type: &'a str,
    function: OpenAIFunctionRequest<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionRequest<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIToolFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    id: String,
    function: OpenAIFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

type PendingToolCalls = BTreeMap<usize, PendingToolCall>;

pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f64,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: api_key.into(),
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.0,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    fn convert_messages(messages: &[Message]) -> Vec<OpenAIMessage<'_>> {
        messages
            .iter()
            .map(|m| match m {
                Message::Assistant {
                    content,
                    tool_calls,
                } => {
                    let calls: Option<Vec<OpenAIToolCallRequest<'_>>> =
                        (!tool_calls.is_empty()).then(|| {
                            tool_calls
                                .iter()
                                .map(|tc| OpenAIToolCallRequest {
                                    id: &tc.id,
                                    r#type: "function",
                                    function: OpenAIFunctionRequest {
                                        name: &tc.name,
                                        arguments: &tc.arguments,
                                    },
                                })
                                .collect()
                        });
                    OpenAIMessage {
                        role: "assistant",
                        content: if content.is_empty() && calls.is_some() {
                            None
                        } else {
                            Some(content.as_str())
                        },
                        tool_calls: calls,
                        tool_call_id: None,
                    }
                }
                Message::Tool {
                    tool_call_id,
                    content,
                    ..
                } => OpenAIMessage {
                    role: "tool",
                    content: Some(content.as_str()),
                    tool_calls: None,
                    tool_call_id: Some(tool_call_id.as_str()),
                },
                other => OpenAIMessage {
                    role: other.role(),
                    content: Some(other.content()),
                    tool_calls: None,
                    tool_call_id: None,
                },
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolSpec]) -> Vec<OpenAITool> {
        tools
            .iter()
            .map(|t| OpenAITool {
                r#type: "function".to_string(),
                function: OpenAIToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters_schema.clone(),
                },
            })
            .collect()
    }

    fn build_request<'a>(&'a self, request: ChatRequest<'a>, stream: bool) -> OpenAIRequest<'a> {
        OpenAIRequest {
            model: &self.model,
            messages: Self::convert_messages(request.messages),
            tools: request
                .tools
                .filter(|t| !t.is_empty())
                .map(Self::convert_tools),
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, body: &OpenAIRequest<'_>) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "OpenAI API error {}: {}",
                status,
                error_text
            ));
        }

        Ok(response)
    }

    /// Maps a completion body onto a `ChatResponse`. Bodies that do not have
    /// the chat-completion shape are passed through as plain text.
    fn parse_body(body: serde_json::Value) -> anyhow::Result<ChatResponse> {
        if let Some(error) = body.get("error") {
            return Err(anyhow::anyhow!("OpenAI API error: {}", error));
        }

        let parsed = match serde_json::from_value::<OpenAIResponse>(body.clone()) {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!("Unrecognized completion shape, using it as text");
                return Ok(ChatResponse::text(body.to_string()));
            }
        };

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(anyhow::anyhow!("No choices in response"));
        };

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .map(|calls| {
                calls
                    .into_iter()
                    .map(|c| ToolCall {
                        id: c.id,
                        name: c.function.name,
                        arguments: c.function.arguments,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            text: choice.message.content,
            tool_calls,
        })
    }

    fn parse_sse_line(line: &str, pending: &mut PendingToolCalls) -> Vec<ProviderEvent> {
        let line = line.trim();

        if line.is_empty() || line == "data: [DONE]" {
            return vec![];
        }

        let Some(data) = line.strip_prefix("data:") else {
            return vec![];
        };
        let Ok(response) = serde_json::from_str::<StreamResponse>(data.trim()) else {
            return vec![];
        };
        let Some(choice) = response.choices.into_iter().next() else {
            return vec![];
        };

        let mut events = vec![];

        if let Some(content) = choice.delta.content
            && !content.is_empty()
        {
            events.push(ProviderEvent::Token(content));
        }

        if let Some(reasoning) = choice.delta.reasoning_content
            && !reasoning.is_empty()
        {
            events.push(ProviderEvent::Thinking(reasoning));
        }

        for stream_tc in choice.delta.tool_calls.unwrap_or_default() {
            let entry = pending.entry(stream_tc.index).or_default();
            if let Some(id) = stream_tc.id
                && !id.is_empty()
            {
                entry.id = id;
            }
            if let Some(func) = stream_tc.function {
                if let Some(name) = func.name
                    && !name.is_empty()
                {
                    entry.name = name;
                }
                entry.arguments.push_str(&func.arguments.unwrap_or_default());
            }
        }

        if choice.finish_reason.as_deref() == Some("tool_calls") {
            events.extend(Self::flush_tool_calls(pending));
        }

        events
    }

    fn flush_tool_calls(pending: &mut PendingToolCalls) -> Vec<ProviderEvent> {
        std::mem::take(pending)
            .into_values()
            .filter(|tc| !tc.name.is_empty())
            .map(|tc| {
                ProviderEvent::ToolCall(ToolCall {
                    id: if tc.id.is_empty() {
                        format!("call_{}", uuid::Uuid::new_v4().simple())
                    } else {
                        tc.id
                    },
                    name: tc.name,
                    arguments: tc.arguments,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        let body = self.build_request(request, false);
        let response = self.send(&body).await?;
        let value: serde_json::Value = response.json().await?;
        Self::parse_body(value)
    }

    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
    ) -> anyhow::Result<BoxStream<'static, ProviderEvent>> {
        let body = self.build_request(request, true);
        let response = self.send(&body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<ProviderEvent>(256);

        tokio::spawn(async move {
            use futures_util::StreamExt as _;
            let mut stream = response.bytes_stream();
            let mut lines = LineBuffer::default();
            let mut pending = PendingToolCalls::new();

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        lines.push(&chunk);

                        while let Some(line) = lines.next_line() {

                            for event in Self::parse_sse_line(&line, &mut pending) {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(ProviderEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            for event in Self::flush_tool_calls(&mut pending) {
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            let _ = tx.send(ProviderEvent::Done).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
