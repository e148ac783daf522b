use crate::traits::{
    ChatRequest, ChatResponse, Message, Provider, ProviderEvent, ToolCall, ToolSpec,
};
use crate::providers::lines::LineBuffer;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OllamaTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCallRequest>>,
}

#[derive(Debug, Serialize)]
struct OllamaToolCallRequest {
    function: OllamaFunctionRequest,
}

#[derive(Debug, Serialize)]
struct OllamaFunctionRequest {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    r#type: String,
    function: OllamaToolFunction,
}

#[derive(Debug, Serialize)]
struct OllamaToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OllamaToolCallResponse>>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCallResponse {
    function: OllamaFunctionResponse,
}

#[derive(Debug, Deserialize)]
struct OllamaFunctionResponse {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    message: Option<StreamMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OllamaToolCallResponse>>,
    #[serde(default)]
    thinking: Option<String>,
}

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
}

impl OllamaProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            temperature: 0.0,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let url = base_url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Tool results are folded into a user turn so models without native
    /// tool roles still see them in order.
    fn convert_messages(messages: &[Message]) -> Vec<OllamaMessage> {
        let mut result = Vec::new();
        let mut tool_results_buffer: Vec<String> = Vec::new();

        for m in messages {
            if let Message::Tool {
                tool_call_id,
                tool_name,
                content,
            } = m
            {
                tool_results_buffer.push(format!(
                    "<tool_result id=\"{}\" name=\"{}\">\n{}\n</tool_result>",
                    tool_call_id, tool_name, content
                ));
                continue;
            }

            flush_tool_results(&mut result, &mut tool_results_buffer);

            let tool_calls = m.has_tool_calls().then(|| {
                m.tool_calls()
                    .iter()
                    .map(|tc| OllamaToolCallRequest {
                        function: OllamaFunctionRequest {
                            name: tc.name.clone(),
                            arguments: serde_json::from_str(&tc.arguments)
                                .unwrap_or(serde_json::Value::Null),
                        },
                    })
                    .collect()
            });

            let content = m.content();
            result.push(OllamaMessage {
                role: m.role().to_string(),
                content: if content.is_empty() {
                    None
                } else {
                    Some(content.to_string())
                },
                tool_calls,
            });
        }

        flush_tool_results(&mut result, &mut tool_results_buffer);
        result
    }

    fn convert_tools(tools: &[ToolSpec]) -> Vec<OllamaTool> {
        tools
            .iter()
            .map(|t| OllamaTool {
                r#type: "function".to_string(),
                function: OllamaToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters_schema.clone(),
                },
            })
            .collect()
    }

    fn build_request(&self, request: ChatRequest<'_>, stream: bool) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(request.messages),
            tools: request
                .tools
                .filter(|t| !t.is_empty())
                .map(Self::convert_tools),
            options: Some(OllamaOptions {
                temperature: self.temperature,
            }),
            stream,
        }
    }

    async fn send(&self, body: &OllamaRequest) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Ollama API error ({}): {}",
                status,
                error_text
            ));
        }

        Ok(response)
    }

    fn to_tool_call(tc: OllamaToolCallResponse) -> ToolCall {
        ToolCall {
            id: format!("ollama_{}", uuid::Uuid::new_v4()),
            name: tc.function.name,
            arguments: serde_json::to_string(&tc.function.arguments).unwrap_or_default(),
        }
    }

    fn parse_stream_line(line: &str) -> Vec<ProviderEvent> {
        let line = line.trim();

        if line.is_empty() {
            return vec![];
        }

        let Ok(response) = serde_json::from_str::<StreamResponse>(line) else {
            return vec![];
        };

        if let Some(error) = response.error {
            return vec![ProviderEvent::Error(error)];
        }

        let Some(message) = response.message else {
            return vec![];
        };

        let mut events = vec![];
        if let Some(content) = message.content
            && !content.is_empty()
        {
            events.push(ProviderEvent::Token(content));
        }
        if let Some(thinking) = message.thinking
            && !thinking.is_empty()
        {
            events.push(ProviderEvent::Thinking(thinking));
        }
        events.extend(
            message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| ProviderEvent::ToolCall(Self::to_tool_call(tc))),
        );
        events
    }
}

fn flush_tool_results(result: &mut Vec<OllamaMessage>, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    result.push(OllamaMessage {
        role: "user".to_string(),
        content: Some(format!("[Tool results]\n{}", buffer.join("\n"))),
        tool_calls: None,
    });
    buffer.clear();
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        let body = self.build_request(request, false);
        let response = self.send(&body).await?;
        let ollama_response: OllamaResponse = response.json().await?;

        let tool_calls: Vec<ToolCall> = ollama_response
            .message
            .tool_calls
            .map(|tcs| tcs.into_iter().map(Self::to_tool_call).collect())
            .unwrap_or_default();

        // Thinking text is not part of the reply.
        let text = ollama_response.message.content;

        Ok(ChatResponse { text, tool_calls })
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

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        lines.push(&chunk);

                        while let Some(line) = lines.next_line() {

                            for event in Self::parse_stream_line(&line) {
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

            for event in Self::parse_stream_line(&lines.take_rest()) {
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            let _ = tx.send(ProviderEvent::Done).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
