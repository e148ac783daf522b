use crate::traits::{
    ChatRequest, ChatResponse, Message, Provider, ProviderEvent, RemoteToolProvider, Tool,
    ToolCall, ToolContext, ToolResult,
};
use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub enum Step {
    Reply(ChatResponse),
    Fail(String),
    /// Raw events for `chat_stream`; `chat` folds them into a response.
    Events(Vec<ProviderEvent>),
    /// Emits the tokens, then never finishes.
    Hang(Vec<String>),
}

/// Plays back canned model turns in order and records what it was sent.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<Vec<Message>>>,
    tool_counts: Mutex<Vec<usize>>,
    streaming: bool,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(vec![]),
            tool_counts: Mutex::new(vec![]),
            streaming: true,
        }
    }

    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    pub fn text(text: &str) -> Step {
        Step::Reply(ChatResponse::text(text))
    }

    pub fn calls(calls: &[(&str, &str, &str)]) -> Step {
        Step::Reply(ChatResponse::with_tool_calls(
            None,
            calls
                .iter()
                .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
                .collect(),
        ))
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    /// Message count of each request, system prompt included.
    pub fn message_counts(&self) -> Vec<usize> {
        self.requests().iter().map(Vec::len).collect()
    }

    pub fn tool_counts(&self) -> Vec<usize> {
        self.tool_counts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap().len()
    }

    fn next(&self, request: &ChatRequest<'_>) -> Option<Step> {
        self.requests
            .lock()
            .unwrap()
            .push(request.messages.to_vec());
        self.tool_counts
            .lock()
            .unwrap()
            .push(request.tools.map(<[_]>::len).unwrap_or_default());
        self.steps.lock().unwrap().pop_front()
    }
}

fn response_events(response: ChatResponse) -> Vec<ProviderEvent> {
    let mut events: Vec<ProviderEvent> = response
        .text
        .unwrap_or_default()
        .split_inclusive(' ')
        .map(|t| ProviderEvent::Token(t.to_string()))
        .collect();
    events.extend(response.tool_calls.into_iter().map(ProviderEvent::ToolCall));
    events.push(ProviderEvent::Done);
    events
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        match self.next(&request) {
            Some(Step::Reply(response)) => Ok(response),
            Some(Step::Fail(message)) => Err(anyhow!(message)),
            Some(Step::Events(events)) => {
                let mut response = ChatResponse::default();
                let mut text = String::new();
                for event in events {
                    match event {
                        ProviderEvent::Token(t) => text.push_str(&t),
                        ProviderEvent::ToolCall(tc) => response.tool_calls.push(tc),
                        ProviderEvent::Error(e) => return Err(anyhow!(e)),
                        _ => {}
                    }
                }
                response.text = Some(text);
                Ok(response)
            }
            Some(Step::Hang(_)) => std::future::pending().await,
            None => Err(anyhow!("script exhausted")),
        }
    }

    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
    ) -> anyhow::Result<BoxStream<'static, ProviderEvent>> {
        let events = match self.next(&request) {
            Some(Step::Reply(response)) => response_events(response),
            Some(Step::Fail(message)) => return Err(anyhow!(message)),
            Some(Step::Events(events)) => events,
            Some(Step::Hang(tokens)) => {
                let tokens = tokens.into_iter().map(ProviderEvent::Token);
                return Ok(stream::iter(tokens).chain(stream::pending()).boxed());
            }
            None => return Err(anyhow!("script exhausted")),
        };
        Ok(stream::iter(events).boxed())
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}

/// Returns its arguments as output and counts invocations.
pub struct EchoTool {
    name: String,
    remote: bool,
    description: String,
    invocations: AtomicUsize,
}

impl EchoTool {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            remote: false,
            description: format!("echoes {}", name),
            invocations: AtomicUsize::new(0),
        }
    }

    fn remote(name: &str, provider: &str) -> Self {
        Self {
            name: name.to_string(),
            remote: true,
            description: format!("{} from {}", name, provider),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    fn is_remote(&self) -> bool {
        self.remote
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> anyhow::Result<ToolResult> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::success(
            json!({"tool": self.name, "thread": ctx.thread_id, "args": args}).to_string(),
        ))
    }
}

pub struct FailingTool {
    name: String,
    message: String,
}

impl FailingTool {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> anyhow::Result<ToolResult> {
        Err(anyhow!(self.message.clone()))
    }
}

pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "sleeps before answering"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> anyhow::Result<ToolResult> {
        tokio::time::sleep(self.delay).await;
        Ok(ToolResult::success("done"))
    }
}

pub struct PanickingTool {
    name: String,
    message: &'static str,
}

impl PanickingTool {
    pub fn new(name: &str, message: &'static str) -> Self {
        Self {
            name: name.to_string(),
            message,
        }
    }
}

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "panics when called"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> anyhow::Result<ToolResult> {
        panic!("{}", self.message)
    }
}

/// Remote provider serving echo tools, or failing discovery outright.
pub struct FakeRemoteProvider {
    name: String,
    tools: Vec<String>,
    fail: bool,
    closes: AtomicUsize,
}

impl FakeRemoteProvider {
    pub fn new(name: &str, tools: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            fail: false,
            closes: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, &[])
        }
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteToolProvider for FakeRemoteProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover(&self) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
        if self.fail {
            return Err(anyhow!("connection refused"));
        }
        Ok(self
            .tools
            .iter()
            .map(|t| Arc::new(EchoTool::remote(t, &self.name)) as Arc<dyn Tool>)
            .collect())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
