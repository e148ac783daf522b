use crate::agent::{ContextBuilder, ToolDispatcher, ToolRegistry};
use crate::error::AgentError;
use crate::providers::normalize_response;
use crate::retrieval::RetrievalContextStore;
use crate::traits::{ChatRequest, ChatResponse, Message, Provider, ProviderEvent, ToolSpec};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_MAX_TOOL_ROUNDS: usize = 20;

pub type FragmentSender = mpsc::Sender<Result<String, AgentError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    ToolLimitExceeded,
}

/// Messages one turn produced, starting with the user message and ending
/// with the assistant reply.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub messages: Vec<Message>,
    pub stop_reason: StopReason,
    pub tool_rounds: usize,
}

impl TurnOutcome {
    pub fn reply(&self) -> Message {
        self.messages
            .last()
            .cloned()
            .unwrap_or_else(|| Message::assistant(""))
    }
}

pub fn tool_limit_notice(rounds: usize) -> String {
    format!(
        "Tool-call limit exceeded ({} rounds); stopping this turn.",
        rounds
    )
}

pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    context_builder: ContextBuilder,
    dispatcher: ToolDispatcher,
    retrieval: Arc<RetrievalContextStore>,
    max_tool_rounds: usize,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        context_builder: ContextBuilder,
        dispatcher: ToolDispatcher,
        retrieval: Arc<RetrievalContextStore>,
    ) -> Self {
        Self {
            provider,
            context_builder,
            dispatcher,
            retrieval,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, max: usize) -> Self {
        self.max_tool_rounds = max;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.dispatcher.registry()
    }

    pub fn retrieval(&self) -> &Arc<RetrievalContextStore> {
        &self.retrieval
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn run_turn(
        &self,
        thread_id: &str,
        history: &[Message],
        user_message: Message,
    ) -> Result<TurnOutcome, AgentError> {
        self.run(thread_id, history, user_message, None)
            .await?
            .ok_or_else(|| AgentError::ModelBackend("turn ended without a reply".into()))
    }

    /// Runs a turn, forwarding Reasoning text to `tx` as it arrives. Returns
    /// `Ok(None)` when the receiver went away before the turn finished.
    pub async fn run_streaming(
        &self,
        thread_id: &str,
        history: &[Message],
        user_message: Message,
        tx: &FragmentSender,
    ) -> Result<Option<TurnOutcome>, AgentError> {
        self.run(thread_id, history, user_message, Some(tx)).await
    }

    /// Standalone streaming turn with no checkpointing. Dropping the stream
    /// cancels the turn.
    pub fn stream_turn(
        self: &Arc<Self>,
        thread_id: &str,
        history: Vec<Message>,
        user_message: Message,
    ) -> BoxStream<'static, Result<String, AgentError>> {
        let (tx, rx) = mpsc::channel(64);
        let agent = Arc::clone(self);
        let thread_id = thread_id.to_string();

        tokio::spawn(async move {
            if let Err(e) = agent
                .run_streaming(&thread_id, &history, user_message, &tx)
                .await
            {
                let _ = tx.send(Err(e)).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn run(
        &self,
        thread_id: &str,
        history: &[Message],
        user_message: Message,
        tx: Option<&FragmentSender>,
    ) -> Result<Option<TurnOutcome>, AgentError> {
        let specs = self.registry().get_specs();
        let document = self.retrieval.document(thread_id);

        let mut conversation = self.context_builder.build_messages(
            thread_id,
            &specs,
            document.as_ref(),
            history,
        );
        let turn_start = conversation.len();
        conversation.push(user_message);

        let mut rounds = 0usize;

        loop {
            tracing::debug!(thread_id, round = rounds, "Reasoning");
            let Some(assistant) = self.reason(&conversation, &specs, tx).await? else {
                tracing::debug!(thread_id, round = rounds, "Turn cancelled while reasoning");
                return Ok(None);
            };

            if !assistant.has_tool_calls() {
                conversation.push(assistant);
                tracing::info!(
                    thread_id,
                    tool_rounds = rounds,
                    provider = self.provider.name(),
                    "Turn complete"
                );
                return Ok(Some(TurnOutcome {
                    messages: conversation.split_off(turn_start),
                    stop_reason: StopReason::Completed,
                    tool_rounds: rounds,
                }));
            }

            if rounds >= self.max_tool_rounds {
                let notice = tool_limit_notice(rounds);
                tracing::warn!(thread_id, tool_rounds = rounds, "Tool-call limit exceeded");
                if let Some(tx) = tx
                    && tx.send(Ok(notice.clone())).await.is_err()
                {
                    return Ok(None);
                }
                conversation.push(Message::assistant(notice));
                return Ok(Some(TurnOutcome {
                    messages: conversation.split_off(turn_start),
                    stop_reason: StopReason::ToolLimitExceeded,
                    tool_rounds: rounds,
                }));
            }

            let calls = assistant.tool_calls().to_vec();
            conversation.push(assistant);

            tracing::debug!(thread_id, round = rounds, calls = calls.len(), "Acting");
            let results = match tx {
                Some(tx) => tokio::select! {
                    results = self.dispatcher.dispatch_all(thread_id, &calls) => results,
                    _ = tx.closed() => {
                        tracing::debug!(thread_id, round = rounds, "Turn cancelled while acting");
                        return Ok(None);
                    }
                },
                None => self.dispatcher.dispatch_all(thread_id, &calls).await,
            };
            conversation.extend(results);
            rounds += 1;
        }
    }

    async fn reason(
        &self,
        conversation: &[Message],
        specs: &[ToolSpec],
        tx: Option<&FragmentSender>,
    ) -> Result<Option<Message>, AgentError> {
        let request = ChatRequest {
            messages: conversation,
            tools: if specs.is_empty() { None } else { Some(specs) },
        };

        let Some(tx) = tx else {
            let response = self
                .provider
                .chat(request)
                .await
                .map_err(AgentError::model)?;
            return Ok(Some(normalize_response(response)));
        };

        if !self.provider.supports_streaming() {
            let response = tokio::select! {
                response = self.provider.chat(request) => response.map_err(AgentError::model)?,
                _ = tx.closed() => return Ok(None),
            };
            let message = normalize_response(response);
            if !message.content().is_empty()
                && tx.send(Ok(message.content().to_string())).await.is_err()
            {
                return Ok(None);
            }
            return Ok(Some(message));
        }

        let mut stream = tokio::select! {
            stream = self.provider.chat_stream(request) => stream.map_err(AgentError::model)?,
            _ = tx.closed() => return Ok(None),
        };

        let mut response = ChatResponse::default();
        let mut text = String::new();

        loop {
            let event = tokio::select! {
                event = stream.next() => event,
                _ = tx.closed() => return Ok(None),
            };

            match event {
                None | Some(ProviderEvent::Done) => break,
                Some(ProviderEvent::Token(token)) => {
                    text.push_str(&token);
                    if tx.send(Ok(token)).await.is_err() {
                        return Ok(None);
                    }
                }
                Some(ProviderEvent::Thinking(_)) => {}
                Some(ProviderEvent::ToolCall(call)) => response.tool_calls.push(call),
                Some(ProviderEvent::Error(e)) => return Err(AgentError::ModelBackend(e)),
            }
        }

        response.text = Some(text);
        Ok(Some(normalize_response(response)))
    }
}
