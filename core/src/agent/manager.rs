use crate::agent::{AgentLoop, ContextBuilder, ToolDispatcher, ToolRegistry, TurnOutcome};
use crate::checkpoint::create_checkpoint_store;
use crate::config::Config;
use crate::error::AgentError;
use crate::providers::create_provider;
use crate::remote::create_remote_providers;
use crate::retrieval::{DocumentInfo, DocumentSource, RetrievalContextStore, create_indexer};
use crate::tools::create_local_tools;
use crate::traits::{CheckpointStore, Message, ToolInfo};
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio_stream::wrappers::ReceiverStream;

/// One async mutex per thread id; a turn holds it from load to checkpoint.
#[derive(Default)]
pub struct ThreadLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThreadLocks {
    pub async fn acquire(&self, thread_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(thread_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Entry point for callers: runs turns against persisted threads.
pub struct ConversationManager {
    agent: Arc<AgentLoop>,
    checkpoints: Arc<dyn CheckpointStore>,
    locks: Arc<ThreadLocks>,
}

impl ConversationManager {
    pub fn new(agent: AgentLoop, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            agent: Arc::new(agent),
            checkpoints,
            locks: Arc::new(ThreadLocks::default()),
        }
    }

    /// Wires provider, tools, retrieval and checkpoints from `config`, then
    /// runs remote tool discovery once.
    pub async fn from_config(config: &Config) -> Result<Self, AgentError> {
        config.validate()?;

        let provider = create_provider(config)?;
        let retrieval = Arc::new(RetrievalContextStore::new(create_indexer(config)?));

        let registry = Arc::new(ToolRegistry::new());
        registry.register_local(create_local_tools(config));
        for remote in create_remote_providers(config) {
            registry.add_provider(remote);
        }
        registry.discover_remote().await;

        let dispatcher = ToolDispatcher::new(Arc::clone(&registry), Arc::clone(&retrieval))
            .with_timeout(Duration::from_secs(config.tool_timeout_secs));
        let context_builder = ContextBuilder::new(&config.data_dir)
            .with_tool_protocol(config.provider_name() == "ollama");

        let agent = AgentLoop::new(provider, context_builder, dispatcher, retrieval)
            .with_max_tool_rounds(config.max_tool_rounds);

        let checkpoints = create_checkpoint_store(config);
        tracing::info!(
            provider = agent.provider_name(),
            checkpoints = checkpoints.name(),
            tools = registry.list().len(),
            "Conversation manager ready"
        );

        Ok(Self::new(agent, checkpoints))
    }

    pub async fn start_or_continue_turn(
        &self,
        thread_id: &str,
        user_message: &str,
    ) -> Result<Message, AgentError> {
        let text = validate_message(user_message)?;

        let _guard = self.locks.acquire(thread_id).await;
        let state = self
            .checkpoints
            .load_or_create(thread_id)
            .await
            .map_err(AgentError::checkpoint)?;

        let outcome = self
            .agent
            .run_turn(thread_id, &state.messages, Message::user(text))
            .await?;
        commit(self.checkpoints.as_ref(), thread_id, &outcome).await?;

        Ok(outcome.reply())
    }

    /// Streams the reply. The empty-message check runs before anything is
    /// spawned; everything else surfaces as an `Err` item on the stream.
    pub fn stream_turn(
        &self,
        thread_id: &str,
        user_message: &str,
    ) -> Result<BoxStream<'static, Result<String, AgentError>>, AgentError> {
        let text = validate_message(user_message)?.to_string();

        let (tx, rx) = mpsc::channel(64);
        let agent = Arc::clone(&self.agent);
        let checkpoints = Arc::clone(&self.checkpoints);
        let locks = Arc::clone(&self.locks);
        let thread_id = thread_id.to_string();

        tokio::spawn(async move {
            let _guard = tokio::select! {
                guard = locks.acquire(&thread_id) => guard,
                _ = tx.closed() => return,
            };

            let state = match checkpoints.load_or_create(&thread_id).await {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!(thread_id = %thread_id, error = %format!("{:#}", e), "Failed to load conversation");
                    let _ = tx.send(Err(AgentError::checkpoint(e))).await;
                    return;
                }
            };

            let result = agent
                .run_streaming(&thread_id, &state.messages, Message::user(text), &tx)
                .await;

            match result {
                Ok(Some(outcome)) => {
                    if let Err(e) = commit(checkpoints.as_ref(), &thread_id, &outcome).await {
                        let _ = tx.send(Err(e)).await;
                    }
                }
                Ok(None) => {
                    tracing::debug!(thread_id = %thread_id, "Streaming turn cancelled; nothing committed");
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    pub async fn associate_document(
        &self,
        thread_id: &str,
        source: DocumentSource,
    ) -> Result<(), AgentError> {
        self.agent
            .retrieval()
            .associate(thread_id, source)
            .await
            .map(|_| ())
    }

    pub fn document(&self, thread_id: &str) -> Option<DocumentInfo> {
        self.agent.retrieval().document(thread_id)
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.agent.registry().list()
    }

    pub async fn history(&self, thread_id: &str) -> Result<Vec<Message>, AgentError> {
        Ok(self
            .checkpoints
            .load(thread_id)
            .await
            .map_err(AgentError::checkpoint)?
            .map(|state| state.messages)
            .unwrap_or_default())
    }

    pub async fn shutdown(&self) {
        self.agent.registry().close().await;
    }
}

fn validate_message(message: &str) -> Result<&str, AgentError> {
    let text = message.trim();
    if text.is_empty() {
        return Err(AgentError::EmptyMessage);
    }
    Ok(text)
}

async fn commit(
    checkpoints: &dyn CheckpointStore,
    thread_id: &str,
    outcome: &TurnOutcome,
) -> Result<(), AgentError> {
    checkpoints
        .append(thread_id, &outcome.messages)
        .await
        .map_err(|e| {
            tracing::error!(thread_id, error = %format!("{:#}", e), "Failed to checkpoint turn");
            AgentError::checkpoint(e)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{EchoTool, FakeRemoteProvider, ScriptedProvider, SlowTool, Step};
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::retrieval::KeywordIndexer;
    use crate::tools::{RETRIEVAL_TOOL_NAME, RetrievalTool};
    use crate::traits::ConversationState;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use tempfile::TempDir;

    struct Fixture {
        manager: ConversationManager,
        provider: Arc<ScriptedProvider>,
        store: Arc<MemoryCheckpointStore>,
        registry: Arc<ToolRegistry>,
        _tmp: TempDir,
    }

    fn fixture(steps: Vec<Step>) -> Fixture {
        fixture_with_store(steps, |store| store as Arc<dyn CheckpointStore>)
    }

    fn fixture_with_store(
        steps: Vec<Step>,
        wrap: impl FnOnce(Arc<MemoryCheckpointStore>) -> Arc<dyn CheckpointStore>,
    ) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::new(steps));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(EchoTool::named("echo")));
        registry.register(Arc::new(RetrievalTool::new()));
        registry.register(Arc::new(SlowTool::new("slow", Duration::from_secs(30))));

        let retrieval = Arc::new(RetrievalContextStore::new(Arc::new(KeywordIndexer::new(
            300, 30, 2,
        ))));
        let dispatcher = ToolDispatcher::new(registry.clone(), retrieval.clone());
        let agent = AgentLoop::new(
            provider.clone(),
            ContextBuilder::new(tmp.path()),
            dispatcher,
            retrieval,
        );

        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = ConversationManager::new(agent, wrap(store.clone()));
        Fixture {
            manager,
            provider,
            store,
            registry,
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn first_turn_creates_thread() {
        let f = fixture(vec![ScriptedProvider::text("Hello!")]);

        let reply = f.manager.start_or_continue_turn("t1", "  hi  ").await.unwrap();
        assert_eq!(reply, Message::assistant("Hello!"));

        let history = f.manager.history("t1").await.unwrap();
        assert_eq!(history, vec![Message::user("hi"), Message::assistant("Hello!")]);
    }

    #[tokio::test]
    async fn second_turn_sees_history() {
        let f = fixture(vec![
            ScriptedProvider::text("Nice to meet you, Ada."),
            ScriptedProvider::text("Your name is Ada."),
        ]);

        f.manager.start_or_continue_turn("t1", "I'm Ada").await.unwrap();
        f.manager
            .start_or_continue_turn("t1", "What's my name?")
            .await
            .unwrap();

        // system + user, then system + 2 history + user
        assert_eq!(f.provider.message_counts(), vec![2, 4]);
        assert_eq!(f.manager.history("t1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn empty_message_rejected() {
        let f = fixture(vec![]);
        let err = f.manager.start_or_continue_turn("t1", "   ").await.unwrap_err();
        assert_eq!(err, AgentError::EmptyMessage);
        assert!(matches!(
            f.manager.stream_turn("t1", "\n\t"),
            Err(AgentError::EmptyMessage)
        ));
        assert!(f.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn model_error_commits_nothing() {
        let f = fixture(vec![
            ScriptedProvider::calls(&[("c1", "echo", "{}")]),
            Step::Fail("rate limited".into()),
        ]);

        let err = f.manager.start_or_continue_turn("t1", "go").await.unwrap_err();
        assert!(matches!(err, AgentError::ModelBackend(_)));
        assert!(f.manager.history("t1").await.unwrap().is_empty());
        assert!(f.store.load("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn document_question_scenario() {
        let f = fixture(vec![
            ScriptedProvider::calls(&[("c1", RETRIEVAL_TOOL_NAME, r#"{"query": "warranty"}"#)]),
            ScriptedProvider::text("The warranty lasts two years."),
        ]);

        f.manager
            .associate_document(
                "t1",
                DocumentSource::text(
                    "manual.txt",
                    "The warranty lasts two years from the date of purchase.",
                ),
            )
            .await
            .unwrap();
        assert_eq!(f.manager.document("t1").unwrap().name, "manual.txt");

        let reply = f
            .manager
            .start_or_continue_turn("t1", "How long is the warranty?")
            .await
            .unwrap();
        assert_eq!(reply.content(), "The warranty lasts two years.");

        let history = f.manager.history("t1").await.unwrap();
        let roles: Vec<&str> = history.iter().map(Message::role).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);
        assert!(history[2].content().contains("date of purchase"));

        let system = f.provider.requests()[0][0].content().to_string();
        assert!(system.contains("manual.txt"));
    }

    #[tokio::test]
    async fn missing_document_scenario() {
        let f = fixture(vec![
            ScriptedProvider::calls(&[("c1", RETRIEVAL_TOOL_NAME, r#"{"query": "warranty"}"#)]),
            ScriptedProvider::text("Please upload the manual first."),
        ]);

        f.manager
            .start_or_continue_turn("t1", "How long is the warranty?")
            .await
            .unwrap();

        let history = f.manager.history("t1").await.unwrap();
        assert!(history[2].content().contains("Upload a document first"));
    }

    #[tokio::test]
    async fn missing_document_path() {
        let f = fixture(vec![]);
        let err = f
            .manager
            .associate_document("t1", DocumentSource::path("/nope/missing.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn streamed_turn_is_checkpointed() {
        let f = fixture(vec![ScriptedProvider::text("Streaming works fine.")]);

        let stream = f.manager.stream_turn("t1", "stream please").unwrap();
        let fragments: Vec<String> = stream.map(Result::unwrap).collect().await;
        assert_eq!(fragments.concat(), "Streaming works fine.");

        let history = f.manager.history("t1").await.unwrap();
        assert_eq!(history.last(), Some(&Message::assistant("Streaming works fine.")));
    }

    #[tokio::test]
    async fn cancelled_stream_commits_nothing_and_releases_lock() {
        let f = fixture(vec![
            Step::Hang(vec!["thinking ".into()]),
            ScriptedProvider::text("fresh answer"),
        ]);

        let mut stream = f.manager.stream_turn("t1", "first").unwrap();
        assert_eq!(stream.next().await, Some(Ok("thinking ".to_string())));
        drop(stream);

        let reply = tokio::time::timeout(
            Duration::from_secs(2),
            f.manager.start_or_continue_turn("t1", "second"),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply.content(), "fresh answer");

        let history = f.manager.history("t1").await.unwrap();
        assert_eq!(history, vec![Message::user("second"), Message::assistant("fresh answer")]);
    }

    #[tokio::test]
    async fn cancel_during_tool_call() {
        let f = fixture(vec![
            Step::Events(vec![
                crate::traits::ProviderEvent::Token("Working on it. ".into()),
                crate::traits::ProviderEvent::ToolCall(crate::traits::ToolCall::new(
                    "c1", "slow", "{}",
                )),
            ]),
            ScriptedProvider::text("after"),
        ]);

        let mut stream = f.manager.stream_turn("t1", "slow please").unwrap();
        assert_eq!(stream.next().await, Some(Ok("Working on it. ".to_string())));
        drop(stream);

        let reply = tokio::time::timeout(
            Duration::from_secs(2),
            f.manager.start_or_continue_turn("t1", "again"),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply.content(), "after");
        assert_eq!(f.manager.history("t1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn threads_do_not_block_each_other() {
        let f = fixture(vec![
            Step::Hang(vec!["...".into()]),
            ScriptedProvider::text("other thread"),
        ]);

        let mut stuck = f.manager.stream_turn("t1", "hang").unwrap();
        assert!(stuck.next().await.is_some());

        let reply = tokio::time::timeout(
            Duration::from_secs(2),
            f.manager.start_or_continue_turn("t2", "hello"),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply.content(), "other thread");
    }

    #[tokio::test]
    async fn same_thread_turns_serialize() {
        let locks = Arc::new(ThreadLocks::default());
        let guard = locks.acquire("t1").await;

        let waiting = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("t1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        let _other = locks.acquire("t2").await;
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    struct BrokenStore;

    #[async_trait]
    impl CheckpointStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }

        async fn load(&self, _thread_id: &str) -> anyhow::Result<Option<ConversationState>> {
            Ok(None)
        }

        async fn append(&self, _thread_id: &str, _messages: &[Message]) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        async fn replace(&self, _state: ConversationState) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        async fn list_threads(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }

        async fn delete(&self, _thread_id: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn checkpoint_failure_is_error() {
        let f = fixture_with_store(vec![ScriptedProvider::text("hi")], |_| {
            Arc::new(BrokenStore) as Arc<dyn CheckpointStore>
        });
        let err = f.manager.start_or_continue_turn("t1", "hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Checkpoint(ref m) if m.contains("disk full")));

        let f = fixture_with_store(vec![ScriptedProvider::text("hi")], |_| {
            Arc::new(BrokenStore) as Arc<dyn CheckpointStore>
        });
        let items: Vec<_> = f.manager.stream_turn("t1", "hello").unwrap().collect().await;
        assert!(matches!(items.last(), Some(Err(AgentError::Checkpoint(_)))));
    }

    #[tokio::test]
    async fn lists_and_shuts_down_tools() {
        let f = fixture(vec![]);
        let remote = Arc::new(FakeRemoteProvider::new("calendar-server", &["calendar", "echo"]));
        f.registry.add_provider(remote.clone());
        f.registry.discover_remote().await;

        let tools = f.manager.list_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "rag_tool", "slow", "calendar"]);
        assert!(tools.iter().find(|t| t.name == "echo").is_some_and(|t| !t.is_remote));

        f.manager.shutdown().await;
        f.manager.shutdown().await;
        assert_eq!(remote.close_count(), 1);
    }
}
