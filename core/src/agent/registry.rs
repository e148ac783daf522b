use crate::traits::{RemoteToolProvider, Tool, ToolInfo, ToolSpec};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Every tool the model may call: in-process tools plus whatever the remote
/// providers advertised at the last discovery.
pub struct ToolRegistry {
    local: Mutex<Vec<Arc<dyn Tool>>>,
    providers: Mutex<Vec<Arc<dyn RemoteToolProvider>>>,
    remote: Mutex<Vec<Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            local: Mutex::new(Vec::new()),
            providers: Mutex::new(Vec::new()),
            remote: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        lock(&self.local).push(tool);
    }

    pub fn register_local(&self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        lock(&self.local).extend(tools);
    }

    pub fn add_provider(&self, provider: Arc<dyn RemoteToolProvider>) {
        lock(&self.providers).push(provider);
    }

    /// Asks every provider for its tools. A failing provider is logged and
    /// skipped, so this never fails; the result replaces any earlier discovery.
    pub async fn discover_remote(&self) -> Vec<Arc<dyn Tool>> {
        let providers = lock(&self.providers).clone();
        let mut discovered: Vec<Arc<dyn Tool>> = Vec::new();
        let mut failed = 0usize;

        for provider in &providers {
            match provider.discover().await {
                Ok(tools) => {
                    tracing::debug!(provider = provider.name(), tools = tools.len(), "Provider discovered");
                    discovered.extend(tools);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(provider = provider.name(), error = %format!("{:#}", e), "Remote tool discovery failed");
                }
            }
        }

        tracing::info!(
            providers = providers.len(),
            failed,
            tools = discovered.len(),
            "Remote tools discovered"
        );

        *lock(&self.remote) = discovered.clone();
        discovered
    }

    /// Deduplicated by name. Local tools come first and win collisions;
    /// among remote tools the earlier provider wins.
    pub fn all_tools(&self) -> Vec<Arc<dyn Tool>> {
        let local = lock(&self.local).clone();
        let remote = lock(&self.remote).clone();

        let mut seen = HashSet::new();
        let mut tools = Vec::with_capacity(local.len() + remote.len());

        for tool in local.into_iter().chain(remote) {
            if seen.insert(tool.name().to_string()) {
                tools.push(tool);
            } else {
                tracing::debug!(
                    tool = tool.name(),
                    remote = tool.is_remote(),
                    "Dropping shadowed tool"
                );
            }
        }

        tools
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.all_tools().into_iter().find(|t| t.name() == name)
    }

    pub fn get_specs(&self) -> Vec<ToolSpec> {
        self.all_tools().iter().map(|t| t.spec()).collect()
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.all_tools().iter().map(|t| t.info()).collect()
    }

    /// Releases every provider and forgets their tools. Safe to call again.
    pub async fn close(&self) {
        let providers: Vec<_> = lock(&self.providers).drain(..).collect();
        lock(&self.remote).clear();

        for provider in providers {
            if let Err(e) = provider.close().await {
                tracing::warn!(provider = provider.name(), error = %format!("{:#}", e), "Failed to close remote provider");
            }
        }
    }
}
