use crate::config::McpServerConfig;
use crate::remote::{McpTool, McpTransport, connect_transport};
use crate::traits::{RemoteToolProvider, Tool};
use anyhow::{Context, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

const PROTOCOL_VERSION: &str = "2024-11-05";
const MAX_LIST_PAGES: usize = 32;

/// One MCP server. The connection opens on first discovery and stays up
/// until `close`.
pub struct McpToolProvider {
    name: String,
    config: Option<McpServerConfig>,
    transport: Mutex<Option<Arc<dyn McpTransport>>>,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl McpToolProvider {
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            config: Some(config),
            transport: Mutex::new(None),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Uses an already-open transport instead of connecting from config.
    pub fn from_transport(name: impl Into<String>, transport: Arc<dyn McpTransport>) -> Self {
        Self {
            name: name.into(),
            config: None,
            transport: Mutex::new(Some(transport)),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    async fn connect(&self) -> anyhow::Result<Arc<dyn McpTransport>> {
        let mut slot = self.transport.lock().await;
        if let Some(transport) = slot.as_ref() {
            return Ok(Arc::clone(transport));
        }

        let Some(config) = &self.config else {
            bail!("mcp server '{}' has no connection settings", self.name);
        };
        let transport = connect_transport(config).await?;
        *slot = Some(Arc::clone(&transport));
        Ok(transport)
    }

    async fn initialize(&self, transport: &Arc<dyn McpTransport>) -> anyhow::Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        let result = transport
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "parley",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await
            .with_context(|| format!("mcp server '{}' failed to initialize", self.name))?;

        let protocol = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::debug!(
            server = %self.name,
            protocol,
            "mcp session initialized"
        );

        transport
            .notify("notifications/initialized", json!({}))
            .await?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RemoteToolProvider for McpToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover(&self) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("mcp server '{}' is closed", self.name);
        }

        let transport = self.connect().await?;
        self.initialize(&transport).await?;

        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let page = transport
                .request("tools/list", params)
                .await
                .with_context(|| format!("tools/list failed on '{}'", self.name))?;

            for definition in page
                .get("tools")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                match McpTool::new(&self.name, definition, Arc::clone(&transport)) {
                    Some(tool) => tools.push(Arc::new(tool)),
                    None => tracing::debug!(server = %self.name, "Skipping unnamed tool definition"),
                }
            }

            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        tracing::info!(server = %self.name, tools = tools.len(), "mcp tools discovered");
        Ok(tools)
    }

    async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            transport.shutdown().await?;
        }
        Ok(())
    }
}
