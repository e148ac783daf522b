use crate::config::McpServerConfig;
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// JSON-RPC 2.0 channel to one MCP server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> anyhow::Result<Value>;

    async fn notify(&self, method: &str, params: Value) -> anyhow::Result<()>;

    async fn shutdown(&self) -> anyhow::Result<()>;
}

pub async fn connect_transport(config: &McpServerConfig) -> anyhow::Result<Arc<dyn McpTransport>> {
    match config.transport {
        crate::config::McpTransportKind::Stdio => Ok(Arc::new(StdioTransport::spawn(config)?)),
        crate::config::McpTransportKind::Http => Ok(Arc::new(HttpTransport::new(config)?)),
    }
}

fn rpc_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

fn rpc_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

fn is_response(message: &Value) -> bool {
    message.get("id").is_some()
        && (message.get("result").is_some() || message.get("error").is_some())
}

/// Extracts `result` from a response, turning a JSON-RPC `error` into `Err`.
pub(crate) fn decode_response(message: Value) -> anyhow::Result<Value> {
    if let Some(error) = message.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("MCP error {}: {}", code, text);
    }

    message
        .get("result")
        .cloned()
        .ok_or_else(|| anyhow!("MCP response has neither result nor error"))
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Value>>>>;

fn lock_pending(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<i64, oneshot::Sender<Value>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Child process speaking line-delimited JSON-RPC over stdin/stdout.
pub struct StdioTransport {
    server: String,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Option<Child>>,
    pending: PendingMap,
    next_id: AtomicI64,
    alive: Arc<AtomicBool>,
    timeout: Duration,
}

impl StdioTransport {
    pub fn spawn(config: &McpServerConfig) -> anyhow::Result<Self> {
        let command = config
            .command
            .as_deref()
            .ok_or_else(|| anyhow!("mcp server '{}' has no command", config.name))?;

        let mut cmd = Command::new(command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn mcp server '{}' ({})", config.name, command))?;

        let stdin = child.stdin.take().context("mcp server stdin unavailable")?;
        let stdout = child.stdout.take().context("mcp server stdout unavailable")?;
        let stderr = child.stderr.take();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let pending_reader = Arc::clone(&pending);
        let alive_reader = Arc::clone(&alive);
        let server = config.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let Ok(message) = serde_json::from_str::<Value>(&line) else {
                            tracing::debug!(server = %server, line = %line.trim(), "Ignoring non-JSON output");
                            continue;
                        };
                        if !is_response(&message) {
                            continue;
                        }
                        let Some(id) = message.get("id").and_then(Value::as_i64) else {
                            continue;
                        };
                        if let Some(tx) = lock_pending(&pending_reader).remove(&id) {
                            let _ = tx.send(message);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(server = %server, error = %e, "mcp stdout read failed");
                        break;
                    }
                }
            }
            alive_reader.store(false, Ordering::SeqCst);
            lock_pending(&pending_reader).clear();
        });

        if let Some(stderr) = stderr {
            let server = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "{}", line);
                }
            });
        }

        Ok(Self {
            server: config.name.clone(),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            child: tokio::sync::Mutex::new(Some(child)),
            pending,
            next_id: AtomicI64::new(1),
            alive,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn write_line(&self, message: &Value) -> anyhow::Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            bail!("mcp server '{}' connection closed", self.server);
        }

        let line = format!("{}\n", serde_json::to_string(message)?);
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin
            .as_mut()
            .ok_or_else(|| anyhow!("mcp server '{}' is shut down", self.server))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);

        if let Err(e) = self.write_line(&rpc_request(id, method, params)).await {
            lock_pending(&self.pending).remove(&id);
            return Err(e.context(format!("Failed to send '{}'", method)));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(message)) => decode_response(message),
            Ok(Err(_)) => bail!("mcp server '{}' closed before answering '{}'", self.server, method),
            Err(_) => {
                lock_pending(&self.pending).remove(&id);
                bail!(
                    "mcp server '{}' timed out after {:?} on '{}'",
                    self.server,
                    self.timeout,
                    method
                )
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> anyhow::Result<()> {
        self.write_line(&rpc_notification(method, params)).await
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        // Closing stdin asks the server to exit.
        self.stdin.lock().await.take();
        self.alive.store(false, Ordering::SeqCst);

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                child.start_kill()?;
                let _ = child.wait().await;
            }
        }
        Ok(())
    }
}

/// Streamable HTTP transport: each message is a POST, answered with either a
/// JSON body or an SSE stream.
pub struct HttpTransport {
    server: String,
    endpoint: String,
    client: reqwest::Client,
    session_id: Mutex<Option<String>>,
    next_id: AtomicI64,
}

impl HttpTransport {
    pub fn new(config: &McpServerConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("mcp server '{}' has no url", config.name))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            server: config.name.clone(),
            endpoint,
            client,
            session_id: Mutex::new(None),
            next_id: AtomicI64::new(1),
        })
    }

    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn post(&self, body: &Value) -> anyhow::Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("HTTP request to mcp server '{}' failed", self.server))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.to_string());
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("mcp server '{}' returned {}: {}", self.server, status, text);
        }

        Ok(response)
    }
}

/// Collects the `data:` payload of each SSE event that parses as JSON.
pub(crate) fn parse_sse_messages(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data = String::new();

    for line in body.lines().chain(std::iter::once("")) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !data.is_empty() {
                if let Ok(value) = serde_json::from_str::<Value>(&data) {
                    messages.push(value);
                }
                data.clear();
            }
            continue;
        }
        if let Some(payload) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(payload.trim_start());
        }
    }

    messages
}

fn find_response(messages: Vec<Value>, id: i64) -> anyhow::Result<Value> {
    messages
        .into_iter()
        .flat_map(|m| match m {
            Value::Array(batch) => batch,
            other => vec![other],
        })
        .find(|m| is_response(m) && m.get("id").and_then(Value::as_i64) == Some(id))
        .ok_or_else(|| anyhow!("no response for request {}", id))
        .and_then(decode_response)
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self.post(&rpc_request(id, method, params)).await?;

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let text = response.text().await?;
        let messages = if is_sse {
            parse_sse_messages(&text)
        } else {
            vec![serde_json::from_str(&text).with_context(|| {
                format!("mcp server '{}' sent invalid JSON for '{}'", self.server, method)
            })?]
        };

        find_response(messages, id)
    }

    async fn notify(&self, method: &str, params: Value) -> anyhow::Result<()> {
        self.post(&rpc_notification(method, params)).await?;
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        let session = self
            .session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(session) = session {
            self.client
                .delete(&self.endpoint)
                .header(SESSION_HEADER, session)
                .send()
                .await
                .with_context(|| format!("Failed to end session with '{}'", self.server))?;
        }
        Ok(())
    }
}
