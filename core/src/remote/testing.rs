use crate::remote::McpTransport;
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// In-memory MCP server. Each method answers from its own queue; the last
/// queued answer repeats once the queue is down to one.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<HashMap<String, VecDeque<Value>>>,
    calls: Mutex<Vec<(String, Value)>>,
    notifications: Mutex<Vec<String>>,
    shutdowns: Mutex<usize>,
}

impl FakeTransport {
    pub fn respond(self, method: &str, result: Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn shutdowns(&self) -> usize {
        *self.shutdowns.lock().unwrap()
    }
}

#[async_trait]
impl McpTransport for FakeTransport {
    async fn request(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        let mut responses = self.responses.lock().unwrap();
        let queue = responses
            .get_mut(method)
            .ok_or_else(|| anyhow!("MCP error -32601: Method not found"))?;
        match queue.len() {
            0 => Err(anyhow!("MCP error -32601: Method not found")),
            1 => Ok(queue[0].clone()),
            _ => Ok(queue.pop_front().unwrap_or_default()),
        }
    }

    async fn notify(&self, method: &str, _params: Value) -> anyhow::Result<()> {
        self.notifications.lock().unwrap().push(method.to_string());
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        *self.shutdowns.lock().unwrap() += 1;
        Ok(())
    }
}
