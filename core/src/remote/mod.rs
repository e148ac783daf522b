//! Remote tools served over the Model Context Protocol.

pub mod provider;
pub mod tool;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use provider::McpToolProvider;
pub use tool::McpTool;
pub use transport::{HttpTransport, McpTransport, StdioTransport, connect_transport};

use crate::config::Config;
use crate::traits::RemoteToolProvider;
use std::sync::Arc;

/// One provider per enabled `[[mcp_servers]]` entry. Nothing connects until
/// discovery.
pub fn create_remote_providers(config: &Config) -> Vec<Arc<dyn RemoteToolProvider>> {
    config
        .mcp_servers
        .iter()
        .filter(|server| server.enabled)
        .map(|server| Arc::new(McpToolProvider::new(server.clone())) as Arc<dyn RemoteToolProvider>)
        .collect()
}
