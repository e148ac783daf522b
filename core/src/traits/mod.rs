pub mod checkpoint;
pub mod message;
pub mod provider;
pub mod retrieval;
pub mod tool;

pub use checkpoint::{CheckpointStore, ConversationState};
pub use message::{Message, ToolCall};
pub use provider::{ChatRequest, ChatResponse, Provider, ProviderEvent};
pub use retrieval::{Document, DocumentIndexer, Passage, Retriever};
pub use tool::{RemoteToolProvider, Tool, ToolContext, ToolInfo, ToolResult, ToolSpec};
