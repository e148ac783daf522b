pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod providers;
pub mod remote;
pub mod retrieval;
pub mod tools;
pub mod traits;

pub use agent::{
    AgentLoop, ContextBuilder, ConversationManager, StopReason, ToolDispatcher, ToolRegistry,
    TurnOutcome,
};
pub use config::*;
pub use error::{AgentError, AgentResult};
pub use providers::*;
pub use retrieval::{DocumentInfo, DocumentSource, RetrievalContextStore};
pub use tools::*;
pub use traits::*;
