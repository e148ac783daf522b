pub mod context;
pub mod dispatch;
pub mod loop_;
pub mod manager;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use context::ContextBuilder;
pub use dispatch::ToolDispatcher;
pub use loop_::{AgentLoop, StopReason, TurnOutcome};
pub use manager::{ConversationManager, ThreadLocks};
pub use registry::ToolRegistry;
