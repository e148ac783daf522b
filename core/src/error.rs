use thiserror::Error;

/// Failures surfaced at the conversation boundary.
///
/// Tool-side variants never escape a turn: the dispatcher renders them into
/// tool result messages so the model can react to them.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Model backend error: {0}")]
    ModelBackend(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Document ingestion failed: {0}")]
    DocumentIngestion(String),

    #[error("Tool '{0}' not found.")]
    ToolNotFound(String),

    #[error("{0}")]
    ToolInvocation(String),

    #[error("No document indexed for this chat. Upload a document first.")]
    RetrievalContextMissing,
}

impl AgentError {
    pub fn model(err: impl std::fmt::Display) -> Self {
        Self::ModelBackend(err.to_string())
    }

    pub fn checkpoint(err: impl std::fmt::Display) -> Self {
        Self::Checkpoint(format!("{:#}", err))
    }

    /// True for failures that are absorbed into conversation content.
    pub fn is_tool_side(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_) | Self::ToolInvocation(_) | Self::RetrievalContextMissing
        )
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
