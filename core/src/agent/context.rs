use crate::retrieval::DocumentInfo;
use crate::tools::RETRIEVAL_TOOL_NAME;
use crate::traits::{Message, ToolSpec};
use std::fmt::Write;
use std::path::{Path, PathBuf};

const PERSONA_MAX_CHARS: usize = 20_000;
const PERSONA_FILE: &str = "PERSONA.md";

const DEFAULT_PERSONA: &str = "You are a helpful assistant. Answer concisely. \
Use the available tools when they help: search the web for current facts, \
look up stock prices, and consult the uploaded document when the question \
is about it. Never invent tool results.";

pub struct ContextBuilder {
    pub workspace: PathBuf,
    pub tool_protocol: bool,
}

impl ContextBuilder {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
            tool_protocol: false,
        }
    }

    /// Describe the `<tool_call>` text protocol for backends without native
    /// tool calling.
    pub fn with_tool_protocol(mut self, enabled: bool) -> Self {
        self.tool_protocol = enabled;
        self
    }

    pub fn build_system_prompt(
        &self,
        thread_id: &str,
        tools: &[ToolSpec],
        document: Option<&DocumentInfo>,
    ) -> String {
        let mut parts = vec![self.load_persona()];

        if let Some(instructions) = self.get_tool_instructions(tools) {
            parts.push(instructions);
        }

        parts.push(self.get_runtime_context(thread_id, document));

        parts.join("\n\n---\n\n")
    }

    pub fn build_messages(
        &self,
        thread_id: &str,
        tools: &[ToolSpec],
        document: Option<&DocumentInfo>,
        history: &[Message],
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(
            self.build_system_prompt(thread_id, tools, document),
        ));
        messages.extend_from_slice(history);
        messages
    }

    fn get_tool_instructions(&self, tools: &[ToolSpec]) -> Option<String> {
        if !self.tool_protocol || tools.is_empty() {
            return None;
        }

        let mut instructions = String::new();
        instructions.push_str("## Tool Use Protocol\n\n");
        instructions.push_str("To use a tool, wrap a JSON object in <tool_call> tags:\n\n");
        instructions.push_str("```\n<tool_call>\n{\"name\": \"tool_name\", \"arguments\": {\"param\": \"value\"}}\n</tool_call>\n```\n\n");
        instructions.push_str("You may use multiple tool calls in a single response. ");
        instructions.push_str("After tool execution, results appear in <tool_result> tags. ");
        instructions
            .push_str("Continue reasoning with the results until you can give a final answer.\n\n");
        instructions.push_str("### Available Tools\n\n");

        for tool in tools {
            let _ = writeln!(
                instructions,
                "**{}**: {}\nParameters: `{}`\n",
                tool.name, tool.description, tool.parameters_schema
            );
        }

        Some(instructions)
    }

    fn get_runtime_context(&self, thread_id: &str, document: Option<&DocumentInfo>) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");

        let mut context = format!(
            "## Runtime Context

### Current Time
{}

### Conversation
{}",
            timestamp, thread_id
        );

        match document {
            Some(doc) => {
                let _ = write!(
                    context,
                    "\n\n### Uploaded Document\n{} ({} chunks). Call `{}` with the user's question to read from it.",
                    doc.name, doc.chunks, RETRIEVAL_TOOL_NAME
                );
            }
            None => {
                context.push_str("\n\n### Uploaded Document\nNone.");
            }
        }

        context
    }

    fn load_persona(&self) -> String {
        let Ok(content) = std::fs::read_to_string(self.workspace.join(PERSONA_FILE)) else {
            return DEFAULT_PERSONA.to_string();
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return DEFAULT_PERSONA.to_string();
        }

        if trimmed.chars().count() > PERSONA_MAX_CHARS {
            let truncated: String = trimmed.chars().take(PERSONA_MAX_CHARS).collect();
            format!("{}\n\n[... truncated at {} chars]", truncated, PERSONA_MAX_CHARS)
        } else {
            trimmed.to_string()
        }
    }
}
