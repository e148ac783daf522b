use crate::error::AgentError;
use crate::traits::Document;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Text { name: String, content: String },
}

impl DocumentSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Text {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            Self::Text { name, .. } => name.clone(),
        }
    }
}

pub async fn load_document(source: DocumentSource) -> Result<Document, AgentError> {
    let name = source.display_name();

    let content = match source {
        DocumentSource::Text { content, .. } => content,
        DocumentSource::Path(path) => {
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AgentError::DocumentNotFound(path.display().to_string())
                } else {
                    AgentError::DocumentIngestion(format!(
                        "failed to read {}: {}",
                        path.display(),
                        e
                    ))
                }
            })?;

            if is_pdf(&path, &bytes) {
                extract_pdf_text(&name, bytes).await?
            } else {
                String::from_utf8(bytes).map_err(|_| {
                    AgentError::DocumentIngestion(format!(
                        "{} is not a UTF-8 text or PDF document",
                        path.display()
                    ))
                })?
            }
        }
    };

    if content.trim().is_empty() {
        return Err(AgentError::DocumentIngestion(format!(
            "{} has no text content",
            name
        )));
    }

    Ok(Document { name, content })
}

const PDF_MAGIC: &[u8] = b"%PDF-";

fn is_pdf(path: &Path, bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
        || path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Parsing runs on the blocking pool; a parser panic is reported as an
/// ingestion failure.
async fn extract_pdf_text(name: &str, bytes: Vec<u8>) -> Result<String, AgentError> {
    let extracted =
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| {
                AgentError::DocumentIngestion(format!("failed to parse PDF {}: {}", name, e))
            })?;

    let text = extracted.map_err(|e| {
        AgentError::DocumentIngestion(format!("failed to parse PDF {}: {}", name, e))
    })?;

    tracing::debug!(document = name, chars = text.len(), "Extracted PDF text");
    Ok(text)
}
