pub mod factory;
mod lines;
pub mod normalize;
pub mod ollama;
pub mod openai;

#[cfg(test)]
pub(crate) mod testing;

pub use factory::{create_provider, resolve_api_key};
pub use normalize::normalize_response;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
