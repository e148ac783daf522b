use crate::config::Config;
use crate::error::AgentError;
use crate::providers::{OllamaProvider, OpenAIProvider};
use crate::traits::Provider;
use std::sync::Arc;

pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>, AgentError> {
    let provider_name = config.provider_name();

    match provider_name.to_lowercase().as_str() {
        "ollama" => {
            let mut provider = OllamaProvider::new()
                .with_model(config.model.clone())
                .with_temperature(config.temperature);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Ok(Arc::new(provider))
        }
        "openai" => {
            let api_key = resolve_api_key(
                &["OPENAI_API_KEY", "PARLEY_OPENAI_API_KEY"],
                &config.api_key,
            )
            .ok_or_else(|| {
                AgentError::Configuration(
                    "No API key found. Set OPENAI_API_KEY or run `parley onboard`".into(),
                )
            })?;
            let mut provider = OpenAIProvider::new(api_key)
                .with_model(config.model.clone())
                .with_temperature(config.temperature);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Ok(Arc::new(provider))
        }
        _ => Err(AgentError::Configuration(format!(
            "Unknown provider: {}. Available: openai, ollama",
            provider_name
        ))),
    }
}

/// First non-empty environment variable wins, then the configured key.
pub fn resolve_api_key(env_vars: &[&str], config_key: &str) -> Option<String> {
    env_vars
        .iter()
        .filter_map(|var_name| std::env::var(var_name).ok())
        .find(|key| !key.trim().is_empty())
        .or_else(|| (!config_key.is_empty()).then(|| config_key.to_string()))
}
