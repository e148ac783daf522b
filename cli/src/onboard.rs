use anyhow::{Context, Result};
use console::style;
use dialoguer::{Input, Select};
use parley_core::config::{Config, ensure_parley_dir, get_config_path};
use std::path::Path;

const BANNER: &str = r"
    ---------------------------------------

     _ __   __ _ _ __| | ___ _   _
    | '_ \ / _` | '__| |/ _ \ | | |
    | |_) | (_| | |  | |  __/ |_| |
    | .__/ \__,_|_|  |_|\___|\__, |
    |_|                      |___/

    ---------------------------------------
";

const PROVIDERS: [&str; 2] = ["openai", "ollama"];

pub const DEFAULT_PERSONA: &str = r#"# PERSONA.md

You are Parley, a concise research assistant.

## Tools

- **web_search**: look up current facts before answering questions about recent events
- **stock_price**: fetch the latest quote when asked about a ticker
- **rag_tool**: read from the document the user uploaded to this conversation

## Style

- Answer directly, then add detail only if it helps
- Quote numbers exactly as the tools return them
- Say so when a tool fails or returns nothing; never invent results

---

*Edit this file to change how the assistant introduces itself and answers.*"#;

fn print_step(step: usize, total: usize, title: &str) {
    println!();
    println!(
        "{}",
        style(format!("[{}/{}] {}", step, total, title))
            .cyan()
            .bold()
    );
    println!();
}

/// Writes the persona file unless the user already has one.
pub fn ensure_persona_file(data_dir: &Path) -> Result<bool> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join("PERSONA.md");
    if path.exists() {
        return Ok(false);
    }
    std::fs::write(&path, DEFAULT_PERSONA)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

fn setup_provider() -> Result<String> {
    let selection = Select::new()
        .with_prompt("Select your model backend")
        .items(&PROVIDERS)
        .default(0)
        .interact()
        .context("Failed to select provider")?;

    Ok(PROVIDERS[selection].to_string())
}

fn setup_api_key() -> Result<String> {
    let api_key: String = Input::new()
        .with_prompt("Enter your OpenAI API key (leave empty to use OPENAI_API_KEY)")
        .allow_empty(true)
        .interact_text()
        .context("Failed to read API key")?;

    let api_key = api_key.trim().to_string();
    if api_key.is_empty() && std::env::var("OPENAI_API_KEY").is_err() {
        return Err(anyhow::anyhow!(
            "API key cannot be empty when OPENAI_API_KEY is not set"
        ));
    }

    Ok(api_key)
}

fn setup_model(provider: &str) -> Result<String> {
    let models: &[&str] = match provider {
        "ollama" => &["llama3.2", "qwen2.5", "mistral"],
        _ => &["gpt-4o", "gpt-4o-mini", "gpt-5", "gpt-5-mini"],
    };

    let selection = Select::new()
        .with_prompt("Select your model")
        .items(models)
        .default(0)
        .interact()
        .context("Failed to select model")?;

    Ok(models[selection].to_string())
}

fn setup_stock_key() -> Result<Option<String>> {
    let key: String = Input::new()
        .with_prompt("Alpha Vantage API key for stock quotes (optional)")
        .allow_empty(true)
        .interact_text()
        .context("Failed to read Alpha Vantage key")?;

    let key = key.trim();
    Ok((!key.is_empty()).then(|| key.to_string()))
}

pub fn run_onboard() -> Result<Config> {
    println!("{}", style(BANNER).cyan().bold());

    println!("  {}", style("Welcome to Parley!").white().bold());
    println!(
        "  {}",
        style("This wizard writes your config and a starter persona.").dim()
    );
    println!();

    print_step(1, 4, "Model Backend");
    let provider = setup_provider()?;
    let api_key = if provider == "openai" {
        setup_api_key()?
    } else {
        String::new()
    };

    print_step(2, 4, "Model Selection");
    let model = setup_model(&provider)?;

    print_step(3, 4, "Tool Keys");
    let stock_api_key = setup_stock_key()?;

    let mut config = Config {
        provider: Some(provider),
        api_key,
        model,
        ..Default::default()
    };
    config.tools.stock_api_key = stock_api_key;

    print_step(4, 4, "Persona");
    let data_dir = ensure_parley_dir()?;
    match ensure_persona_file(&data_dir) {
        Ok(true) => println!(
            "  {} Persona written to {}",
            style("✓").green(),
            style(data_dir.join("PERSONA.md").display()).cyan()
        ),
        Ok(false) => println!(
            "  {} Keeping existing {}",
            style("✓").green(),
            style(data_dir.join("PERSONA.md").display()).cyan()
        ),
        Err(e) => eprintln!(
            "  {} Warning: Could not create PERSONA.md: {}",
            style("!").yellow(),
            e
        ),
    }

    println!();
    println!("  {} Configuration complete!", style("✓").green().bold());
    println!(
        "  {} Config saved to {}",
        style("→").green(),
        style(get_config_path().display()).cyan()
    );
    println!();
    println!(
        "  {} You can now run: {}",
        style("→").green(),
        style("parley chat").cyan().bold()
    );
    println!();

    Ok(config)
}
