use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use futures_util::StreamExt;
use parley_core::{ConversationManager, DocumentSource, Message, config};
use rustyline::error::ReadlineError;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
mod onboard;

const DEFAULT_THREAD: &str = "default";
const HISTORY_FILE: &str = "history.txt";

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "parley - chat with a tool-using agent over your own documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Onboard,
    Chat {
        /// Conversation to continue or start
        #[arg(short, long)]
        thread: Option<String>,
        /// Send one message and exit
        #[arg(short, long)]
        message: Option<String>,
        /// Attach a text or PDF document to the conversation first
        #[arg(short, long)]
        document: Option<PathBuf>,
        #[arg(long)]
        no_stream: bool,
    },
    /// List local and remote tools
    Tools,
}

struct Session<'a> {
    manager: &'a ConversationManager,
    thread_id: String,
    stream: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_core=warn,parley=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let command = cli.command.unwrap_or_else(|| {
        if !config::config_exists() {
            Commands::Onboard
        } else {
            Commands::Chat {
                thread: None,
                message: None,
                document: None,
                no_stream: false,
            }
        }
    });

    match command {
        Commands::Onboard => {
            let onboard_config = onboard::run_onboard().map_err(|e| {
                eprintln!("{} Onboarding failed: {}", style("✗").red(), e);
                anyhow::anyhow!("Onboarding failed: {}", e)
            })?;
            config::save_config(&onboard_config)?;
        }
        Commands::Chat {
            thread,
            message,
            document,
            no_stream,
        } => {
            let config = config::load_config()?;
            if let Err(e) = onboard::ensure_persona_file(&config.data_dir) {
                tracing::warn!(error = %e, "Could not create PERSONA.md");
            }

            let manager = ConversationManager::from_config(&config).await?;
            let session = Session {
                manager: &manager,
                thread_id: thread.unwrap_or_else(|| DEFAULT_THREAD.to_string()),
                stream: config.stream.enabled && !no_stream,
            };

            let result = run_chat(&session, message, document, &config.data_dir).await;
            manager.shutdown().await;
            result?;
        }
        Commands::Tools => {
            let config = config::load_config()?;
            let manager = ConversationManager::from_config(&config).await?;
            print_tools(&manager);
            manager.shutdown().await;
        }
    }

    Ok(())
}

async fn run_chat(
    session: &Session<'_>,
    message: Option<String>,
    document: Option<PathBuf>,
    data_dir: &std::path::Path,
) -> Result<()> {
    if let Some(path) = document {
        upload(session, path).await?;
    }

    match message {
        Some(msg) => session.send(&msg).await,
        None => repl(session, data_dir).await,
    }
}

async fn repl(session: &Session<'_>, data_dir: &std::path::Path) -> Result<()> {
    let mut editor = rustyline::DefaultEditor::new()?;
    let history_path = data_dir.join(HISTORY_FILE);
    let _ = editor.load_history(&history_path);

    println!("{}", style("Parley").cyan().bold());
    println!(
        "{}",
        style(format!(
            "Conversation '{}'. /upload <path>, /tools, /history, /exit (Ctrl+D to quit)",
            session.thread_id
        ))
        .dim()
    );
    println!();

    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(input);

        let outcome = match input.split_once(' ').unwrap_or((input, "")) {
            ("/exit" | "/quit", _) => break,
            ("/tools", _) => {
                print_tools(session.manager);
                Ok(())
            }
            ("/history", _) => print_history(session).await,
            ("/upload", path) if !path.trim().is_empty() => {
                upload(session, PathBuf::from(path.trim())).await
            }
            ("/upload", _) => Err(anyhow::anyhow!("usage: /upload <path>")),
            _ => session.send(input).await,
        };

        if let Err(e) = outcome {
            eprintln!("{} {}", style("Error:").red().bold(), e);
        }
        println!();
    }

    let _ = editor.save_history(&history_path);
    println!("{}", style("Goodbye!").dim());
    Ok(())
}

impl Session<'_> {
    async fn send(&self, text: &str) -> Result<()> {
        if self.stream {
            self.send_streaming(text).await
        } else {
            let reply = self
                .manager
                .start_or_continue_turn(&self.thread_id, text)
                .await?;
            println!();
            termimad::print_text(reply.content());
            Ok(())
        }
    }

    /// Prints fragments as they arrive. Ctrl+C drops the stream, which
    /// cancels the turn without saving it.
    async fn send_streaming(&self, text: &str) -> Result<()> {
        let mut fragments = self.manager.stream_turn(&self.thread_id, text)?;
        let mut stdout = std::io::stdout();
        println!();

        loop {
            tokio::select! {
                item = fragments.next() => match item {
                    Some(Ok(fragment)) => {
                        print!("{}", fragment);
                        let _ = stdout.flush();
                    }
                    Some(Err(e)) => {
                        println!();
                        return Err(e.into());
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    println!("\n{}", style("[cancelled]").yellow());
                    return Ok(());
                }
            }
        }

        println!();
        Ok(())
    }
}

async fn upload(session: &Session<'_>, path: PathBuf) -> Result<()> {
    session
        .manager
        .associate_document(&session.thread_id, DocumentSource::path(path))
        .await?;

    if let Some(info) = session.manager.document(&session.thread_id) {
        println!(
            "  {} Indexed {} ({} chunks)",
            style("✓").green(),
            style(&info.name).cyan(),
            info.chunks
        );
    }
    Ok(())
}

fn print_tools(manager: &ConversationManager) {
    let tools = manager.list_tools();
    if tools.is_empty() {
        println!("No tools available.");
        return;
    }

    for tool in tools {
        let origin = if tool.is_remote {
            style("remote").magenta()
        } else {
            style("local").green()
        };
        println!(
            "  {} [{}] {}",
            style(&tool.name).bold(),
            origin,
            style(&tool.description).dim()
        );
    }
}

async fn print_history(session: &Session<'_>) -> Result<()> {
    let messages = session.manager.history(&session.thread_id).await?;
    if messages.is_empty() {
        println!("No messages yet.");
        return Ok(());
    }

    for message in &messages {
        match message {
            Message::System { .. } => continue,
            Message::Tool { tool_name, .. } => println!(
                "{} {}",
                style(format!("tool:{}", tool_name)).yellow(),
                style(preview(message.content(), 120)).dim()
            ),
            other if other.has_tool_calls() => {
                let names: Vec<&str> = other
                    .tool_calls()
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect();
                println!(
                    "{} {}",
                    style("assistant").cyan(),
                    style(format!("-> {}", names.join(", "))).dim()
                );
            }
            other => println!("{} {}", style(other.role()).cyan(), other.content()),
        }
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
