//! Conductor Daemon
//!
//! Interactive driver for the orchestration core: reads lines from stdin into a
//! topic and prints the streamed reply.
//!
//! # Usage
//!
//! ```bash
//! # Chat in the default "lama" topic with the configured default model
//! conductor-daemon --model llama3.2
//!
//! # Another topic, remote Ollama
//! conductor-daemon --topic notes --ollama-host 10.0.0.5
//!
//! # Verbose logging
//! RUST_LOG=topic_conductor=debug conductor-daemon
//! ```
//!
//! Lines starting with `/` are commands: `/cancel` aborts the running reply,
//! `/resume` restarts a cancelled queue, `/quit` exits.
//!
//! # Environment Variables
//!
//! - `CONDUCTOR_CONFIG`: Configuration file path
//! - `CONDUCTOR_DEFAULT_MODEL`: Default model
//! - `OLLAMA_HOST` / `OLLAMA_PORT`: Ollama server (default: localhost:11434)
//! - `RUST_LOG`: Log filter

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

use topic_conductor::{
    default_config_path, load_config_from_path, Collaborators, ConfigOverrides, IdentityId,
    IncomingMessage, LlmBackend, MessageId, OllamaBackend, Orchestrator, OrchestratorEvent,
    LAMA_TOPIC_ID,
};

/// Conductor Daemon - chat with an AI topic from the terminal
#[derive(Parser, Debug)]
#[command(name = "conductor-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "CONDUCTOR_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Default model (overrides config and environment)
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,

    /// Topic to chat in
    #[arg(short = 't', long, default_value = LAMA_TOPIC_ID)]
    topic: String,

    /// Sender identity for stdin messages
    #[arg(long, default_value = "local-user")]
    user: String,

    /// Ollama host
    #[arg(long, env = "OLLAMA_HOST", default_value = "localhost")]
    ollama_host: String,

    /// Ollama port
    #[arg(long, env = "OLLAMA_PORT", default_value_t = 11434)]
    ollama_port: u16,
}

/// Warn early when the Ollama server or the default model is missing
async fn check_backend(backend: &OllamaBackend, model: Option<&str>) {
    if !backend.health_check().await {
        warn!(backend = backend.name(), "Backend not reachable, replies will fail until it is up");
        return;
    }
    let Some(model) = model else {
        return;
    };
    match backend.has_model(model).await {
        Ok(true) => info!(model, "Default model available"),
        Ok(false) => warn!(model, "Default model is not pulled on the backend"),
        Err(e) => warn!(model, error = %e, "Failed to list backend models"),
    }
}

/// Print streamed tokens for one topic until the event channel closes
async fn print_events(
    mut events: tokio::sync::broadcast::Receiver<OrchestratorEvent>,
    topic_id: String,
) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if event.topic_id() != topic_id {
            continue;
        }

        match event {
            OrchestratorEvent::Token { text, .. } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            OrchestratorEvent::ResponsePersisted { .. } => println!(),
            OrchestratorEvent::GenerationFailed { error, .. } => eprintln!("\n[error] {error}"),
            OrchestratorEvent::GenerationCancelled { .. } => eprintln!("\n[cancelled]"),
            OrchestratorEvent::ContextRestarted { .. } => {
                eprintln!("[context restarted with summary]");
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conductor_daemon=info".parse()?)
                .add_directive("topic_conductor=info".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path.as_deref())
        .with_context(|| format!("Failed to load configuration from {config_path:?}"))?;
    let mut overrides = ConfigOverrides::new();
    if let Some(model) = &args.model {
        overrides = overrides.with_default_model(model.clone());
    }
    overrides.apply(&mut config)?;
    info!(source = %config.source(), "Configuration loaded");

    let backend = Arc::new(OllamaBackend::new(args.ollama_host.clone(), args.ollama_port));
    check_backend(&backend, config.default_model.as_deref()).await;
    let orchestrator = Orchestrator::new(config, Collaborators::in_memory(backend));
    orchestrator.init().await?;

    if !orchestrator.is_ai_topic(&args.topic) {
        let model = orchestrator
            .default_model()
            .context("No default model: pass --model or set CONDUCTOR_DEFAULT_MODEL")?;
        orchestrator.register_topic(&args.topic, &model).await?;
    }
    info!(
        topic = %args.topic,
        model = ?orchestrator.model_id_for_topic(&args.topic),
        "Ready"
    );

    let printer = tokio::spawn(print_events(orchestrator.subscribe(), args.topic.clone()));

    let sender = IdentityId::new(args.user.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Received Ctrl+C, shutting down");
                break;
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            orchestrator.wait_until_idle(&args.topic).await;
            break;
        };
        let text = line.trim();
        match text {
            "" => {}
            "/quit" => break,
            "/cancel" => {
                orchestrator.cancel_topic(&args.topic);
            }
            "/resume" => orchestrator.init().await?,
            _ => {
                let message = IncomingMessage::new(MessageId::new(), sender.clone(), text);
                if let Err(e) = orchestrator
                    .process_incoming_message(&args.topic, message)
                    .await
                {
                    eprintln!("[rejected] {e}");
                }
            }
        }
    }

    orchestrator.shutdown();
    printer.abort();
    info!("Conductor daemon stopped");
    Ok(())
}
