//! # cache-chat CLI (`cchat`)
//!
//! The `cchat` binary runs the ingestion pipeline, asks one-off questions,
//! hosts a terminal chat, and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! cchat --config ./config/cchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cchat ingest` | Upload the source document and create a context cache |
//! | `cchat ask "<question>"` | Answer one question (ingests first unless `--cache` is given) |
//! | `cchat chat` | Interactive chat in the terminal |
//! | `cchat serve` | Start the HTTP server |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use cache_chat::config::{self, Config};
use cache_chat::generate::{GenerationClient, Generator};
use cache_chat::ingest::Ingestor;
use cache_chat::models::{ContextCache, Role};
use cache_chat::progress::ProgressMode;
use cache_chat::provider::{normalize_model, GeminiProvider};
use cache_chat::server::{self, IngestSummary};
use cache_chat::session::{
    ChatSession, DirectBackend, HttpBackend, SendOutcome, SessionBackend, FALLBACK_REPLY,
    SUGGESTIONS,
};

/// cache-chat: prime a hosted model with a cached reference document and
/// chat against it.
///
/// Configuration comes from a TOML file plus environment variables
/// (`GEMINI_API_KEY`, `PDF_URL`, `SOURCE_PATH`).
#[derive(Parser)]
#[command(
    name = "cchat",
    about = "cache-chat: chat with a hosted model primed on a cached reference document",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/cchat.toml`. A missing file is allowed; the
    /// defaults and environment variables are used instead.
    #[arg(long, global = true, default_value = "./config/cchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion pipeline once.
    ///
    /// Loads the source document, uploads it, waits for processing, and
    /// creates a context cache. Prints the same JSON summary the
    /// `/api/upload` endpoint returns.
    Ingest {
        /// Progress output on stderr. Defaults to `human` on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Answer a single question.
    Ask {
        /// The question.
        question: String,

        /// Reuse an existing cache (`cachedContents/...`) instead of ingesting.
        #[arg(long)]
        cache: Option<String>,
    },

    /// Interactive chat in the terminal.
    Chat {
        /// Base URL of a running `cchat serve`; runs in process when omitted.
        #[arg(long)]
        remote: Option<String>,
    },

    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and serves `/api/upload`, `/api/chat`,
    /// `/api/suggestions` and `/health`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Remote chat needs no local provider or source.
    if let Commands::Chat {
        remote: Some(url), ..
    } = &cli.command
    {
        let cfg = config::read_config(&cli.config)?;
        let backend = HttpBackend::new(url, Duration::from_secs(cfg.provider.timeout_secs))?;
        return run_chat(Box::new(backend), cfg.chat.max_chars).await;
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { progress } => {
            let ingestor = build_ingestor(&cfg)?;
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let summary = match ingestor.run(mode.reporter().as_ref()).await {
                Ok(outcome) => IngestSummary::from_outcome(outcome),
                Err(err) => IngestSummary::from_error(&err),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.success {
                anyhow::bail!("ingestion failed");
            }
        }
        Commands::Ask { question, cache } => {
            if question.trim().is_empty() {
                anyhow::bail!("question must not be empty");
            }
            let ingestor = build_ingestor(&cfg)?;
            let cache = match cache {
                Some(name) => ContextCache {
                    name,
                    model: normalize_model(&cfg.provider.model),
                    display_name: None,
                    create_time: None,
                    expire_time: None,
                    usage_metadata: None,
                },
                None => {
                    let reporter = ProgressMode::default_for_tty().reporter();
                    ingestor.run(reporter.as_ref()).await?.cache
                }
            };
            let client = GenerationClient::new(ingestor.provider(), cache);
            let answer = client.generate(&question).await?;
            if answer.trim().is_empty() {
                println!("{}", FALLBACK_REPLY);
            } else {
                println!("{}", answer);
            }
        }
        Commands::Chat { .. } => {
            let ingestor = build_ingestor(&cfg)?;
            let backend = DirectBackend::new(ingestor, ProgressMode::default_for_tty().reporter());
            run_chat(Box::new(backend), cfg.chat.max_chars).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn build_ingestor(cfg: &Config) -> anyhow::Result<Arc<Ingestor>> {
    let provider = GeminiProvider::new(&cfg.provider)?;
    Ok(Arc::new(Ingestor::new(
        Arc::new(cfg.clone()),
        Arc::new(provider),
    )?))
}

/// Terminal front end over a [`ChatSession`]: one line in, one reply out.
async fn run_chat(backend: Box<dyn SessionBackend>, max_chars: usize) -> anyhow::Result<()> {
    let mut session = ChatSession::new(backend, max_chars);

    eprintln!("Preparing the guide...");
    session
        .initialize()
        .await
        .context("chat could not be initialized")?;

    println!("How can I assist you? Try one of these:");
    for s in SUGGESTIONS {
        println!("  - {}", s.title);
    }
    println!("(empty line to skip, Ctrl-D to quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match session.send_message(&line).await {
            SendOutcome::Replied(msg) => {
                debug_assert_eq!(msg.role, Role::Bot);
                println!("\n{}\n", msg.content);
            }
            SendOutcome::Empty => {}
            SendOutcome::TooLong { chars, max } => {
                eprintln!("Message is {} characters; the limit is {}.", chars, max);
            }
            SendOutcome::NotReady(state) => {
                eprintln!("Not ready ({:?}).", state);
            }
            SendOutcome::Failed(err) => {
                eprintln!("No answer this time: {}", err);
            }
        }
    }

    Ok(())
}
