//! The `chatkeep` binary: an interactive chat client that also runs the
//! session worker (TTL reaper and summarization pipeline) over a local
//! file-backed store.

mod config;

use anyhow::Context;
use chatkeep_agent::{build_generator, ChatService, LlmProvider, LlmSummarizer};
use chatkeep_core::{Clock, SystemClock};
use chatkeep_session::{schemas, Summarizer, SummarizationPipeline, TruncatingSummarizer};
use chatkeep_store::{spawn_ttl_reaper, FileKvStore, StoreHost};
use clap::{Parser, Subcommand};
use config::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatkeep", about = "Chatkeep: chat sessions with long-term memory")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "chatkeep.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat interactively, one line per turn
    Chat {
        #[arg(short, long)]
        user: String,
    },
    /// Print a page of the user's history as JSON, newest first
    History {
        #[arg(short, long)]
        user: String,
        /// Cursor returned by the previous page
        #[arg(long)]
        cursor: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the user's sessions as JSON, newest first
    Sessions {
        #[arg(short, long)]
        user: String,
    },
}

/// Typing this line ends a chat.
const EXIT_COMMAND: &str = "/exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config).await?;

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Failed to create data dir '{}'", config.data_dir.display()))?;
    let store = Arc::new(
        FileKvStore::open(config.journal_path(), schemas(&config.session.tables)).await?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let generator = build_generator(&config.model)?;
    let service = ChatService::new(
        store.clone(),
        generator.clone(),
        clock.clone(),
        config.session.clone(),
        config.retry.clone(),
    );

    match cli.command {
        Commands::Chat { user } => {
            let feed = store.subscribe(&config.session.tables.active_session);
            let summarizer: Arc<dyn Summarizer> = match config.model.provider {
                LlmProvider::Echo => {
                    Arc::new(TruncatingSummarizer::new(config.session.summary_max_chars))
                }
                _ => Arc::new(LlmSummarizer::new(
                    generator,
                    config.session.summary_max_chars,
                )),
            };
            let pipeline = SummarizationPipeline::new(
                service.message_log().clone(),
                service.metadata().clone(),
                summarizer,
                config.retry.clone(),
                config.pipeline.batch_size,
            );
            if let Err(e) = pipeline.reconcile_user(service.coordinator(), &user).await {
                warn!(user_id = %user, error = %e, "Reconciling open sessions failed");
            }
            let worker = tokio::spawn(async move { pipeline.run(feed).await });
            let reaper = spawn_ttl_reaper(
                store.clone(),
                clock,
                Duration::from_secs(config.pipeline.reaper_interval_secs),
            );
            info!(user_id = %user, journal = %store.path().display(), "Chat started");

            let result = chat_loop(&service, &user).await;
            reaper.abort();
            // Let the pipeline finish what is already queued.
            store.close_feeds();
            match worker.await {
                Ok(report) => info!(?report, "Summarization pipeline drained"),
                Err(e) => error!(error = %e, "Summarization pipeline task failed"),
            }
            result?;
        }
        Commands::History {
            user,
            cursor,
            limit,
        } => {
            let page = service.get_history(&user, cursor, limit).await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Commands::Sessions { user } => {
            let sessions = service.list_sessions(&user).await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
    }

    Ok(())
}

async fn chat_loop(service: &ChatService, user: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let banner = format!("Chatting as '{user}'. Type {EXIT_COMMAND} or press Ctrl-D to leave.\n");
    stdout.write_all(banner.as_bytes()).await?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == EXIT_COMMAND {
            break;
        }
        let output = match service.handle_user_turn(user, text).await {
            Ok(reply) => reply.content,
            Err(e) => {
                error!(user_id = %user, error = %e, "Turn failed");
                format!("[error] {e}")
            }
        };
        stdout.write_all(format!("{output}\n").as_bytes()).await?;
    }
    Ok(())
}
