//! archivist CLI entry point

use anyhow::Context;
use archivist::bootstrap::{self, App};
use archivist::config::Config;
use archivist::domain::{AgentChatRequest, AgentInputMessage, SearchFilter};
use archivist::ports::{IngestHandler, MessageQueue, QueryService};
use clap::{Parser, Subcommand};
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PROCESS_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "archivist")]
#[command(version, about = "Personal document-assistant backend", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a document and queue it for processing
    Ingest {
        /// Path to the file to upload
        path: PathBuf,

        /// MIME type recorded with the document
        #[arg(long, default_value = "text/plain")]
        mime: String,
    },

    /// Ask a question over the indexed documents
    Query {
        /// The question to answer
        question: String,

        /// Maximum number of source chunks
        #[arg(short, long, default_value = "5")]
        limit: i64,

        /// Restrict retrieval to one category
        #[arg(long)]
        category: Option<String>,
    },

    /// Run one agent turn
    Agent {
        /// The user message
        message: String,

        /// User id owning the conversation
        #[arg(long, default_value = "local")]
        user: String,

        /// Conversation to continue; a new one is created when omitted
        #[arg(long)]
        conversation: Option<String>,

        /// Mark the session as ended (forces a memory summary)
        #[arg(long)]
        session_end: bool,
    },

    /// Consume the ingestion queue and process documents
    Worker,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load();

    let default_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let app = bootstrap::build(config).await?;

    match cli.command {
        Commands::Ingest { path, mime } => handle_ingest(&app, &path, &mime).await?,
        Commands::Query {
            question,
            limit,
            category,
        } => handle_query(&app, &question, limit, category).await?,
        Commands::Agent {
            message,
            user,
            conversation,
            session_end,
        } => handle_agent(&app, message, user, conversation, session_end).await?,
        Commands::Worker => handle_worker(&app).await?,
    }

    Ok(())
}

async fn handle_ingest(app: &App, path: &PathBuf, mime: &str) -> anyhow::Result<()> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("path has no file name")?
        .to_string();
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open {}", path.display()))?;

    let doc = app.ingest.upload(&filename, mime, &mut file).await?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

async fn handle_query(
    app: &App,
    question: &str,
    limit: i64,
    category: Option<String>,
) -> anyhow::Result<()> {
    let filter = SearchFilter { category };
    let answer = app.query.answer(question, limit, &filter).await?;

    println!("{}", answer.text);
    println!();
    println!(
        "mode={} semantic={} lexical={} reranked={}",
        answer.retrieval.mode,
        answer.retrieval.semantic_candidates,
        answer.retrieval.lexical_candidates,
        answer.retrieval.rerank_applied
    );
    for (idx, source) in answer.sources.iter().enumerate() {
        println!(
            "[{}] {} (doc={} chunk={} score={:.4})",
            idx + 1,
            source.filename,
            source.document_id,
            source.chunk_index,
            source.score
        );
    }
    Ok(())
}

async fn handle_agent(
    app: &App,
    message: String,
    user: String,
    conversation: Option<String>,
    session_end: bool,
) -> anyhow::Result<()> {
    let request = AgentChatRequest {
        user_id: user,
        conversation_id: conversation.unwrap_or_default(),
        session_end,
        messages: vec![AgentInputMessage {
            role: "user".to_string(),
            content: message,
        }],
    };

    let result = app.agent.complete(request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn handle_worker(app: &App) -> anyhow::Result<()> {
    let process = app.process.clone();
    let handler: IngestHandler = Arc::new(move |document_id: String| {
        let process = process.clone();
        async move {
            let started = Instant::now();
            info!(document_id = %document_id, "document_processing_started");

            let result =
                tokio::time::timeout(PROCESS_TIMEOUT, process.process_by_id(&document_id)).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(Ok(())) => {
                    info!(
                        document_id = %document_id,
                        duration_ms,
                        "document_processing_completed"
                    );
                    Ok(())
                }
                Ok(Err(err)) => {
                    error!(
                        document_id = %document_id,
                        duration_ms,
                        error = %err,
                        "document_processing_failed"
                    );
                    Err(err)
                }
                Err(_elapsed) => {
                    error!(
                        document_id = %document_id,
                        duration_ms,
                        "document_processing_timed_out"
                    );
                    Err(archivist::Error::Canceled)
                }
            }
        }
        .boxed()
    });

    // notify_one stores a permit, so a ctrl-c delivered while a document
    // is mid-processing still stops the loop at the next iteration.
    let shutdown = Arc::new(Notify::new());
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown_signal_received");
            signal_shutdown.notify_one();
        }
    });

    info!(subject = %app.config.nats_subject, "worker_subscribed");
    app.queue.subscribe_document_ingested(handler, shutdown).await?;
    app.queue.close().await?;
    Ok(())
}
