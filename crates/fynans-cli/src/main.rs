//! Runs receipt images through the pipeline from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use fynans_receipt::config::{apply_env_overrides, load_config, QueueStoreKind};
use fynans_receipt::worker::SubmitReceiptRequest;
use fynans_receipt::{
    init_tracing, submit, Collaborators, Config, Database, InMemoryFinanceStore, JobQueue,
    JobStatus, ReceiptEnricher, ReceiptJobProcessor, ReceiptJobQueue, ReceiptPipeline,
    SqliteJobStore, WorkerPool,
};

#[derive(Parser)]
#[command(name = "fynans-receipt")]
#[command(about = "Extract structured data from receipt images")]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one receipt image and print the result
    Process {
        image: PathBuf,
        /// User whose items and categories guide parsing
        #[arg(long)]
        user: Option<String>,
        /// Print only the final JSON status
        #[arg(long)]
        json: bool,
    },

    /// Print job counts from the durable job store
    StatusDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = read_config(cli.config.as_deref())?;
    init_tracing(&config.logging)?;

    match cli.command {
        Commands::Process { image, user, json } => cmd_process(config, &image, user, json).await,
        Commands::StatusDb => cmd_status_db(&config),
    }
}

fn read_config(path: Option<&std::path::Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

async fn cmd_process(
    config: Config,
    image: &std::path::Path,
    user_id: Option<String>,
    json: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read {}", image.display()))?;

    let collaborators = Collaborators::from_store(Arc::new(InMemoryFinanceStore::new()));
    let pipeline = ReceiptPipeline::from_config(&config, &collaborators)?;
    let processor = ReceiptJobProcessor::new(
        Arc::new(pipeline),
        Arc::new(ReceiptEnricher::new(&collaborators)),
        config.progress.clone(),
    );

    let queue = Arc::new(ReceiptJobQueue::from_config(&config.queue)?);
    let mut events = queue.events().subscribe();
    let pool = WorkerPool::spawn(Arc::clone(&queue), Arc::new(processor), &config.worker);

    let job_id = submit(
        queue.as_ref(),
        SubmitReceiptRequest {
            image_base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
            user_id,
        },
    )
    .await?
    .job_id;

    loop {
        match events.recv().await {
            Ok(event) if event.job_id == job_id => {
                if !json {
                    eprintln!("[{:>3}%] {}", event.progress, event.message);
                }
                if matches!(event.status, JobStatus::Completed | JobStatus::Failed) {
                    break;
                }
            }
            Ok(_) => {}
            // Missed events are fine; the status lookup below is authoritative.
            Err(RecvError::Lagged(_)) => {
                if matches!(
                    queue.fetch_status(&job_id).await?,
                    JobStatus::Completed | JobStatus::Failed
                ) {
                    break;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }

    let response = queue.fetch_result(&job_id).await?;
    pool.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    if response.status == JobStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_status_db(config: &Config) -> Result<()> {
    if config.queue.store != QueueStoreKind::Sqlite {
        eprintln!("Note: queue.store is not \"sqlite\"; reading the database anyway");
    }

    let db = Database::open_configured(config.queue.database_path.as_deref())?;
    let queue = ReceiptJobQueue::new(Arc::new(SqliteJobStore::new(db)), &config.queue);

    let counts = queue.counts()?;
    for (state, count) in &counts {
        println!("{:<10} {}", state.as_str(), count);
    }
    let total: usize = counts.iter().map(|(_, n)| n).sum();
    println!("{:<10} {}", "total", total);

    if let Some(next) = queue.next_run_at()? {
        println!("next run  {}", next.to_rfc3339());
    }
    Ok(())
}
