//! Worker CLI - runs a job message through the execution context tree.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use worker_context::{ExecutionContext, JobServices, WorkerConfig};
use worker_core::{JobMessage, RecordId, TaskResult};
use worker_services::{ChannelQueue, FileLoggerFactory};

#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "CI job execution tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Worker configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a job: start it, run one child per task, complete it
    Run {
        /// Job message file (JSON)
        #[arg(long)]
        message: PathBuf,
        /// Task to create under the job (repeatable)
        #[arg(long = "task")]
        tasks: Vec<String>,
        /// Task to report as failed (repeatable)
        #[arg(long = "fail")]
        failed: Vec<String>,
        /// Job timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print the effective worker configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => WorkerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => WorkerConfig::default(),
    };

    match cli.command {
        Commands::Run { message, tasks, failed, timeout } => {
            let content = std::fs::read_to_string(&message)
                .with_context(|| format!("reading job message {}", message.display()))?;
            let message: JobMessage = serde_json::from_str(&content)?;
            run(&message, &config, &tasks, &failed, timeout).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run(
    message: &JobMessage,
    config: &WorkerConfig,
    tasks: &[String],
    failed: &[String],
    timeout: Option<u64>,
) -> Result<()> {
    let (queue, mut updates) = ChannelQueue::new();
    let services = JobServices::new(
        Arc::new(queue),
        Arc::new(FileLoggerFactory::new(&config.log_directory)),
    );

    // Stand-in for the delivery side: print every update as a JSON line.
    let printer = tokio::spawn(async move {
        while let Some(item) = updates.recv().await {
            match serde_json::to_string(&item) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize update: {}", e),
            }
        }
    });

    let job_token = CancellationToken::new();
    let ctrl_c_token = job_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let result = {
        let job = ExecutionContext::initialize_job(message, &job_token, services, config)?;
        job.start(None, timeout.map(std::time::Duration::from_secs))?;

        for name in tasks {
            let task = job.create_child(RecordId::new(), name)?;
            task.start(None, None)?;
            if job.is_cancelled() {
                task.warning("Job was cancelled before the task ran.");
                task.complete(Some(TaskResult::Cancelled), None);
                continue;
            }
            task.output(&format!("Running {}", name));
            task.progress(100, None)?;
            if failed.contains(name) {
                task.error(&format!("{} failed", name));
                task.complete(Some(TaskResult::Failed), None);
            } else {
                task.complete(None, None);
            }
        }

        job.complete(None, None)
    };

    printer.await?;
    info!("Job {} finished: {}", message.job_name, result);
    Ok(())
}
