//! CLI command definitions for task-capture.
//!
//! Two long-running commands share one configuration:
//!
//! - `serve`: the HTTP API, optionally with workers in the same process
//! - `worker`: a standalone worker pool
//!
//! Both read [`AppConfig`] from the environment and pick the job backend with
//! the global `--backend` flag.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::config::{AppConfig, ConfigError};
use crate::document::NotionClient;
use crate::llm::{ChatClient, LlmPlanner, LlmResearcher};
use crate::pipeline::EnrichmentPipeline;
use crate::scheduler::{
    InMemoryJobQueue, InMemoryJobStore, JobQueue, JobStore, RedisJobQueue, RedisJobStore,
    StatusService, SubmissionService, WorkerPool, DEFAULT_QUEUE_NAME,
};

/// Task capture service: queue short task notes, enrich them and file them
/// as Notion pages.
#[derive(Parser)]
#[command(name = "task-capture")]
#[command(about = "Capture tasks over HTTP and enrich them asynchronously")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Where jobs and the queue live.
    #[arg(long, value_enum, default_value = "redis", env = "JOB_BACKEND", global = true)]
    pub backend: Backend,
}

/// Job store and queue implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Redis at `REDIS_URL`; shared between processes.
    Redis,
    /// In-process maps; jobs are lost on exit.
    Memory,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the HTTP API.
    Serve(ServeArgs),

    /// Run a worker pool that processes queued jobs.
    Worker(WorkerArgs),
}

/// Arguments for `task-capture serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0", env = "SERVER_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value = "8000", env = "SERVER_PORT")]
    pub port: u16,

    /// Also run this many workers inside the API process.
    #[arg(long, default_value = "0")]
    pub with_workers: usize,
}

/// Arguments for `task-capture worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of concurrent workers (default: WORKER_COUNT or 1).
    #[arg(short = 'n', long)]
    pub workers: Option<usize>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Serve(args) => run_serve_command(args, cli.backend, config).await,
        Commands::Worker(args) => run_worker_command(args, cli.backend, config).await,
    }
}

/// Store and queue shared by the API and the workers.
struct Backends {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
}

async fn connect_backends(backend: Backend, config: &AppConfig) -> anyhow::Result<Backends> {
    match backend {
        Backend::Redis => {
            let store = RedisJobStore::connect(&config.redis_url, config.store_config())
                .await
                .context("Failed to connect job store")?;
            let queue = RedisJobQueue::connect(&config.redis_url, DEFAULT_QUEUE_NAME)
                .await
                .context("Failed to connect job queue")?;
            info!(backend = "redis", "Job backend connected");
            Ok(Backends {
                store: Arc::new(store),
                queue: Arc::new(queue),
            })
        }
        Backend::Memory => {
            info!(backend = "memory", "Using in-process job backend");
            Ok(Backends {
                store: Arc::new(InMemoryJobStore::new(config.store_config())),
                queue: Arc::new(InMemoryJobQueue::new()),
            })
        }
    }
}

/// Builds the LLM and Notion stages from configuration.
fn build_pipeline(config: &AppConfig) -> anyhow::Result<Arc<EnrichmentPipeline>> {
    let api_key = config
        .openai_api_key
        .clone()
        .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

    let llm = Arc::new(
        ChatClient::new(config.openai_api_base.clone(), api_key)?
            .with_project_id(config.openai_project_id.clone()),
    );
    let planner = Arc::new(LlmPlanner::new(llm.clone(), config.model_plan.clone()));
    let researcher = Arc::new(LlmResearcher::new(llm, config.model_research.clone()));
    let documents = Arc::new(NotionClient::new(config.notion_config()?)?);

    Ok(Arc::new(EnrichmentPipeline::new(
        planner, researcher, documents,
    )))
}

async fn run_serve_command(
    args: ServeArgs,
    backend: Backend,
    config: AppConfig,
) -> anyhow::Result<()> {
    let backends = connect_backends(backend, &config).await?;

    let pipeline = match build_pipeline(&config) {
        Ok(pipeline) => Some(pipeline),
        Err(e) if args.with_workers == 0 => {
            warn!(error = %e, "Enrichment stages not configured; POST /capture is disabled");
            None
        }
        Err(e) => return Err(e.context("In-process workers need the enrichment stages")),
    };

    if backend == Backend::Memory && args.with_workers == 0 {
        warn!("Memory backend without --with-workers: submitted jobs will never run");
    }
    if config.api_key.is_none() {
        warn!("API_KEY is not set; authenticated routes will reject every request");
    }

    let mut pool = match (&pipeline, args.with_workers) {
        (Some(pipeline), n) if n > 0 => {
            let mut pool = WorkerPool::new(
                config.pool_config(n),
                backends.store.clone(),
                backends.queue.clone(),
                pipeline.clone(),
            );
            pool.start().await?;
            Some(pool)
        }
        _ => None,
    };

    let mut state = AppState::new(
        SubmissionService::new(backends.store.clone(), backends.queue.clone()),
        StatusService::new(backends.store.clone()),
    )
    .with_api_key(config.api_key.clone());
    if let Some(pipeline) = pipeline {
        state = state.with_pipeline(pipeline);
    }

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", args.host, args.port))?;
    info!(host = %args.host, port = args.port, "HTTP API listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(pool) = pool.as_mut() {
        pool.shutdown().await?;
        log_pool_stats(pool);
    }

    Ok(())
}

async fn run_worker_command(
    args: WorkerArgs,
    backend: Backend,
    config: AppConfig,
) -> anyhow::Result<()> {
    if backend == Backend::Memory {
        warn!("Memory backend in a standalone worker: only jobs submitted to this process exist");
    }

    let num_workers = args.workers.unwrap_or(config.worker_count);
    if num_workers == 0 {
        anyhow::bail!("--workers must be greater than 0");
    }

    let backends = connect_backends(backend, &config).await?;
    let pipeline = build_pipeline(&config)?;

    let mut pool = WorkerPool::new(
        config.pool_config(num_workers),
        backends.store,
        backends.queue,
        pipeline,
    );
    pool.start().await?;

    shutdown_signal().await;

    pool.shutdown().await?;
    log_pool_stats(&pool);
    Ok(())
}

fn log_pool_stats(pool: &WorkerPool) {
    let stats = pool.stats();
    info!(
        succeeded = stats.jobs_succeeded,
        failed = stats.jobs_failed,
        skipped = stats.jobs_skipped,
        abandoned = stats.jobs_abandoned,
        success_rate = stats.success_rate(),
        "Worker pool stopped"
    );
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_with_workers() {
        let cli = Cli::try_parse_from([
            "task-capture",
            "--backend",
            "memory",
            "serve",
            "--port",
            "9000",
            "--with-workers",
            "2",
        ])
        .expect("parse");

        assert_eq!(cli.backend, Backend::Memory);
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, 9000);
                assert_eq!(args.with_workers, 2);
            }
            Commands::Worker(_) => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_worker_with_global_log_level() {
        let cli = Cli::try_parse_from(["task-capture", "worker", "-n", "3", "--log-level", "debug"])
            .expect("parse");
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Worker(args) => assert_eq!(args.workers, Some(3)),
            Commands::Serve(_) => panic!("expected worker"),
        }
    }

    #[test]
    fn test_build_pipeline_requires_llm_key() {
        let err = build_pipeline(&AppConfig::default()).err().expect("missing key");
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
