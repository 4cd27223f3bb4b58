//! `agentflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — start the API server.
//! - `worker`   — drain queued tasks and resume delayed executions on a timer.
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a workflow JSON file.
//! - `next-run` — print the next fire time of a schedule.
//! - `drain`    — process the due tasks of one type once.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use api::{AppState, ServiceUrls};
use db::{MemoryStore, PgStore, Store};
use effects::DataMap;
use engine::{ExecutorConfig, Workflow, WORKFLOW_TRIGGER};
use queue::SEND_NOTIFICATION;

#[derive(Parser)]
#[command(name = "agentflow", about = "Personal-assistant workflow engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "AGENTFLOW_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
        /// Keep everything in process memory instead of Postgres.
        #[arg(long)]
        in_memory: bool,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Drain notification and trigger tasks and resume delayed executions.
    Worker {
        /// Seconds between polling rounds.
        #[arg(long, env = "WORKER_POLL_SECS", default_value_t = 30)]
        poll_secs: u64,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Print when a schedule fires next.
    NextRun {
        /// daily, weekly, monthly or interval.
        schedule_type: String,
        /// Schedule config as a JSON object.
        #[arg(long, default_value = "{}")]
        config: String,
        /// Reference instant (RFC 3339); defaults to now.
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Process every due task of one type, then exit.
    Drain {
        task_type: String,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
}

/// Settings shared by the commands that run workflows.
#[derive(Args)]
struct RuntimeArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    db_max_connections: u32,
    #[arg(long, env = "BIRTHDAY_SERVICE_URL")]
    birthday_url: Option<String>,
    #[arg(long, env = "SENTIMENT_SERVICE_URL")]
    sentiment_url: Option<String>,
    #[arg(long, env = "EMAIL_RELAY_URL")]
    email_relay_url: Option<String>,
    #[arg(long, env = "WHATSAPP_RELAY_URL")]
    whatsapp_relay_url: Option<String>,
    /// Upper bound on every external service call.
    #[arg(long, env = "EFFECT_TIMEOUT_SECS")]
    effect_timeout_secs: Option<u64>,
    /// Delays longer than this suspend the execution.
    #[arg(long, env = "INLINE_DELAY_LIMIT_SECS", default_value_t = 60)]
    inline_delay_limit_secs: u64,
}

impl RuntimeArgs {
    async fn store(&self, in_memory: bool) -> Result<Arc<dyn Store>> {
        if in_memory {
            warn!("using the in-memory store; nothing will be persisted");
            return Ok(Arc::new(MemoryStore::new()));
        }
        let Some(url) = self.database_url.as_deref() else {
            bail!("DATABASE_URL is required (or pass --in-memory to serve)");
        };
        let pool = db::pool::create_pool(url, self.db_max_connections)
            .await
            .context("failed to connect to database")?;
        Ok(Arc::new(PgStore::new(pool)))
    }

    fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            effect_timeout: self.effect_timeout_secs.map(Duration::from_secs),
            inline_delay_limit: Duration::from_secs(self.inline_delay_limit_secs),
        }
    }

    fn urls(&self) -> ServiceUrls {
        ServiceUrls {
            birthday: self.birthday_url.clone(),
            sentiment: self.sentiment_url.clone(),
            email_relay: self.email_relay_url.clone(),
            whatsapp_relay: self.whatsapp_relay_url.clone(),
        }
    }

    async fn state(&self, in_memory: bool) -> Result<AppState> {
        let store = self.store(in_memory).await?;
        AppState::wire(store, self.urls(), self.executor_config())
            .context("failed to build the HTTP client")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, in_memory, runtime } => {
            let state = runtime.state(in_memory).await?;
            info!("Starting API server on {bind}");
            api::serve(&bind, state).await?;
        }
        Command::Worker { poll_secs, runtime } => {
            let state = runtime.state(false).await?;
            info!(poll_secs, "Starting background worker");
            run_worker(&state, Duration::from_secs(poll_secs.max(1))).await;
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read file {}", path.display()))?;
            let workflow: Workflow = serde_json::from_str(&content).context("invalid workflow JSON")?;

            match workflow.validate() {
                Ok(()) => println!("✅ Workflow '{}' is valid ({} steps).", workflow.name, workflow.steps.len()),
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::NextRun { schedule_type, config, now } => {
            let config: DataMap = serde_json::from_str(&config).context("--config must be a JSON object")?;
            let next = engine::next_run(&schedule_type, &config, now.unwrap_or_else(Utc::now));
            println!("{}", next.to_rfc3339());
        }
        Command::Drain { task_type, runtime } => {
            let state = runtime.state(false).await?;
            let outcomes = state.processor.drain(&task_type).await?;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
    }

    Ok(())
}

/// Poll until Ctrl-C. A failing round is logged and retried on the next tick.
async fn run_worker(state: &AppState, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => poll_once(state).await,
            _ = tokio::signal::ctrl_c() => {
                info!("Worker stopped");
                return;
            }
        }
    }
}

async fn poll_once(state: &AppState) {
    for task_type in [SEND_NOTIFICATION, WORKFLOW_TRIGGER] {
        match state.processor.drain(task_type).await {
            Ok(outcomes) if !outcomes.is_empty() => info!(task_type, processed = outcomes.len(), "drained tasks"),
            Ok(_) => {}
            Err(e) => error!(task_type, error = %e, "drain failed"),
        }
    }

    match state.executor.resume_due(Utc::now()).await {
        Ok(resumed) if !resumed.is_empty() => info!(resumed = resumed.len(), "resumed delayed executions"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "resuming delayed executions failed"),
    }
}
