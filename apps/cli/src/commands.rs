//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use sanitize_core::{StageContext, TaskProcessor};
use sanitize_shared::{AppConfig, PipelineContext, StageConfig, Task, init_config, load_config};
use sanitize_storage::{Storage, TaskQueue};
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Sanitize: clean entity text and extract phone numbers as a pipeline stage.
#[derive(Parser)]
#[command(
    name = "sanitize",
    version,
    about = "Pipeline stage that normalizes entity text and extracts phone numbers.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Default phone region, overriding the config file.
    #[arg(long, env = "SANITIZE_PHONE_REGION", global = true)]
    pub region: Option<String>,

    /// Database path, overriding the config file.
    #[arg(long, env = "SANITIZE_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Stage name, overriding the config file.
    #[arg(long, global = true)]
    pub stage: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Consume and process tasks addressed to this stage.
    Worker {
        /// Drain pending tasks, then exit instead of polling.
        #[arg(long)]
        once: bool,

        /// Idle poll interval in milliseconds.
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
    },

    /// Enqueue a task.
    Submit {
        /// Collection (dataset) the task belongs to.
        #[arg(short, long)]
        collection: String,

        /// Stages to run after the target stage, comma separated.
        #[arg(short, long, value_delimiter = ',')]
        pipeline: Vec<String>,

        /// Task payload as JSON (defaults to `{}`).
        #[arg(long)]
        payload: Option<String>,

        /// Job id (generated when omitted).
        #[arg(long)]
        job: Option<String>,

        /// Task priority; higher is claimed first.
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sanitize=info",
        1 => "sanitize=debug",
        _ => "sanitize=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Flags that override config file values.
struct Overrides {
    region: Option<String>,
    db: Option<PathBuf>,
    stage: Option<String>,
}

impl Overrides {
    fn stage_config(&self, config: &AppConfig) -> StageConfig {
        let mut stage = StageConfig::from(config);
        if let Some(region) = &self.region {
            stage.default_region = region.clone();
        }
        if let Some(name) = &self.stage {
            stage.stage = name.clone();
        }
        stage
    }

    fn db_path(&self, config: &AppConfig) -> PathBuf {
        self.db
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.storage.path))
    }
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let overrides = Overrides {
        region: cli.region,
        db: cli.db,
        stage: cli.stage,
    };

    match cli.command {
        Command::Worker { once, poll_ms } => cmd_worker(&overrides, once, poll_ms).await,
        Command::Submit {
            collection,
            pipeline,
            payload,
            job,
            priority,
        } => {
            cmd_submit(
                &overrides,
                &collection,
                pipeline,
                payload.as_deref(),
                job,
                priority,
            )
            .await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_worker(overrides: &Overrides, once: bool, poll_ms: u64) -> Result<()> {
    let config = load_config()?;
    let stage_config = overrides.stage_config(&config);
    let db_path = overrides.db_path(&config);

    let storage = Storage::open(&db_path).await?;
    let processor = TaskProcessor::new(StageContext {
        store: storage.clone(),
        queue: storage.clone(),
        config: stage_config,
    })?;
    let stage = processor.context().config.stage.clone();

    info!(
        %stage,
        db = %db_path.display(),
        mode = ?processor.context().config.mode,
        payload = ?processor.context().config.payload,
        "worker started"
    );

    let mut processed = 0usize;
    let mut failed = 0usize;

    loop {
        let delivery = match storage.claim(&stage).await? {
            Some(delivery) => delivery,
            None if once => break,
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(poll_ms)) => {}
                    _ = signal::ctrl_c() => {
                        info!("interrupted, shutting down");
                        break;
                    }
                }
                continue;
            }
        };

        let task_id = delivery.task.task_id.clone();
        let attempts = delivery.attempts;
        match processor.process(delivery.task).await {
            Ok(_) => {
                storage.ack(&task_id).await?;
                processed += 1;
            }
            Err(e) => {
                error!(%task_id, attempts, error = %e, "task failed, returning it to the queue");
                storage.nack(&task_id).await?;
                failed += 1;
                if once {
                    warn!("stopping drain after a failed task");
                    break;
                }
            }
        }
    }

    info!(processed, failed, "worker stopped");
    if failed > 0 && once {
        return Err(eyre!("{failed} task(s) failed"));
    }
    Ok(())
}

async fn cmd_submit(
    overrides: &Overrides,
    collection: &str,
    pipeline: Vec<String>,
    payload: Option<&str>,
    job: Option<String>,
    priority: i32,
) -> Result<()> {
    let config = load_config()?;
    let stage = overrides.stage_config(&config).stage;

    let payload = match payload {
        Some(raw) => serde_json::from_str(raw).map_err(|e| eyre!("invalid --payload JSON: {e}"))?,
        None => serde_json::json!({}),
    };
    let pipeline: Vec<String> = pipeline.into_iter().filter(|s| !s.is_empty()).collect();
    let job_id = job.unwrap_or_else(|| Uuid::now_v7().to_string());

    let mut task = Task::new(
        collection,
        stage,
        job_id,
        PipelineContext::with_pipeline(pipeline),
        payload,
    );
    task.priority = priority;

    let storage = Storage::open(&overrides.db_path(&config)).await?;
    storage.submit(&task).await?;

    println!("Submitted task {} to stage '{}'", task.task_id, task.operation);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
