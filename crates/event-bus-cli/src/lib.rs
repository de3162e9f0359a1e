//! # Event Bus CLI
//!
//! Command-line interface over the event-bus queue client.
//!
//! Every client operation is exposed as a subcommand:
//! - `publish` / `publish-batch` send messages
//! - `pull` / `drain` / `subscribe` receive them
//! - `purge` empties the queue
//! - `config` prints the resolved configuration
//!
//! Configuration is layered with the `config` crate: an optional system file,
//! an optional `config/event-bus` file in the working directory, the file
//! given with `--config`, then `EVENT_BUS__*` environment variables.

use clap::{CommandFactory, Parser, Subcommand};
use event_bus::{
    handler_fn, ConfigurationError, Message, MessageHandler, ProviderConfig, QueueClient,
    QueueClientFactory, QueueConfig, QueueError, QueueName, SubscriptionExit,
};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "EVENT_BUS";

const SYSTEM_CONFIG_FILE: &str = "/etc/event-bus/config";
const LOCAL_CONFIG_FILE: &str = "config/event-bus";

// ============================================================================
// CLI Structure
// ============================================================================

/// Event Bus CLI - publish and consume queue messages
#[derive(Parser)]
#[command(name = "event-bus")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publish and consume messages on an event bus queue")]
#[command(
    long_about = "Drives the event-bus queue client against AWS SQS or an in-memory broker, \
                  with publish rate limiting, batch retry and background subscriptions"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "EVENT_BUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue name or URL; names ending in `.fifo` select FIFO semantics
    #[arg(short, long, env = "EVENT_BUS_QUEUE")]
    pub queue: Option<String>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Publish one message
    Publish {
        /// Message body
        body: String,

        /// Deduplication id (FIFO queues)
        #[arg(long)]
        dedup_id: Option<String>,

        /// Message group id (FIFO queues)
        #[arg(long)]
        group_id: Option<String>,
    },

    /// Publish one message per line of a file
    PublishBatch {
        /// File with one body per line; reads stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Receive messages once
    Pull {
        /// Seconds to wait for the first message
        #[arg(short, long)]
        wait: Option<u64>,

        /// Maximum number of messages to receive
        #[arg(short, long)]
        max: Option<u32>,

        /// Acknowledge the received messages
        #[arg(long)]
        ack: bool,
    },

    /// Print and acknowledge messages until the queue is empty
    Drain,

    /// Print and acknowledge messages until interrupted
    Subscribe {
        /// Long-poll wait in seconds
        #[arg(short, long)]
        wait: Option<u64>,
    },

    /// Delete every message in the queue
    Purge {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show resolved configuration
    Config {
        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Configuration format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code reported for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Could not load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ConfigurationError),

    #[error("Could not render configuration: {message}")]
    Render { message: String },
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli)?;

    let mut stdout = std::io::stdout();
    run(cli, &mut stdout).await
}

/// Execute a parsed command line, writing command output to `out`
pub async fn run(cli: Cli, out: &mut (dyn Write + Send)) -> Result<(), CliError> {
    match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "event-bus", out);
            Ok(())
        }
        Commands::Config { format } => {
            let config = load_configuration(cli.config.as_deref())?;
            write_configuration(&config, &format, out)
        }
        command => {
            let mut config = load_configuration(cli.config.as_deref())?;
            if let Commands::Subscribe { wait: Some(wait) } = &command {
                config.subscribe_wait_seconds = *wait;
            }

            let queue = resolve_queue(cli.queue)?;
            let client = QueueClientFactory::create_client(config, queue)?;
            execute_command(command, &client, out).await
        }
    }
}

/// Execute a queue command against an existing client
pub async fn execute_command(
    command: Commands,
    client: &QueueClient,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    match command {
        Commands::Publish {
            body,
            dedup_id,
            group_id,
        } => execute_publish_command(client, body, dedup_id, group_id, out).await,
        Commands::PublishBatch { file } => execute_publish_batch_command(client, file, out).await,
        Commands::Pull { wait, max, ack } => execute_pull_command(client, wait, max, ack, out).await,
        Commands::Drain => execute_drain_command(client, out).await,
        Commands::Subscribe { .. } => execute_subscribe_command(client).await,
        Commands::Purge { yes } => execute_purge_command(client, yes, out).await,
        Commands::Config { .. } | Commands::Completions { .. } => Err(CliError::CommandFailed {
            message: "command does not operate on a queue".to_string(),
        }),
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Initialize logging based on CLI arguments
///
/// `RUST_LOG` wins over `--log-level`. Logs go to stderr so command output
/// on stdout stays machine readable.
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "event_bus={level},event_bus_cli={level}",
            level = cli.log_level
        )
        .into()
    });

    let json_layer = cli
        .json_logs
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    let text_layer =
        (!cli.json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| CliError::CommandFailed {
            message: format!("could not initialize logging: {}", e),
        })
}

/// Load layered configuration and validate it
///
/// Sources, later ones overriding earlier ones:
/// 1. `/etc/event-bus/config.{yaml,toml,json}` (optional)
/// 2. `config/event-bus.{yaml,toml,json}` (optional)
/// 3. `path`, when given (required; format from its extension)
/// 4. `EVENT_BUS__*` environment variables, `__` separating nested keys
pub fn load_configuration(path: Option<&Path>) -> Result<QueueConfig, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name(SYSTEM_CONFIG_FILE).required(false))
        .add_source(config::File::with_name(LOCAL_CONFIG_FILE).required(false));

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        info!(path = %path.display(), "Loading configuration from explicit path");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config: QueueConfig = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    config.validate()?;
    Ok(config)
}

fn resolve_queue(queue: Option<String>) -> Result<QueueName, CliError> {
    let queue = queue.ok_or_else(|| CliError::InvalidArgument {
        arg: "--queue".to_string(),
        message: "a queue is required (or set EVENT_BUS_QUEUE)".to_string(),
    })?;

    QueueName::new(queue).map_err(|e| CliError::InvalidArgument {
        arg: "--queue".to_string(),
        message: e.to_string(),
    })
}

/// Read message bodies, one per line, skipping blank lines
pub fn read_bodies(reader: impl BufRead) -> Result<Vec<String>, std::io::Error> {
    let mut bodies = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let body = line.trim_end_matches('\r');
        if !body.trim().is_empty() {
            bodies.push(body.to_string());
        }
    }
    Ok(bodies)
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Print the resolved configuration with credentials masked
fn write_configuration(
    config: &QueueConfig,
    format: &ConfigFormat,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let mut shown = config.clone();
    if let ProviderConfig::AwsSqs(aws) = &mut shown.provider {
        if aws.secret_access_key.is_some() {
            aws.secret_access_key = Some("<redacted>".to_string());
        }
    }

    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(&shown).map_err(|e| ConfigError::Render {
            message: e.to_string(),
        })?,
        ConfigFormat::Json => {
            serde_json::to_string_pretty(&shown).map_err(|e| ConfigError::Render {
                message: e.to_string(),
            })?
        }
    };

    writeln!(out, "{}", rendered.trim_end())?;
    Ok(())
}

async fn execute_publish_command(
    client: &QueueClient,
    body: String,
    dedup_id: Option<String>,
    group_id: Option<String>,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let mut message = Message::new(body);
    if let Some(dedup_id) = dedup_id {
        message = message.with_deduplication_id(dedup_id);
    }
    if let Some(group_id) = group_id {
        message = message.with_message_group_id(group_id);
    }

    let message_id = client.publish(message).await?;
    writeln!(out, "{}", message_id)?;
    Ok(())
}

async fn execute_publish_batch_command(
    client: &QueueClient,
    file: Option<PathBuf>,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let bodies = match &file {
        Some(path) => read_bodies(std::io::BufReader::new(std::fs::File::open(path)?))?,
        None => read_bodies(std::io::stdin().lock())?,
    };

    if bodies.is_empty() {
        warn!(queue = %client.queue(), "No message bodies to publish");
        return Ok(());
    }

    let message_ids = client.publish_batch(bodies).await?;
    for message_id in &message_ids {
        writeln!(out, "{}", message_id)?;
    }

    info!(queue = %client.queue(), count = message_ids.len(), "Batch published");
    Ok(())
}

async fn execute_pull_command(
    client: &QueueClient,
    wait: Option<u64>,
    max: Option<u32>,
    ack: bool,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let wait = wait
        .map(Duration::from_secs)
        .unwrap_or_else(|| client.config().drain_wait());
    let messages = client.pull_batch(wait, max).await?;

    for handle in messages {
        let line = serde_json::json!({
            "message_id": handle.message_id().as_str(),
            "body": handle.raw_message(),
            "message_group_id": handle.message_group_id(),
            "delivery_count": handle.delivery_count(),
        });
        writeln!(out, "{}", line)?;

        if ack {
            handle.complete().await?;
        }
    }

    Ok(())
}

/// Handler writing each body to stdout
fn print_handler() -> Arc<dyn MessageHandler> {
    Arc::new(handler_fn("stdout", |body: String| async move {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", body)?;
        Ok::<_, anyhow::Error>(())
    }))
}

async fn execute_drain_command(
    client: &QueueClient,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let handler = print_handler();
    let handled = client.pull_all(handler.as_ref()).await?;

    writeln!(out, "Drained {} message(s) from {}", handled, client.queue())?;
    Ok(())
}

async fn execute_subscribe_command(client: &QueueClient) -> Result<(), CliError> {
    let subscription = client.subscribe(print_handler());

    let shutdown = subscription.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; stopping subscription");
        }
        shutdown.cancel();
    });

    match subscription.join().await {
        SubscriptionExit::Stopped => Ok(()),
        SubscriptionExit::Failed(e) => Err(CliError::Queue(e)),
        SubscriptionExit::Panicked(message) => Err(CliError::CommandFailed { message }),
    }
}

async fn execute_purge_command(
    client: &QueueClient,
    yes: bool,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    if !yes {
        return Err(CliError::InvalidArgument {
            arg: "--yes".to_string(),
            message: "purge deletes every message in the queue; pass --yes to confirm".to_string(),
        });
    }

    client.purge().await?;
    writeln!(out, "Purged {}", client.queue())?;
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
