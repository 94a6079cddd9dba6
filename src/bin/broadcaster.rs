//! # Broadcaster CLI
//!
//! Operates a broadcast queue stored in PostgreSQL: enqueue a campaign,
//! inspect its progress and failures, and drive the lifecycle controls.
//!
//! Only `work` and the `--wait` forms of the send commands start workers.
//! Every other command opens the queue without claiming anything.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser, Subcommand};
use tracing::info;

use broadcaster_core::logging::init_structured_logging;
use broadcaster_core::{
    BroadcastStatus, Broadcaster, BroadcasterConfig, ConfigManager, CopySource, RecipientId,
    TelegramApiConfig, TelegramBotApi,
};

#[derive(Parser, Debug)]
#[command(name = "broadcaster")]
#[command(about = "Fan one message out to many recipients through a durable queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration directory (default: $BROADCASTER_CONFIG_DIR or ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment overlay to load (default: $BROADCASTER_ENV or development)
    #[arg(short, long)]
    environment: Option<String>,

    /// Bot API token
    #[arg(long, env = "BROADCASTER_BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load and validate the configuration, then print it with secrets masked
    Validate,

    /// Send a text message to every recipient
    SendText {
        /// Message text
        #[arg(short, long)]
        text: String,
        /// Recipient ids or @usernames
        #[arg(required = true, num_args = 1..)]
        recipients: Vec<String>,
        /// Keep workers running until the queue settles
        #[arg(long)]
        wait: bool,
    },

    /// Copy an existing message to every recipient
    #[command(group(
        ArgGroup::new("source")
            .required(true)
            .args(["from_chat", "from_recipient"])
    ))]
    Copy {
        /// Chat the message lives in
        #[arg(long, allow_hyphen_values = true)]
        from_chat: Option<String>,
        /// Copy from each recipient's own chat
        #[arg(long)]
        from_recipient: bool,
        #[arg(long)]
        message_id: i64,
        #[arg(required = true, num_args = 1..)]
        recipients: Vec<String>,
        #[arg(long)]
        wait: bool,
    },

    /// Run workers and deliver queued jobs until interrupted
    Work {
        /// Exit once nothing is waiting, active or delayed
        #[arg(long)]
        until_settled: bool,
    },

    /// Show job counts per state
    Status,

    /// List failed jobs
    Failed {
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Print the normalized view with parsed failure reasons
        #[arg(long)]
        formatted: bool,
    },

    /// Stop claiming new jobs
    Pause,

    /// Resume claiming jobs
    Resume,

    /// Remove every job in every state
    Reset,

    /// Remove pending jobs, keeping completed and failed ones
    Terminate,
}

impl Commands {
    /// Whether the command delivers jobs itself
    fn runs_workers(&self) -> bool {
        match self {
            Self::Work { .. } => true,
            Self::SendText { wait, .. } | Self::Copy { wait, .. } => *wait,
            _ => false,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Without -v the library's env-driven setup applies (RUST_LOG, BROADCASTER_LOG_FORMAT)
    if cli.verbose == 0 {
        init_structured_logging();
    } else {
        let log_level = match cli.verbose {
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };
        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_target(false)
            .init();
    }

    let manager = match &cli.environment {
        Some(env) => ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), env),
        None => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .context("failed to load configuration")?;

    info!(
        environment = manager.environment(),
        config_dir = %manager.config_directory().display(),
        "Broadcaster CLI starting"
    );

    if let Commands::Validate = cli.command {
        println!("✅ Configuration is valid ({})", manager.environment());
        println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        return Ok(());
    }

    let config = manager.config().clone();
    let broadcaster = connect(cli.token.as_deref(), config, cli.command.runs_workers()).await?;

    let outcome = run(&broadcaster, cli.command).await;
    broadcaster.shutdown().await;
    outcome
}

async fn connect(
    token: Option<&str>,
    config: BroadcasterConfig,
    with_workers: bool,
) -> anyhow::Result<Broadcaster<TelegramBotApi>> {
    let Some(token) = token else {
        bail!("a bot token is required (--token or BROADCASTER_BOT_TOKEN)");
    };
    let api = TelegramBotApi::new(TelegramApiConfig {
        timeout_ms: config.request_timeout_ms,
        ..TelegramApiConfig::new(token)
    })?;
    let broadcaster = if with_workers {
        Broadcaster::connect(api, config).await?
    } else {
        Broadcaster::connect_control(api, config).await?
    };
    Ok(broadcaster)
}

async fn run(broadcaster: &Broadcaster<TelegramBotApi>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Validate => {}
        Commands::SendText {
            text,
            recipients,
            wait,
        } => {
            let count = recipients.len();
            broadcaster.send_text(recipients, text, None).await?;
            println!("📨 Enqueued {count} messages");
            if wait {
                wait_until_settled(broadcaster).await?;
            }
        }
        Commands::Copy {
            from_chat,
            from_recipient,
            message_id,
            recipients,
            wait,
        } => {
            let source = match (from_chat, from_recipient) {
                (Some(chat), false) => CopySource::Chat(RecipientId::from(chat)),
                (None, true) => CopySource::Recipient,
                _ => bail!("pass exactly one of --from-chat or --from-recipient"),
            };
            let count = recipients.len();
            broadcaster
                .copy_message(recipients, source, message_id, None)
                .await?;
            println!("📨 Enqueued {count} copies");
            if wait {
                wait_until_settled(broadcaster).await?;
            }
        }
        Commands::Work { until_settled } => {
            println!("🚀 Delivering with {} workers", broadcaster.config().processes);
            if until_settled {
                wait_until_settled(broadcaster).await?;
            } else {
                tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for ctrl-c")?;
                println!("🛑 Interrupted, finishing in-flight calls");
            }
        }
        Commands::Status => {
            let status = broadcaster.status().await?;
            print_status(&status, broadcaster.is_paused().await?);
        }
        Commands::Failed { limit, formatted } => {
            if formatted {
                let failed = broadcaster.failed_formatted(Some(limit)).await?;
                println!("{}", serde_json::to_string_pretty(&failed)?);
            } else {
                for job in broadcaster.failed_jobs(Some(limit)).await? {
                    println!(
                        "{}  {}  attempts={}  {}",
                        job.id,
                        job.recipient_id(),
                        job.attempt + 1,
                        job.failed_reason.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Commands::Pause => {
            broadcaster.pause().await?;
            println!("⏸️ Paused");
        }
        Commands::Resume => {
            broadcaster.resume().await?;
            println!("▶️ Resumed");
        }
        Commands::Reset => {
            let report = broadcaster.reset().await?;
            println!("🧹 Removed {} jobs", report.total());
        }
        Commands::Terminate => {
            let report = broadcaster.terminate().await?;
            println!(
                "🛑 Removed {} pending jobs (waiting={}, active={}, delayed={})",
                report.total(),
                report.waiting,
                report.active,
                report.delayed
            );
        }
    }
    Ok(())
}

async fn wait_until_settled(broadcaster: &Broadcaster<TelegramBotApi>) -> anyhow::Result<()> {
    loop {
        let status = broadcaster.status().await?;
        if status.is_settled() {
            print_status(&status, false);
            return Ok(());
        }
        println!("⏳ {:.1}%", broadcaster.progress());
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn print_status(status: &BroadcastStatus, paused: bool) {
    println!("waiting:   {}", status.waiting_count);
    println!("active:    {}", status.active_count);
    println!("delayed:   {}", status.delayed_count);
    println!("completed: {}", status.completed_count);
    println!("failed:    {}", status.failed_count);
    if paused {
        println!("(paused)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_copy_requires_an_explicit_source() {
        let missing = Cli::try_parse_from(["broadcaster", "copy", "--message-id", "7", "42"]);
        assert!(missing.is_err());

        let both = Cli::try_parse_from([
            "broadcaster",
            "copy",
            "--from-chat",
            "-100200",
            "--from-recipient",
            "--message-id",
            "7",
            "42",
        ]);
        assert!(both.is_err());

        let cli = Cli::try_parse_from([
            "broadcaster",
            "copy",
            "--from-recipient",
            "--message-id",
            "7",
            "42",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Copy {
                from_recipient: true,
                from_chat: None,
                ..
            }
        ));
    }

    #[test]
    fn test_only_delivering_commands_run_workers() {
        let parse = |args: &[&str]| {
            let mut argv = vec!["broadcaster"];
            argv.extend_from_slice(args);
            Cli::try_parse_from(argv).unwrap().command
        };

        assert!(!parse(&["status"]).runs_workers());
        assert!(!parse(&["failed", "--formatted"]).runs_workers());
        assert!(!parse(&["pause"]).runs_workers());
        assert!(!parse(&["reset"]).runs_workers());
        assert!(!parse(&["terminate"]).runs_workers());
        assert!(!parse(&["send-text", "--text", "hi", "42"]).runs_workers());
        assert!(parse(&["send-text", "--text", "hi", "--wait", "42"]).runs_workers());
        assert!(parse(&["work"]).runs_workers());
    }
}
