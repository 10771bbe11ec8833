//! Slack Archiver CLI - main entry point

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use slack_archiver::commands::{self, DumpArgs, ThreadArgs};
use slack_archiver::{metrics, Config};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "slack_archiver")]
#[command(about = "Rate-limited Slack channel and thread archiver", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Path to config.yml (defaults to ./config.yml, then ../config.yml)
    #[arg(long, short = 'c', env = "SLACK_ARCHIVER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump channels with all their threads to JSON
    Dump {
        /// Channel IDs, config aliases or archive links
        #[arg(required = true)]
        channels: Vec<String>,

        /// Only messages after this date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        oldest: Option<String>,

        /// Only messages before this date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        latest: Option<String>,

        /// Output directory (defaults to output_dir from config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Thread fetches in flight per channel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Do not look up message authors
        #[arg(long, default_value_t = false)]
        no_users: bool,
    },

    /// Dump a single thread to JSON
    Thread {
        /// CHANNEL:TS, alias:TS or a message link
        reference: String,

        /// Thread timestamp when the reference names only a channel
        thread_ts: Option<String>,

        /// Output directory (defaults to output_dir from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Dump { .. } => "dump",
            Commands::Thread { .. } => "thread",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("slack_archiver=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = Config::load(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let command_name = cli.command.name();
    metrics::record_command_start(command_name);
    let start = Instant::now();

    let result = execute_command(&config, cli.command, cancel).await;

    metrics::record_command_result(command_name, start.elapsed(), result.is_ok());

    result
}

async fn execute_command(
    config: &Config,
    command: Commands,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Commands::Dump {
            channels,
            oldest,
            latest,
            output,
            concurrency,
            no_users,
        } => {
            let args = DumpArgs {
                channels,
                oldest,
                latest,
                output,
                concurrency,
                skip_users: no_users,
            };
            let summary = commands::dump::run(config, args, cancel).await?;
            info!(
                files = summary.files.len(),
                messages = summary.messages,
                users = summary.users,
                unresolved = summary.unresolved_users.len(),
                "dump finished"
            );
            for file in &summary.files {
                println!("{}", file.display());
            }
        }
        Commands::Thread {
            reference,
            thread_ts,
            output,
        } => {
            let args = ThreadArgs {
                reference,
                thread_ts,
                output,
            };
            let path = commands::thread::run(config, args, cancel).await?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
