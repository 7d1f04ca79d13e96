use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chatdigest")]
#[command(about = "Incremental group chat digests", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler (and the status API when enabled)
    Run,
    /// Collect one batch for a group now
    Collect { platform: String, group: String },
    /// Generate and dispatch a report for a group now
    Report { platform: String, group: String },
    /// Print the current window summary for a group
    Status { group: String },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatdigest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = chatdigest::config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            chatdigest::cli::run::run(config_path).await?;
        }
        Some(Commands::Collect { platform, group }) => {
            chatdigest::cli::manual::collect(config_path, &platform, &group).await?;
        }
        Some(Commands::Report { platform, group }) => {
            chatdigest::cli::manual::report(config_path, &platform, &group).await?;
        }
        Some(Commands::Status { group }) => {
            chatdigest::cli::manual::status(config_path, &group).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                chatdigest::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                chatdigest::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
