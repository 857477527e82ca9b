//! Forgepilot CLI: the main entry point.
//!
//! Commands:
//! - `serve`   Start the HTTP gateway
//! - `chat`    Interactive chat or single-message mode
//! - `tools`   Print the tool catalogue the model sees
//! - `config`  Show, locate or initialize the configuration
//! - `doctor`  Diagnose the setup

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "forgepilot",
    about = "Forgepilot: tool-calling orchestration for LLM assistants",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.forgepilot/config.toml
    #[arg(long, global = true, env = "FORGEPILOT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Keep conversations in memory only instead of
        /// ~/.forgepilot/conversations.json
        #[arg(long)]
        ephemeral: bool,
    },

    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,

        /// User the conversation belongs to
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Keep the conversation in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Print the tool catalogue
    Tools,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose configuration and workspace
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (API key redacted)
    Show,
    /// Print the config file location
    Path,
    /// Print the default configuration as TOML
    Default,
    /// Write the default configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port, ephemeral } => {
            commands::serve::run(config_path, port, ephemeral).await?
        }
        Commands::Chat {
            message,
            conversation,
            user,
            ephemeral,
        } => {
            let args = commands::chat::ChatArgs {
                message,
                conversation,
                user,
                ephemeral,
                verbose: cli.verbose,
            };
            commands::chat::run(config_path, args).await?
        }
        Commands::Tools => commands::tools::run(config_path)?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Default => commands::config_cmd::print_default(),
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force)?,
        },
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}
