//! Chat CLI - command-line front end for the real-time chat session engine.
//!
//! Connects to the broker as a configured user, prints inbound traffic and
//! sends one-off messages. Useful for scripting, debugging a broker and
//! exercising the session engine without a UI.

mod commands;

use std::path::Path;

use clap::{Parser, Subcommand};
use tracing::info;

use chat_core::config::AppConfig;
use chat_core::error::ChatResult;
use chat_core::logging;

/// Chat client - real-time messaging from the terminal.
#[derive(Parser)]
#[command(
    name = "chat-client",
    version,
    about = "Real-time chat client CLI",
    long_about = "A command-line client for a STOMP-over-WebSocket chat broker.\n\
                  Listen for messages, typing and presence events, or send messages from scripts."
)]
struct Cli {
    /// Config file to use instead of the default location.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// How results are printed.
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Printing mode for command output.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Styled lines for a terminal.
    Text,
    /// One JSON object per line.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print inbound events until Ctrl+C.
    Listen {
        #[command(flatten)]
        session: commands::SessionArgs,
    },
    /// Send one message, then disconnect.
    Send {
        #[command(flatten)]
        session: commands::SessionArgs,
        #[command(flatten)]
        message: commands::send::MessageArgs,
    },
    /// View and edit the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> ChatResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config.as_deref() {
        Some(path) => Path::new(path).to_path_buf(),
        None => AppConfig::default_config_path()?,
    };
    let config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    // Initialize logging
    let mut log_config = config.logging.clone();
    if cli.verbose {
        log_config.level = "debug".to_string();
    }
    let log_dir = config.effective_log_dir()?;
    let _guard = logging::init_logging(&log_config, &log_dir)?;

    info!("chat client v{}", chat_core::constants::APP_VERSION);

    match cli.command {
        Commands::Listen { session } => commands::listen::run(&config, session, cli.format).await,
        Commands::Send { session, message } => {
            commands::send::run(&config, session, message, cli.format).await
        }
        Commands::Config { action } => {
            commands::config::run(config, &config_path, action, cli.format)
        }
    }
}
