//! Config commands.

use std::path::Path;

use clap::Subcommand;
use console::style;
use dialoguer::Input;

use chat_core::config::AppConfig;
use chat_core::error::{ChatError, ChatResult};

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Print the configuration file path.
    Path,
    /// Write the broker endpoint and user to the configuration file.
    Init {
        /// Broker endpoint. Prompted for when missing.
        #[arg(short, long)]
        endpoint: Option<String>,
        /// User id. Prompted for when missing.
        #[arg(short, long)]
        user: Option<String>,
        /// Display name.
        #[arg(long)]
        name: Option<String>,
    },
}

/// Run a config subcommand.
pub fn run(
    mut config: AppConfig,
    path: &Path,
    action: ConfigAction,
    format: OutputFormat,
) -> ChatResult<()> {
    match action {
        ConfigAction::Show => match format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            OutputFormat::Text => {
                let text = toml::to_string_pretty(&config)
                    .map_err(|e| ChatError::Config(format!("failed to render config: {e}")))?;
                println!("{}", style(format!("# {}", path.display())).dim());
                println!("{text}");
            }
        },
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Init {
            endpoint,
            user,
            name,
        } => {
            let endpoint = match endpoint {
                Some(e) => e,
                None => prompt("Broker endpoint", &config.server.endpoint)?,
            };
            let user = match user {
                Some(u) => u,
                None => prompt("User id", &config.session.user_id)?,
            };

            config.server.endpoint = AppConfig::sanitize_endpoint(&endpoint);
            config.session.user_id = user.trim().to_string();
            if let Some(name) = name {
                config.session.display_name = name;
            }
            if !config.is_session_configured() {
                return Err(ChatError::MissingConfig("endpoint and user id".into()));
            }

            config.save_to_file(path)?;
            println!(
                "  {} Config saved to {}",
                style("OK").green(),
                path.display()
            );
        }
    }
    Ok(())
}

fn prompt(label: &str, current: &str) -> ChatResult<String> {
    let mut input = Input::<String>::new().with_prompt(label);
    if !current.is_empty() {
        input = input.default(current.to_string());
    }
    input
        .interact_text()
        .map_err(|e| ChatError::Internal(e.to_string()))
}
