//! CLI command implementations.

pub mod config;
pub mod listen;
pub mod send;

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use dialoguer::Password;
use tokio::time::timeout;

use chat_core::config::{AppConfig, ConnectionConfig};
use chat_core::error::{ChatError, ChatResult};
use chat_socket::{DisconnectReason, SessionManager, SessionState, StompTransport};

/// Connection options shared by commands that open a session.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Bearer token. Prompted for when neither this nor CHAT_TOKEN is set.
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Broker endpoint (overrides config).
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// User id (overrides config).
    #[arg(short, long)]
    pub user: Option<String>,

    /// Display name (overrides config).
    #[arg(long)]
    pub name: Option<String>,
}

/// Build the connection value: flags > config > interactive prompt for the token.
pub fn resolve_connection(config: &AppConfig, args: &SessionArgs) -> ChatResult<ConnectionConfig> {
    let mut config = config.clone();
    if let Some(endpoint) = &args.endpoint {
        config.server.endpoint = endpoint.clone();
    }
    if let Some(user) = &args.user {
        config.session.user_id = user.clone();
    }
    if let Some(name) = &args.name {
        config.session.display_name = name.clone();
    }

    let token = match &args.token {
        Some(token) if !token.is_empty() => token.clone(),
        _ => Password::new()
            .with_prompt("Access token")
            .interact()
            .map_err(|e| ChatError::Internal(e.to_string()))?,
    };

    config.connection_config(token)
}

/// Create a session manager over the STOMP transport.
pub fn create_manager(config: &AppConfig) -> SessionManager {
    SessionManager::from_app_config(Arc::new(StompTransport::new()), config)
}

/// Wait until the session is connected, gives up, or `limit` passes.
pub async fn wait_for_connection(manager: &SessionManager, limit: Duration) -> ChatResult<()> {
    let mut rx = manager.status_receiver();
    let waited = timeout(
        limit,
        rx.wait_for(|s| s.state == SessionState::Connected || s.is_terminal()),
    )
    .await
    .map_err(|_| ChatError::Timeout(format!("not connected after {}s", limit.as_secs())))?;

    let status = waited
        .map_err(|_| ChatError::Internal("session status channel closed".into()))?
        .clone();
    match (status.state, status.reason) {
        (SessionState::Connected, _) => Ok(()),
        (_, Some(DisconnectReason::AuthRejected)) => {
            Err(ChatError::AuthRejected("broker refused the access token".into()))
        }
        _ => Err(ChatError::Transport(format!("could not connect: {status}"))),
    }
}
