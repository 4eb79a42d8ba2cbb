//! Send command - deliver one message and disconnect.
//!
//! The message is submitted before connecting, so it travels through the
//! outbound queue and goes out with the flush that precedes `connected`.

use std::time::Duration;

use clap::Args;
use console::style;

use chat_core::config::AppConfig;
use chat_core::error::{ChatError, ChatResult};
use chat_socket::Address;

use super::SessionArgs;
use crate::OutputFormat;

/// What to send and to whom.
#[derive(Args, Debug, Clone)]
pub struct MessageArgs {
    /// Recipient user id for a direct message.
    #[arg(long, conflicts_with = "group", required_unless_present = "group")]
    pub to: Option<String>,

    /// Conversation id for a group message.
    #[arg(long)]
    pub group: Option<String>,

    /// Media URL to attach.
    #[arg(long)]
    pub media: Option<String>,

    /// Seconds to wait for the connection.
    #[arg(long, default_value = "15")]
    pub wait: u64,

    /// Message text.
    #[arg(default_value = "")]
    pub text: String,
}

impl MessageArgs {
    fn address(&self) -> ChatResult<Address> {
        match (&self.to, &self.group) {
            (Some(user), None) => Ok(Address::direct(user.clone())),
            (None, Some(conversation)) => Ok(Address::group(conversation.clone())),
            _ => Err(ChatError::Config("exactly one of --to or --group is required".into())),
        }
    }
}

/// Run the send command.
pub async fn run(
    config: &AppConfig,
    args: SessionArgs,
    message: MessageArgs,
    format: OutputFormat,
) -> ChatResult<()> {
    let address = message.address()?;
    let connection = super::resolve_connection(config, &args)?;
    let manager = super::create_manager(config);

    match &message.media {
        Some(url) => manager.send_media(&address, message.text.clone(), url.clone()).await?,
        None => manager.send_message(&address, message.text.clone()).await?,
    };

    manager.connect(connection).await?;
    let result = super::wait_for_connection(&manager, Duration::from_secs(message.wait)).await;
    let undelivered = manager.queued().await;
    manager.disconnect().await;
    result?;

    if undelivered > 0 {
        return Err(ChatError::Transport(format!(
            "{undelivered} message(s) were not delivered"
        )));
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "delivered": true, "to": address_label(&address) }))
        }
        OutputFormat::Text => println!(
            "  {} Sent to {}",
            style("OK").green().bold(),
            address_label(&address)
        ),
    }
    Ok(())
}

fn address_label(address: &Address) -> String {
    match address {
        Address::Direct(user) => user.clone(),
        Address::Group(conversation) => format!("group {conversation}"),
    }
}
