//! Listen command - stay connected and print inbound traffic.

use console::style;
use tracing::info;

use chat_core::config::AppConfig;
use chat_core::error::ChatResult;
use chat_socket::{ErrorEvent, Frame, SessionManager};

use super::SessionArgs;
use crate::OutputFormat;

/// Run the listen command.
pub async fn run(config: &AppConfig, args: SessionArgs, format: OutputFormat) -> ChatResult<()> {
    let connection = super::resolve_connection(config, &args)?;
    let manager = super::create_manager(config);
    register_printers(&manager, format);

    println!(
        "{} Connecting to {} as {}...",
        style("[1/2]").bold().dim(),
        connection.endpoint,
        connection.user_id
    );
    manager.connect(connection).await?;

    let mut status = manager.status_receiver();
    println!(
        "{} Listening for events... (Ctrl+C to stop)",
        style("[2/2]").bold().dim(),
    );
    println!();

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() || status.borrow().is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n  Disconnecting...");
                break;
            }
        }
    }

    manager.disconnect().await;
    info!("listen finished");
    Ok(())
}

fn register_printers(manager: &SessionManager, format: OutputFormat) {
    let callbacks = manager.callbacks();

    callbacks.on_message(move |frame| print_frame(format, "message", frame));
    callbacks.on_read_receipt(move |frame| print_frame(format, "read", frame));
    callbacks.on_typing(move |frame, typing| {
        let label = if typing { "typing" } else { "stop-typing" };
        print_frame(format, label, frame);
    });
    callbacks.on_user_online(move |user| print_presence(format, user, true));
    callbacks.on_user_offline(move |user| print_presence(format, user, false));
    callbacks.on_connection_status_change(move |status| match format {
        OutputFormat::Json => print_json("status", status),
        OutputFormat::Text => println!("  {} {status}", style("[status]").blue()),
    });
    callbacks.on_error(move |error| print_error(format, error));
}

fn print_frame(format: OutputFormat, label: &str, frame: &Frame) {
    match format {
        OutputFormat::Json => print_json(label, frame),
        OutputFormat::Text => {
            let from = if frame.sender_name.is_empty() {
                frame.sender_id.as_str()
            } else {
                frame.sender_name.as_str()
            };
            let scope = if frame.is_group() {
                format!(" in {}", frame.conversation_id)
            } else {
                String::new()
            };
            let body = match (&frame.content, &frame.media_url) {
                (Some(text), Some(url)) => format!(": {text} [{url}]"),
                (Some(text), None) => format!(": {text}"),
                (None, Some(url)) => format!(": [{url}]"),
                (None, None) => String::new(),
            };
            println!(
                "  {} {}{}{}",
                style(format!("[{label}]")).cyan(),
                style(from).bold(),
                scope,
                body
            );
        }
    }
}

fn print_presence(format: OutputFormat, user: &str, online: bool) {
    let label = if online { "online" } else { "offline" };
    match format {
        OutputFormat::Json => print_json(label, &serde_json::json!({ "userId": user })),
        OutputFormat::Text => {
            let tag = if online {
                style(format!("[{label}]")).green()
            } else {
                style(format!("[{label}]")).dim()
            };
            println!("  {tag} {user}");
        }
    }
}

fn print_error(format: OutputFormat, error: &ErrorEvent) {
    match format {
        OutputFormat::Json => print_json("error", error),
        OutputFormat::Text => println!("  {} {error}", style("[error]").red().bold()),
    }
}

fn print_json(event: &str, data: &impl serde::Serialize) {
    let line = serde_json::json!({ "event": event, "data": data });
    println!("{line}");
}
