/// ChatSync CLI - terminal client for the chat engine
use chatsync_core::chat_types::ChatMessage;
use chatsync_core::{
    ChatEngine, Config, ConnectionState, FileTokenStore, HttpChatApi, StompTransport,
};
use colored::*;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let token_path = config
        .token_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(".chatsync/token"));
    let tokens = Arc::new(FileTokenStore::new(token_path));
    let transport = Arc::new(StompTransport::from_config(&config));
    let api = Arc::new(
        HttpChatApi::new(config.api_base_url.clone(), tokens.clone())
            .map_err(|e| anyhow::anyhow!("REST client error: {}", e))?,
    );
    let engine = ChatEngine::new(config, transport, api, tokens);

    engine.on_state_change(|state| print_state(*state));
    engine.on_notification(print_notification);

    info!("Starting ChatSync");
    let state = engine.init().await;
    if state == ConnectionState::Disconnected {
        println!(
            "{} No usable token; socket stays closed (REST only)",
            "⚠".yellow().bold()
        );
    }
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !run_command(&engine, line.trim()).await {
                    break;
                }
            }
        }
    }

    engine.teardown().await;
    info!("ChatSync stopped");
    Ok(())
}

/// Returns false when the user asked to quit
async fn run_command(engine: &ChatEngine, line: &str) -> bool {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or("");
    let result = match (command, parts.next(), parts.next()) {
        ("", _, _) => Ok(()),
        ("quit" | "exit", _, _) => return false,
        ("help", _, _) => {
            print_help();
            Ok(())
        }
        ("list", _, _) => engine.load_conversations(0).await.map(|_| print_conversations(engine)),
        ("open", Some(conversation), _) => engine
            .open_conversation(conversation)
            .await
            .map(|_| print_history(engine, conversation)),
        ("read", Some(conversation), _) => engine.mark_as_read(conversation, None).await,
        ("send", Some(conversation), Some(text)) => engine
            .send_text(conversation, text, None)
            .await
            .map(|message| {
                println!(
                    "{} {} ({:?})",
                    "✓".green().bold(),
                    message.id.cyan(),
                    message.status
                )
            }),
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), line.red());
            Ok(())
        }
    };
    if let Err(e) = result {
        eprintln!("{} Error: {}", "✗".red().bold(), e.to_string().red());
    }
    true
}

fn print_help() {
    println!("{}", "Commands:".bright_white().bold());
    println!("  {}                       Refresh and list conversations", "list".cyan());
    println!("  {} <conversation>        Open a conversation", "open".cyan());
    println!("  {} <conversation> <text> Send a text message", "send".cyan());
    println!("  {} <conversation>        Mark a conversation read", "read".cyan());
    println!("  {}                       Exit", "quit".cyan());
}

fn print_state(state: ConnectionState) {
    let label = state.to_string();
    let label = match state {
        ConnectionState::Connected => label.green(),
        ConnectionState::Connecting | ConnectionState::Reconnecting => label.yellow(),
        ConnectionState::Disconnected => label.dimmed(),
        ConnectionState::Error => label.red(),
    };
    println!("{} {}", "●".bold(), label);
}

fn print_notification(message: &ChatMessage) {
    println!(
        "{} [{}] {}: {}",
        "✉".bright_cyan().bold(),
        message.conversation_id.dimmed(),
        message.sender_id.cyan(),
        message.preview().text
    );
}

fn print_conversations(engine: &ChatEngine) {
    let me = engine.current_user().unwrap_or_default();
    for conversation in engine.store().list_conversations() {
        let peer = conversation
            .peer_of(&me)
            .map(|p| p.label().to_string())
            .unwrap_or_else(|| "-".to_string());
        let unread = conversation.unread_for(&me);
        let preview = conversation
            .last_message
            .as_ref()
            .map(|m| m.text.clone())
            .unwrap_or_default();
        let badge = if unread > 0 {
            format!("({})", unread).yellow().bold()
        } else {
            "".normal()
        };
        println!("  {} {} {} {}", conversation.id.cyan(), peer.bold(), badge, preview.dimmed());
    }
}

fn print_history(engine: &ChatEngine, conversation_id: &str) {
    for message in engine.store().messages(conversation_id) {
        println!(
            "  {} {}: {} {}",
            message.sent_at.format("%H:%M").to_string().dimmed(),
            message.sender_id.cyan(),
            message.preview().text,
            format!("{:?}", message.status).dimmed()
        );
    }
}
