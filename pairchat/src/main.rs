//! `PairChat` — line-oriented terminal client.
//!
//! Connects to a chat server with an existing session (user id and bearer
//! token) and drives a [`ChatSurface`] from stdin. Configuration via CLI
//! flags, environment variables, or config file
//! (`~/.config/pairchat/config.toml`).
//!
//! ```bash
//! cargo run --bin pairchat -- --user-id u-1 --token secret \
//!     --api-url http://127.0.0.1:8080/ --channel-url ws://127.0.0.1:8080/ws
//! ```
//!
//! Commands: `/list`, `/search <query>`, `/with <user-id>`,
//! `/open <n|chat-id>`, `/quit`. Any other line is sent to the open
//! conversation.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use pairchat::channel::Connector;
use pairchat::channel::ws::WsConnector;
use pairchat::chat::model::Message;
use pairchat::chat::{ChatSurface, Command, SurfaceEvent};
use pairchat::config::{CliArgs, ClientConfig};
use pairchat::service::ChatService;
use pairchat::service::http::HttpChatService;
use pairchat_proto::conversation::ChatId;
use pairchat_proto::user::UserId;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file so they never interleave with the conversation.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let Some(session) = config.session() else {
        eprintln!("A session is required: pass --user-id and --token (or PAIRCHAT_USER / PAIRCHAT_TOKEN)");
        return ExitCode::FAILURE;
    };

    tracing::info!(user = %session.user_id(), api = %config.api_url, "pairchat starting");

    let service = match HttpChatService::new(config.api_url.clone(), &session, config.request_timeout) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Could not create API client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let connector = WsConnector::new(config.channel_url.as_str(), config.reconnect);

    let (mut surface, events) =
        ChatSurface::new(session, connector, service, config.surface_config());
    if let Err(e) = surface.start().await {
        eprintln!("Could not connect: {e}");
        return ExitCode::FAILURE;
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
    let mut driver = tokio::spawn(surface.run_with(
        cmd_rx,
        events,
        render::<WsConnector, HttpChatService>,
    ));

    println!("Connected. Type /list to see your conversations, /quit to leave.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            read = lines.next_line() => match read {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(err = %e, "stdin read failed");
                    break;
                }
            },
            // The surface stopped on its own (session expired).
            result = &mut driver => {
                if let Err(e) = result {
                    tracing::error!(err = %e, "chat surface task failed");
                }
                return ExitCode::SUCCESS;
            }
        };
        let Some(command) = parse_line(&line) else {
            continue;
        };
        let quit = command == Command::Quit;
        if cmd_tx.send(command).await.is_err() || quit {
            break;
        }
    }
    drop(cmd_tx);

    if let Err(e) = driver.await {
        tracing::error!(err = %e, "chat surface task failed");
    }
    tracing::info!("pairchat exiting");
    ExitCode::SUCCESS
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("pairchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Maps one input line to a surface command. Blank lines and unknown
/// slash commands yield `None`.
fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Send(line.to_string()));
    };
    let (verb, arg) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(v, a)| (v, a.trim()));
    match (verb, arg) {
        ("quit" | "q", _) => Some(Command::Quit),
        ("list", _) => Some(Command::RefreshList),
        ("search", q) if !q.is_empty() => Some(Command::Search(q.to_string())),
        ("with", user) if !user.is_empty() => Some(Command::SelectUser(UserId::new(user))),
        ("open", target) if !target.is_empty() => Some(target.parse::<usize>().map_or_else(
            |_| Command::SelectConversation(ChatId::new(target)),
            |n| Command::SelectListed(n.saturating_sub(1)),
        )),
        _ => {
            eprintln!("Unknown command: {line}");
            None
        }
    }
}

fn render<C: Connector, S: ChatService + 'static>(surface: &ChatSurface<C, S>, event: SurfaceEvent) {
    match event {
        SurfaceEvent::ChatListUpdated => {
            println!("-- conversations --");
            for (i, summary) in surface.chat_list().summaries().iter().enumerate() {
                match &summary.last_message {
                    Some(preview) => println!("{:>3}. {}  {preview}", i + 1, summary.title()),
                    None => println!("{:>3}. {}", i + 1, summary.title()),
                }
            }
        }
        SurfaceEvent::SearchUpdated => {
            for user in surface.search_results() {
                println!("  {}  (/with {})", user.username, user.id);
            }
        }
        SurfaceEvent::ConversationOpened { chat_id } => {
            let title = surface
                .active_conversation()
                .and_then(|a| a.other.as_ref())
                .map_or_else(|| chat_id.to_string(), |o| o.username.clone());
            println!("== {title} ==");
        }
        SurfaceEvent::TimelineChanged { .. } => {
            let me = surface.session().map(|s| s.user_id().clone());
            if let (Some(last), Some(me)) = (surface.timeline().messages().last(), me) {
                println!("{}", format_message(last, &me));
            }
        }
        SurfaceEvent::ConnectionChanged { connected: true } => println!("* reconnected"),
        SurfaceEvent::ConnectionChanged { connected: false } => println!("* connection lost, retrying"),
        SurfaceEvent::Error(e) => println!("! {e}"),
        SurfaceEvent::SessionExpired => println!("* session expired, please log in again"),
        SurfaceEvent::SessionEnded => println!("* bye"),
    }
}

fn format_message(message: &Message, me: &UserId) -> String {
    let author = if message.is_from(me) {
        "you".to_string()
    } else {
        message
            .sender_name
            .clone()
            .unwrap_or_else(|| message.sender_id.to_string())
    };
    let ticks = message
        .receipt_state(me)
        .map_or(String::new(), |s| format!(" {}", s.ticks()));
    format!(
        "[{}] {author}: {}{ticks}",
        message.timestamp.format("%H:%M"),
        message.content
    )
}
