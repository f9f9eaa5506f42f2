//! `CivicChat`: headless chat client.
//!
//! Reads commands from stdin and prints conversation activity to stdout.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/civicchat/config.toml`).
//!
//! ```bash
//! # Citizen talking to an administrator
//! cargo run --bin civicchat -- --server-url ws://127.0.0.1:9000/ws \
//!     --user-id citizen-1 --token secret --peer admin-1
//!
//! # Administrator side
//! CIVICCHAT_SERVER_URL=ws://127.0.0.1:9000/ws CIVICCHAT_USER_ID=admin-1 \
//!     cargo run --bin civicchat -- --role admin --token secret
//! ```

use std::io;
use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use civicchat::app::{self, App, Command};
use civicchat::chat::history::HttpHistory;
use civicchat::chat::{ChatClient, ChatEvent, ClientSettings};
use civicchat::config::{CliArgs, ClientConfig, Role};
use civicchat::transport::connection::Connection;
use civicchat::transport::ws::WsConnector;
use civicchat::transport::Credentials;
use civicchat_proto::message::{ConversationKey, UserId};

type Client = ChatClient<WsConnector, HttpHistory>;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("civicchat starting");

    let (Some(server_url), Some(user_id), Some(token)) = (
        config.server_url.clone(),
        config.user_id.clone(),
        config.token.clone(),
    ) else {
        eprintln!("--server-url, --user-id and --token are required (see --help)");
        return Ok(());
    };
    let history_base = config.history_base().unwrap_or_default();

    let connector = WsConnector::new(&server_url).map_err(io::Error::other)?;
    let history = HttpHistory::new(&history_base, token.clone()).map_err(io::Error::other)?;
    let connection = Connection::new(
        connector,
        Credentials {
            user_id: UserId::new(user_id),
            token,
        },
        config.connection.clone(),
    );
    let (client, events) = ChatClient::new(connection, history, ClientSettings::from(&config));

    let result = run(&client, events, &config).await;

    client.stop();
    tracing::info!("civicchat exiting");
    result
}

/// Initialize file-based logging.
///
/// Logs go to a file so they do not interleave with conversation output.
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("civicchat.log");
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

/// Main loop: stdin commands, chat events and connection changes.
async fn run(
    client: &Client,
    mut events: tokio::sync::mpsc::Receiver<ChatEvent>,
    config: &ClientConfig,
) -> io::Result<()> {
    let app = App::new(client.me().clone(), config.preferences.clone());
    let mut connection = client.watch_connection();

    if let Err(e) = client.start().await {
        println!("could not connect ({e}); use /reconnect to try again");
    }
    if config.role == Role::Admin {
        match client.load_conversations().await {
            Ok(list) => App::render_conversations(&list)
                .iter()
                .for_each(|l| println!("{l}")),
            Err(e) => println!("could not load conversations: {e}"),
        }
    }
    if let Some(key) = config.conversation_key() {
        open(client, &app, key).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                match app::parse_command(&line) {
                    Ok(Some(Command::Quit)) => return Ok(()),
                    Ok(Some(command)) => handle(client, &app, config, command).await,
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
            Some(event) = events.recv() => {
                if let Some(line) = app.render_event(&event) {
                    println!("{line}");
                }
                // Printed inbound messages are fully on screen.
                if let ChatEvent::MessageAdded(message) = &event {
                    client.observe(&message.id, 1.0);
                }
            }
            Ok(()) = connection.changed() => {
                let state = *connection.borrow_and_update();
                println!("{}", App::render_connection(state));
            }
        }
    }
}

async fn open(client: &Client, app: &App, key: ConversationKey) {
    match client.open_conversation(key).await {
        Ok(_) => {
            for entry in client.messages() {
                println!("{}", app.render_message(&entry));
                client.observe(&entry.message.id, 1.0);
            }
        }
        Err(e) => println!("could not load history: {e}"),
    }
}

async fn handle(client: &Client, app: &App, config: &ClientConfig, command: Command) {
    match command {
        Command::Send { content, kind } => {
            client.keystroke();
            let client = client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.send(content, kind).await {
                    tracing::debug!(error = %e, "send did not complete");
                    println!("not sent: {e}");
                }
            });
        }
        Command::Retry(n) => {
            let Some(record) = client.unsent().into_iter().nth(n - 1) else {
                println!("no unsent message #{n}");
                return;
            };
            let client = client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.retry(&record.local_id).await {
                    println!("retry failed: {e}");
                }
            });
        }
        Command::RetryAll => {
            let client = client.clone();
            tokio::spawn(async move {
                let results = client.retry_all().await;
                let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                println!("retried {}, {failed} still failing", results.len());
            });
        }
        Command::Remove(n) => {
            let removed = client
                .unsent()
                .into_iter()
                .nth(n - 1)
                .is_some_and(|record| client.remove_unsent(&record.local_id));
            if !removed {
                println!("no unsent message #{n}");
            }
        }
        Command::Clear => println!("discarded {} unsent message(s)", client.clear_unsent()),
        Command::Unsent => App::render_unsent(&client.unsent())
            .iter()
            .for_each(|l| println!("{l}")),
        Command::Hide => client.hide(),
        Command::Show => {
            if let Err(e) = client.show().await {
                println!("could not refresh: {e}");
            }
        }
        Command::Open(peer) => {
            let me = client.me().clone();
            let peer = UserId::new(peer);
            let key = match config.role {
                Role::User => ConversationKey::new(me, peer),
                Role::Admin => ConversationKey::new(peer, me),
            };
            open(client, app, key).await;
        }
        Command::Conversations => {
            let list = match client.load_conversations().await {
                Ok(list) => list,
                Err(e) => {
                    tracing::debug!(error = %e, "conversation list unavailable");
                    client.conversations()
                }
            };
            App::render_conversations(&list)
                .iter()
                .for_each(|l| println!("{l}"));
        }
        Command::Reconnect => {
            if let Err(e) = client.reconnect().await {
                println!("could not connect: {e}");
            }
        }
        Command::Help => println!("{}", app::HELP),
        Command::Quit => {}
    }
}
