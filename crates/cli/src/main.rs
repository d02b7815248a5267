mod settings;

use std::sync::Arc;

use plume_api::{BackendConfig, ChatBackend, HttpChatBackend};
use plume_session::{
    ChatSession, ConversationId, SenderType, SessionCommand, SessionHandle, SessionSnapshot,
};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::settings::SettingsStore;

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("failed to read from stdin: {source}"))]
    Stdin { source: std::io::Error },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(error) = run().await {
        eprintln!("plume: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    if !SettingsStore::default_config_path().exists() {
        // First run: write the defaults so they are easy to find and edit.
        if let Err(error) = settings_store.update(settings.as_ref().clone()) {
            tracing::warn!("failed to write default settings file: {error}");
        }
    }
    let config = BackendConfig::new(&settings.base_url, settings.user_id);
    tracing::info!(base_url = %config.base_url, user_id = config.user_id, "starting plume");

    let client = reqwest::Client::new();
    let backend = Arc::new(HttpChatBackend::new(client.clone(), config.clone()));

    // The push channel has no reconnection policy: if it drops, the session
    // reports disconnected until the process is restarted.
    let channel = plume_api::subscribe(&client, &config);
    tokio::spawn(channel.worker);

    let (session, handle) = ChatSession::new(
        backend.clone() as Arc<dyn ChatBackend>,
        config.user_id,
        channel.stream,
    );
    tokio::spawn(session.run());

    let printer = tokio::spawn(print_updates(handle.snapshots()));

    println!("plume - type a message to send, or /help for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await.context(StdinSnafu)? {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.strip_prefix('/') {
            Some(command) => {
                if !handle_slash_command(command, &backend, &settings.user_id, &handle, &settings)
                    .await
                {
                    break;
                }
            }
            None => {
                handle.send(SessionCommand::Submit {
                    content: line.to_string(),
                });
            }
        }
    }

    handle.send(SessionCommand::Shutdown);
    printer.abort();
    Ok(())
}

/// Handles one `/command` line; returns false when the loop should exit.
async fn handle_slash_command(
    command: &str,
    backend: &Arc<HttpChatBackend>,
    user_id: &i64,
    handle: &SessionHandle,
    settings: &settings::Settings,
) -> bool {
    let (name, argument) = match command.split_once(' ') {
        Some((name, argument)) => (name, argument.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "q" => return false,
        "help" => print_help(),
        "list" => match backend.list_conversations(*user_id).await {
            Ok(conversations) => {
                if conversations.is_empty() {
                    println!("(no conversations yet; /new to create one)");
                }
                for conversation in conversations {
                    let count = conversation.message_count.unwrap_or(0);
                    let preview = conversation.last_message.unwrap_or_default();
                    println!("  #{} {} ({count}) {preview}", conversation.id, conversation.title);
                }
            }
            Err(error) => eprintln!("list failed: {error}"),
        },
        "new" => {
            let title = if argument.is_empty() {
                settings.default_conversation_title.clone()
            } else {
                argument.to_string()
            };
            match backend.create_conversation(*user_id, title).await {
                Ok(conversation) => {
                    println!("created #{} {}", conversation.id, conversation.title);
                    handle.send(SessionCommand::Activate {
                        conversation_id: ConversationId::new(conversation.id),
                    });
                }
                Err(error) => eprintln!("create failed: {error}"),
            }
        }
        "open" => match argument.parse::<i64>() {
            Ok(raw) => {
                handle.send(SessionCommand::Activate {
                    conversation_id: ConversationId::new(raw),
                });
            }
            Err(_) => eprintln!("usage: /open <conversation-id>"),
        },
        "delete" => match argument.parse::<i64>() {
            Ok(raw) => match backend.delete_conversation(raw, *user_id).await {
                Ok(()) => println!("deleted #{raw}"),
                Err(error) => eprintln!("delete failed: {error}"),
            },
            Err(_) => eprintln!("usage: /delete <conversation-id>"),
        },
        "retry" => {
            let snapshot = handle.snapshots().borrow().clone();
            match snapshot.messages.iter().rev().find(|row| row.failed) {
                Some(row) => {
                    handle.send(SessionCommand::Retry {
                        message_id: row.id.clone(),
                    });
                }
                None => println!("nothing to retry"),
            }
        }
        _ => eprintln!("unknown command /{name}; /help lists commands"),
    }

    true
}

fn print_help() {
    println!("  /list               list conversations");
    println!("  /new [title]        create and open a conversation");
    println!("  /open <id>          open a conversation");
    println!("  /delete <id>        delete a conversation");
    println!("  /retry              recover the last failed message as a draft");
    println!("  /quit               exit");
    println!("  anything else       send it to the active conversation");
}

/// Prints snapshot transitions as they happen.
///
/// Rows settle in place at stable positions, so a printed-row cursor per
/// conversation is enough to emit each message exactly once.
async fn print_updates(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut previous = SessionSnapshot::default();
    let mut printed_rows = 0usize;

    while snapshots.changed().await.is_ok() {
        let current = snapshots.borrow().clone();

        if previous.connected != current.connected {
            if current.connected {
                println!("[channel connected]");
            } else {
                println!("[channel disconnected; restart to reconnect]");
            }
        }

        if previous.conversation_id != current.conversation_id {
            if let Some(conversation_id) = current.conversation_id {
                println!("[conversation #{conversation_id}]");
            }
            printed_rows = 0;
        }

        if !previous.ai_responding && current.ai_responding {
            println!("[assistant is responding]");
        }

        // Retry removes rows; never leave the cursor past the end.
        printed_rows = printed_rows.min(current.messages.len());

        while printed_rows < current.messages.len() {
            let row = &current.messages[printed_rows];
            if row.streaming || row.pending {
                // Still accumulating or unconfirmed; printed once it settles.
                break;
            }

            let speaker = match row.sender_type {
                SenderType::User => "you",
                SenderType::Assistant => "assistant",
            };
            let marker = if row.failed { " [failed - /retry]" } else { "" };
            println!("{speaker}> {}{marker}", row.content);
            printed_rows += 1;
        }

        if current.error.is_some() && previous.error != current.error {
            if let Some(error) = &current.error {
                println!("[error: {error}]");
            }
        }

        if current.draft.is_some() && previous.draft != current.draft {
            if let Some(draft) = &current.draft {
                println!("[draft restored: {draft}]");
            }
        }

        previous = current;
    }
}
