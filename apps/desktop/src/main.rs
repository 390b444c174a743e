use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use client_core::{
    reconcile::{group_by_date, ThreadItem},
    ClientEvent, SyncClient,
};
use shared::{domain::CorrespondentId, protocol::ConversationSummary};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Terminal front-end for the conversation sync engine.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: String,
    /// Conversation to open on startup. Defaults to the most recent one.
    #[arg(long)]
    conversation: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let client = SyncClient::new(&args.server_url).context("bad --server-url")?;
    let conversations = client
        .refresh_conversations()
        .await
        .context("fetching conversation list")?;
    print_conversations(&conversations);

    let initial = args
        .conversation
        .as_deref()
        .map(CorrespondentId::from)
        .or_else(|| conversations.first().map(|c| c.wa_id.clone()));
    if let Some(correspondent_id) = initial {
        open_conversation(&client, correspondent_id).await?;
    } else {
        println!("No conversations yet.");
    }

    let mut events = client.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            render_event(event);
        }
    });

    println!("Type a message to send, /open <id> to switch, /quit to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        match line.trim() {
            "/quit" => break,
            command if command.starts_with("/open ") => {
                let correspondent_id = command["/open ".len()..].trim().into();
                open_conversation(&client, correspondent_id).await?;
            }
            text => {
                if let Err(err) = client.send_message(text).await {
                    warn!("send failed: {err}");
                    println!("! send failed: {err}");
                }
            }
        }
    }

    client.close().await;
    Ok(())
}

async fn open_conversation(
    client: &std::sync::Arc<SyncClient>,
    correspondent_id: CorrespondentId,
) -> Result<()> {
    client
        .select_conversation(correspondent_id.clone())
        .await
        .with_context(|| format!("opening conversation {correspondent_id}"))?;
    if let Some(contact) = client.contact().await {
        println!("== {} ({}) ==", contact.display_name, contact.number);
    }
    Ok(())
}

fn print_conversations(conversations: &[ConversationSummary]) {
    println!("Conversations:");
    for conversation in conversations {
        println!(
            "  {:<16} {}  {}",
            conversation.wa_id,
            conversation
                .timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M"),
            conversation.last_message
        );
    }
}

fn render_event(event: ClientEvent) {
    match event {
        ClientEvent::ConversationsUpdated(conversations) => print_conversations(&conversations),
        ClientEvent::ThreadUpdated { messages, .. } => {
            for item in group_by_date(&messages) {
                match item {
                    ThreadItem::DateSeparator(day) => println!("---- {day} ----"),
                    ThreadItem::Message(message) => println!(
                        "  [{}] {} ({:?})",
                        message.timestamp.with_timezone(&Local).format("%H:%M"),
                        message.text,
                        message.status
                    ),
                }
            }
        }
        ClientEvent::ChannelConnected { correspondent_id } => {
            println!("* live updates connected for {correspondent_id}");
        }
        ClientEvent::ChannelClosed {
            correspondent_id,
            exhausted,
        } => {
            if exhausted {
                println!("* live updates lost for {correspondent_id}; reopen to retry");
            } else {
                println!("* live updates closed for {correspondent_id}");
            }
        }
        ClientEvent::Error(info) => println!("! {info}"),
    }
}
