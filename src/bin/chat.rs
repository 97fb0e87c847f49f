//! Terminal chat client for one two-party conversation.
//!
//! Run with: `cargo run --bin halldyll-chat -- <me> <peer>`
//!
//! Every line typed is sent to the peer. Commands:
//! - `/reload` refreshes the conversation
//! - `/delete <id>` deletes one of your messages
//! - `/quit` exits

use std::process::ExitCode;

use halldyll_chat::chat::{
    ConversationSession, MessageId, MessageRecord, SendOutcome, SessionPhase, SessionSnapshot,
};
use halldyll_chat::config::ChatConfig;
use halldyll_chat::start_chat;
use halldyll_chat::store::HttpConversationStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// A parsed input line.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Reload,
    Delete(&'a str),
    Quit,
    Send(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        match trimmed.split_once(' ') {
            _ if trimmed == "/reload" => Self::Reload,
            _ if trimmed == "/quit" => Self::Quit,
            Some(("/delete", id)) => Self::Delete(id.trim()),
            _ => Self::Send(line),
        }
    }
}

fn main() -> ExitCode {
    start_chat::init_tracing();

    let mut args = std::env::args().skip(1);
    let (Some(me), Some(peer)) = (args.next(), args.next()) else {
        eprintln!("usage: halldyll-chat <me> <peer>");
        return ExitCode::from(2);
    };

    let config = match ChatConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    let session = match start_chat::connect(&config) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Failed to create store client: {e}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    rt.block_on(run(session, &me, &peer))
}

async fn run(session: ConversationSession<HttpConversationStore>, me: &str, peer: &str) -> ExitCode {
    let printer = tokio::spawn(render(session.subscribe()));

    session.bind(me, peer).await;
    if session.phase() == SessionPhase::Unbound {
        eprintln!("invalid participants: {me:?} and {peer:?}");
        printer.abort();
        return ExitCode::from(2);
    }
    println!("Chatting as {me} with {peer}. Type /quit to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read input: {e}");
                break;
            }
        };

        match Input::parse(&line) {
            Input::Reload => session.reload().await,
            Input::Quit => break,
            Input::Delete(id) => {
                if let Err(err) = session.delete(&MessageId::new(id)).await {
                    eprintln!("! {}", err.user_message());
                }
            }
            Input::Send(text) => {
                if let SendOutcome::Undelivered(err) = session.send(text).await {
                    eprintln!("! not delivered: {err}");
                }
            }
        }
    }

    session.wait_idle().await;
    printer.abort();
    ExitCode::SUCCESS
}

/// Print the conversation whenever the visible list changes.
async fn render(mut rx: watch::Receiver<SessionSnapshot>) {
    let mut shown: Option<Vec<MessageRecord>> = None;
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        if snapshot.phase == SessionPhase::Loading {
            continue;
        }
        if shown.as_ref() == Some(&snapshot.messages) {
            continue;
        }

        println!("----");
        if snapshot.is_empty_conversation() {
            println!("(no messages yet)");
        }
        for message in &snapshot.messages {
            let id = message
                .message_id
                .as_ref()
                .map_or_else(|| "pending".to_string(), ToString::to_string);
            println!("[{id}] {}: {}", message.sender_id, message.body);
        }
        shown = Some(snapshot.messages);
    }
}
