use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use uuid::Uuid;

use tandem_api::{HttpApi, IdentityProvider, StaticIdentity};
use tandem_sync::{ChatSession, SessionDeps, SyncConfig, SyncError};
use tandem_transport::{SharedChannel, WsTransport};
use tandem_types::models::{CurrentUser, Message};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Config
    let api_url = std::env::var("TANDEM_API_URL").unwrap_or_else(|_| "http://localhost:8080".into());
    let ws_url = std::env::var("TANDEM_WS_URL").unwrap_or_else(|_| "ws://localhost:8080/ws".into());
    let token = std::env::var("TANDEM_TOKEN").ok();
    let user_id: Uuid = std::env::var("TANDEM_USER_ID")
        .context("TANDEM_USER_ID is not set")?
        .parse()
        .context("TANDEM_USER_ID is not a valid id")?;
    let username = std::env::var("TANDEM_USERNAME").unwrap_or_else(|_| "me".into());
    let conversation_id: Uuid = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TANDEM_CONVERSATION_ID").ok())
        .context("usage: tandem <conversation-id> (or set TANDEM_CONVERSATION_ID)")?
        .parse()
        .context("conversation id is not a valid id")?;
    let config = SyncConfig::from_env();

    // Collaborators
    let mut api = HttpApi::new(api_url);
    if let Some(token) = token {
        api = api.with_token(token);
    }
    let api = Arc::new(api);
    let transport = Arc::new(WsTransport::with_heartbeat(ws_url, config.heartbeat_interval));
    let identity = StaticIdentity::new(CurrentUser {
        id: user_id,
        username,
    });
    let user = identity
        .current_user()
        .context("no signed-in user")?;

    let deps = SessionDeps {
        conversations: api.clone(),
        history: api,
        channel: SharedChannel::new(transport),
        config,
    };

    let session = match ChatSession::open(deps, conversation_id, user.clone()).await {
        Ok(session) => session,
        Err(SyncError::ConversationNotFound(id)) => {
            anyhow::bail!("conversation {} does not exist or you are not part of it", id)
        }
        Err(e) => return Err(e.into()),
    };
    info!("Chatting in {} as {}", conversation_id, user.username);

    let mut printer = Printer::new(&user, session.other_participant());
    let mut messages = session.messages();
    let mut status = session.status();
    printer.status(*status.borrow_and_update());
    printer.render(&messages.borrow_and_update());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = messages.changed() => {
                if changed.is_err() {
                    break;
                }
                printer.render(&messages.borrow_and_update());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                printer.status(*status.borrow_and_update());
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match session.send(&line).await {
                    Ok(_) => {}
                    Err(SyncError::EmptyMessage) => eprintln!("(empty message not sent)"),
                    Err(e) => eprintln!("(send failed: {})", e),
                }
            }
        }
    }

    session.close().await;
    Ok(())
}

/// Prints each message once, plus a note when one of ours gets read.
struct Printer {
    me: Uuid,
    my_name: String,
    peer_name: String,
    printed: HashMap<Uuid, bool>,
}

impl Printer {
    fn new(me: &CurrentUser, peer: Uuid) -> Self {
        let mut peer_name = peer.to_string();
        peer_name.truncate(8);
        Self {
            me: me.id,
            my_name: me.username.clone(),
            peer_name,
            printed: HashMap::new(),
        }
    }

    fn render(&mut self, messages: &[Message]) {
        for message in messages {
            match self.printed.get(&message.id).copied() {
                None => {
                    println!("{}", self.line(message));
                    self.printed.insert(message.id, message.read);
                }
                Some(false) if message.read && message.sender_id == self.me => {
                    println!("  (read: {})", message.content);
                    self.printed.insert(message.id, true);
                }
                _ => {}
            }
        }
    }

    fn line(&self, message: &Message) -> String {
        let time = message.created_at.with_timezone(&Local).format("%H:%M");
        if message.sender_id == self.me {
            let marker = if message.read { " ✓" } else { "" };
            format!("[{}] {}: {}{}", time, self.my_name, message.content, marker)
        } else {
            format!("[{}] {}: {}", time, self.peer_name, message.content)
        }
    }

    fn status(&self, status: tandem_sync::ConnectionStatus) {
        eprintln!("-- {} --", status);
    }
}
