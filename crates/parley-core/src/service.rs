use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{ConversationRow, MessageRow};
use parley_presence::{FocusTracker, PresenceRegistry};
use parley_types::events::ServerEvent;
use parley_types::models::{ChatMessage, ConversationEntry};

use crate::error::ChatError;
use crate::push::EventSink;

/// The real-time messaging core: resolves conversations, runs the send
/// pipeline, loads-and-marks history, and aggregates unread counts.
///
/// Every store access is an await point; the only serialization this type
/// relies on is what the stores themselves provide (the conversation
/// uniqueness constraint, the is_read-scoped bulk update, last-write-wins
/// presence entries).
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    presence: PresenceRegistry,
    focus: FocusTracker,
    sink: Arc<dyn EventSink>,
}

/// Result of a history load: the messages in creation order, plus the
/// conversation id when one exists (absent conversation means no history and
/// no unread state to clear).
#[derive(Debug)]
pub struct LoadedMessages {
    pub conversation_id: Option<Uuid>,
    pub messages: Vec<ChatMessage>,
}

impl ChatService {
    pub fn new(
        db: Arc<Database>,
        presence: PresenceRegistry,
        focus: FocusTracker,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            db,
            presence,
            focus,
            sink,
        }
    }

    /// Bind a user to their connection for targeted delivery.
    pub async fn register(&self, user_id: &str, connection_id: Uuid) -> Result<(), ChatError> {
        self.presence.register(user_id, connection_id).await?;
        info!(user_id, %connection_id, "user registered");
        Ok(())
    }

    /// Cleanup for a closed connection: unbind presence, then clear the
    /// user's focus. Best-effort — a failure here is logged, never
    /// escalated, since a future register overwrites whatever is left.
    pub async fn disconnect(&self, connection_id: Uuid) {
        match self.presence.remove_by_connection(connection_id).await {
            Ok(Some(user_id)) => {
                if let Err(e) = self.focus.clear_focus(&user_id).await {
                    warn!(%user_id, error = %e, "failed to clear focus on disconnect");
                }
                info!(%user_id, %connection_id, "user disconnected");
            }
            Ok(None) => {}
            Err(e) => warn!(%connection_id, error = %e, "presence cleanup failed on disconnect"),
        }
    }

    /// The send pipeline: validate, resolve the conversation, classify
    /// read-on-arrival by the receiver's focus, persist, then deliver.
    /// Pushes happen only after the write sticks; the returned message is
    /// the sender's acknowledgment payload.
    pub async fn send_message(
        &self,
        sender: &str,
        receiver: &str,
        text: &str,
    ) -> Result<ChatMessage, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::InvalidMessage("message text is empty"));
        }
        if sender == receiver {
            return Err(ChatError::InvalidMessage(
                "sender and receiver are the same user",
            ));
        }

        let conversation = self.resolve_conversation(sender, receiver).await?;
        let conversation_id: Uuid = conversation
            .id
            .parse()
            .context("corrupt conversation id")?;

        // Read-on-arrival: the receiver is looking at this sender's thread
        // right now, so the message is never unread.
        let focused_on = self.focus.get_focus(receiver).await?;
        let read_on_arrival = focused_on.as_deref() == Some(sender);

        let message = ChatMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            text: text.to_string(),
            is_read: read_on_arrival,
            created_at: Utc::now(),
        };

        {
            let m = message.clone();
            self.with_db(move |db| {
                db.insert_message(
                    &m.id.to_string(),
                    &m.conversation_id.to_string(),
                    &m.sender_id,
                    &m.receiver_id,
                    &m.text,
                    m.is_read,
                    &format_timestamp(m.created_at),
                )
            })
            .await?;
        }

        if let Some(connection_id) = self.presence.lookup(receiver).await? {
            self.sink
                .push(connection_id, ServerEvent::ReceiveMessage(message.clone()))
                .await;

            if !read_on_arrival {
                let cid = conversation.id.clone();
                let rid = receiver.to_string();
                let count = self
                    .with_db(move |db| db.unread_count(&cid, &rid))
                    .await?;

                self.sink
                    .push(
                        connection_id,
                        ServerEvent::UnreadCountUpdate {
                            conversation_id,
                            count,
                            from: sender.to_string(),
                        },
                    )
                    .await;
            }
        } else {
            debug!(receiver, "receiver offline, message stored for later");
        }

        Ok(message)
    }

    /// Load the full history with a peer and mark it read.
    ///
    /// The bulk mark runs before the focus write: a message landing in
    /// between is classified read-on-arrival by the send pipeline, and the
    /// is_read = 0 scope keeps the two from double-counting each other.
    pub async fn load_and_mark_read(
        &self,
        viewer: &str,
        peer: &str,
    ) -> Result<LoadedMessages, ChatError> {
        let (user_a, user_b) = canonical_pair(viewer, peer);
        let (a, b) = (user_a.to_string(), user_b.to_string());
        let conversation = self.with_db(move |db| db.find_conversation(&a, &b)).await?;

        // No conversation implies no history; nothing to mark or clear.
        let Some(conversation) = conversation else {
            return Ok(LoadedMessages {
                conversation_id: None,
                messages: Vec::new(),
            });
        };

        let conversation_id: Uuid = conversation
            .id
            .parse()
            .context("corrupt conversation id")?;

        let cid = conversation.id.clone();
        let vid = viewer.to_string();
        let marked = self
            .with_db(move |db| db.mark_conversation_read(&cid, &vid))
            .await?;
        if marked > 0 {
            debug!(viewer, %conversation_id, marked, "marked messages read");
        }

        // Focus is recorded only after the mark, so a message that raced in
        // ahead of it was either caught by the bulk update or will be
        // classified read-on-arrival from here on.
        self.focus.set_focus(viewer, peer).await?;

        let cid = conversation.id.clone();
        let rows = self
            .with_db(move |db| db.messages_in_conversation(&cid))
            .await?;

        let messages = rows
            .into_iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(LoadedMessages {
            conversation_id: Some(conversation_id),
            messages,
        })
    }

    /// Conversation listing for a user: each peer with their display name
    /// and the count of their messages still unread. One grouped query
    /// feeds every count; peers missing from the user store are omitted.
    pub async fn list_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationEntry>, ChatError> {
        let uid = user_id.to_string();
        let entries = self
            .with_db(move |db| {
                let conversations = db.conversations_for_user(&uid)?;
                let peer_ids: Vec<String> = conversations
                    .iter()
                    .map(|c| peer_of(c, &uid).to_string())
                    .collect();

                let users = db.get_users_by_ids(&peer_ids)?;
                let counts: HashMap<String, i64> =
                    db.unread_counts_by_sender(&uid)?.into_iter().collect();

                Ok(users
                    .into_iter()
                    .map(|u| {
                        let unread_count = counts.get(&u.id).copied().unwrap_or(0);
                        ConversationEntry {
                            id: u.id,
                            name: u.name,
                            unread_count,
                        }
                    })
                    .collect())
            })
            .await?;
        Ok(entries)
    }

    /// Find-or-create for the canonical pair. Creation is "insert unless
    /// present, then re-fetch" — under concurrent first contact the unique
    /// constraint lets exactly one insert through and both callers read the
    /// same row back.
    async fn resolve_conversation(&self, a: &str, b: &str) -> Result<ConversationRow> {
        let (user_a, user_b) = canonical_pair(a, b);
        let (user_a, user_b) = (user_a.to_string(), user_b.to_string());
        let id = Uuid::new_v4().to_string();
        let created_at = format_timestamp(Utc::now());

        self.with_db(move |db| {
            db.insert_conversation_if_absent(&id, &user_a, &user_b, &created_at)?;
            db.find_conversation(&user_a, &user_b)?
                .context("conversation missing after insert")
        })
        .await
    }

    /// Run a blocking database closure off the async runtime.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .context("database task failed")?
    }
}

/// Deterministic pair order: byte-wise, smaller identifier first. Fixed
/// forever — changing it would strand existing conversation rows.
fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

fn peer_of<'a>(conversation: &'a ConversationRow, user_id: &str) -> &'a str {
    if conversation.user_a == user_id {
        &conversation.user_b
    } else {
        &conversation.user_a
    }
}

/// RFC 3339 with microseconds: lexicographic order on the stored text equals
/// chronological order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn message_from_row(row: MessageRow) -> Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.id.parse().context("corrupt message id")?,
        conversation_id: row
            .conversation_id
            .parse()
            .context("corrupt conversation id")?,
        sender_id: row.sender_id,
        receiver_id: row.receiver_id,
        text: row.text,
        is_read: row.is_read,
        created_at: DateTime::parse_from_rfc3339(&row.created_at)
            .context("corrupt message timestamp")?
            .with_timezone(&Utc),
    })
}
