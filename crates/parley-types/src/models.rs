use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user as this core sees one: an opaque identifier owned by the external
/// identity system, plus the display name read back for conversation listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

/// A two-party conversation. Participants are stored in canonical order
/// (`user_a < user_b` byte-wise) so a pair maps to exactly one row no matter
/// which side messaged first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub user_a: String,
    pub user_b: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted direct message. `is_read` transitions false -> true exactly
/// once, never back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// One row of a user's conversation listing: the peer, their display name,
/// and how many of their messages are still unread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub id: String,
    pub name: String,
    pub unread_count: i64,
}
