use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, ConversationEntry};

/// Commands sent FROM client TO server over the real-time channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Bind the calling user to this connection for targeted delivery
    Register { user_id: String },

    /// Send a direct message
    SendMessage {
        sender: String,
        receiver: String,
        text: String,
    },

    /// Load the full history with a peer and mark it read.
    /// `user_id1` is the viewer, `user_id2` the peer being viewed.
    LoadMessages { user_id1: String, user_id2: String },

    /// List conversation peers with unread counts
    GetConversations { user_id: String },
}

/// Events pushed FROM server TO one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// A message arrived for the receiving user
    ReceiveMessage(ChatMessage),

    /// The unread total for one conversation changed. `from` attributes the
    /// change to the peer so the client can update the right badge.
    UnreadCountUpdate {
        conversation_id: Uuid,
        count: i64,
        from: String,
    },

    /// Acknowledgment to the sender carrying the persisted message
    SendSuccessfully(ChatMessage),

    /// History result, ordered by creation time ascending
    MessagesLoaded(Vec<ChatMessage>),

    /// Conversation listing result
    ConversationsLoaded(Vec<ConversationEntry>),

    /// A request was rejected; sent only to the offending connection
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_wire_names() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"sendMessage","data":{"sender":"u1","receiver":"u2","text":"hi"}}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::SendMessage { sender, receiver, text } => {
                assert_eq!(sender, "u1");
                assert_eq!(receiver, "u2");
                assert_eq!(text, "hi");
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"loadMessages","data":{"userId1":"u2","userId2":"u1"}}"#,
        )
        .unwrap();
        assert!(matches!(cmd, ClientCommand::LoadMessages { .. }));
    }

    #[test]
    fn events_use_wire_names() {
        let event = ServerEvent::UnreadCountUpdate {
            conversation_id: Uuid::nil(),
            count: 3,
            from: "u1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "unreadCountUpdate");
        assert_eq!(json["data"]["count"], 3);
        assert_eq!(json["data"]["from"], "u1");
        assert!(json["data"]["conversationId"].is_string());
    }
}
