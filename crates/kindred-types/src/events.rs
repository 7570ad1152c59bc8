use serde::{Deserialize, Serialize};

use crate::models::{ConversationId, MessageKind, NotificationKind, UserId};

/// Frames sent FROM server TO client over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A chat message was persisted in a conversation
    Message {
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        message_type: MessageKind,
        /// RFC 3339, second precision
        timestamp: String,
    },

    /// A participant started or stopped typing
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },

    /// Per-user notification (new match, new message)
    Notification {
        kind: NotificationKind,
        title: String,
        body: String,
        data: serde_json::Value,
    },
}

impl ServerFrame {
    pub fn typing(conversation_id: ConversationId, user_id: UserId, is_typing: bool) -> Self {
        Self::Typing {
            conversation_id,
            user_id,
            is_typing,
        }
    }

    /// Serialize to the JSON text sent on the socket.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Control frames sent FROM client TO server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Make this session the live receiver of a conversation's messages
    JoinConversation { conversation_id: ConversationId },

    Typing { conversation_id: ConversationId },

    StopTyping { conversation_id: ConversationId },

    /// Any other `type`; ignored by the server
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_frame_wire_format() {
        let frame = ServerFrame::typing(7, 12, true);
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"typing","conversation_id":7,"user_id":12,"is_typing":true}"#
        );
    }

    #[test]
    fn message_frame_wire_format() {
        let frame = ServerFrame::Message {
            conversation_id: 42,
            sender_id: 3,
            content: "selam".into(),
            message_type: MessageKind::Text,
            timestamp: "2024-05-01T10:00:00Z".into(),
        };
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"message","conversation_id":42,"sender_id":3,"content":"selam","message_type":"text","timestamp":"2024-05-01T10:00:00Z"}"#
        );
    }

    #[test]
    fn client_frames_decode() {
        let join: ClientFrame =
            serde_json::from_str(r#"{"type":"join_conversation","conversation_id":7}"#).unwrap();
        assert_eq!(join, ClientFrame::JoinConversation { conversation_id: 7 });

        let stop: ClientFrame =
            serde_json::from_str(r#"{"type":"stop_typing","conversation_id":9}"#).unwrap();
        assert_eq!(stop, ClientFrame::StopTyping { conversation_id: 9 });
    }

    #[test]
    fn unknown_client_frame_type_is_tolerated() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"wave"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Unknown);
    }

    #[test]
    fn ill_typed_client_frame_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"typing"}"#).is_err());
        let wrong_id = r#"{"type":"join_conversation","conversation_id":"x"}"#;
        assert!(serde_json::from_str::<ClientFrame>(wrong_id).is_err());
        assert!(serde_json::from_str::<ClientFrame>("42").is_err());
    }
}
