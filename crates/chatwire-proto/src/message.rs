//! Chat domain model.
//!
//! These types are shared by the agent dashboard and the visitor widget. A
//! [`ChatMessage`] is created locally on send (optimistic, `is_loading`) or
//! on receipt from the peer, then mutated in place as acknowledgements
//! arrive. Messages are only ever appended to a per-room log, never deleted.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unix timestamp in milliseconds (UTC).
pub type Timestamp = u64;

/// Identifier of a conversation room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Create a room id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Room id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated message identifier, globally unique per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a message id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a message sender (agent id or visitor id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Create a participant id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a conversation session, the scope of one symmetric key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a session id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Session id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SenderType {
    /// The visitor in the widget.
    Visitor,
    /// A human agent in the dashboard.
    Agent,
    /// Automated message attributed to the agent side.
    AgentSystem,
    /// Automated message attributed to the visitor side.
    VisitorSystem,
    /// An AI agent answering on behalf of the agent side.
    AiAgent,
}

/// Kind of message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain chat text.
    Text,
    /// A file transfer; [`Attachment`] carries the metadata.
    File,
    /// System notice rendered inline in the conversation.
    System,
}

/// Metadata for a file attached to a message. The file body itself travels
/// out-of-band; only the descriptor rides the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Original file name.
    pub file_name: String,
    /// MIME type reported by the uploader.
    pub mime_type: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Download location.
    pub url: String,
}

/// One message in a room's append-only log.
///
/// # Invariants
///
/// - `delivered_at` is set only after the transport confirms delivery,
///   `read_at` only after an explicit read receipt; both are set once and
///   never cleared.
/// - `is_loading` is true from optimistic local creation until the server's
///   `message-ack` arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Client-generated unique id.
    pub message_id: MessageId,
    /// Room this message belongs to.
    pub room_id: RoomId,
    /// Sender's stable id.
    pub sender_id: ParticipantId,
    /// Sender classification.
    pub sender_type: SenderType,
    /// Plaintext content (decoded/decrypted form; the durable representation).
    pub content: String,
    /// Content kind.
    pub message_type: MessageType,
    /// Local creation time.
    pub created_at: Timestamp,
    /// Server acceptance time, from `message-ack`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<Timestamp>,
    /// Peer delivery time, from a delivery acknowledgement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<Timestamp>,
    /// Read time, from a read receipt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<Timestamp>,
    /// Optional attachment descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// True while the message awaits its server ack.
    #[serde(default)]
    pub is_loading: bool,
}

impl ChatMessage {
    /// Build the optimistic local copy of an outgoing message.
    pub fn outgoing(
        message_id: MessageId,
        room_id: RoomId,
        sender_id: ParticipantId,
        sender_type: SenderType,
        content: impl Into<String>,
        attachment: Option<Attachment>,
        created_at: Timestamp,
    ) -> Self {
        let message_type = if attachment.is_some() { MessageType::File } else { MessageType::Text };

        Self {
            message_id,
            room_id,
            sender_id,
            sender_type,
            content: content.into(),
            message_type,
            created_at,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            attachment,
            is_loading: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sender_type_wire_names() {
        let json = serde_json::to_string(&SenderType::AiAgent).unwrap();
        assert_eq!(json, "\"ai-agent\"");

        let json = serde_json::to_string(&SenderType::VisitorSystem).unwrap();
        assert_eq!(json, "\"visitor-system\"");

        let back: SenderType = serde_json::from_str("\"agent\"").unwrap();
        assert_eq!(back, SenderType::Agent);
    }

    #[test]
    fn outgoing_message_starts_loading_without_acks() {
        let msg = ChatMessage::outgoing(
            MessageId::new("m1"),
            RoomId::new("r1"),
            ParticipantId::new("agent-7"),
            SenderType::Agent,
            "hello",
            None,
            1_000,
        );

        assert!(msg.is_loading);
        assert_eq!(msg.message_type, MessageType::Text);
        assert_eq!(msg.sent_at, None);
        assert_eq!(msg.delivered_at, None);
        assert_eq!(msg.read_at, None);
    }

    #[test]
    fn attachment_implies_file_type() {
        let attachment = Attachment {
            file_name: "report.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 1024,
            url: "https://files.example/report.pdf".to_string(),
        };

        let msg = ChatMessage::outgoing(
            MessageId::new("m2"),
            RoomId::new("r1"),
            ParticipantId::new("v-3"),
            SenderType::Visitor,
            "",
            Some(attachment),
            2_000,
        );

        assert_eq!(msg.message_type, MessageType::File);
    }

    #[test]
    fn chat_message_camel_case_fields() {
        let msg = ChatMessage::outgoing(
            MessageId::new("m3"),
            RoomId::new("r9"),
            ParticipantId::new("agent-1"),
            SenderType::Agent,
            "hi",
            None,
            3_000,
        );

        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("messageId").is_some());
        assert!(value.get("roomId").is_some());
        assert!(value.get("createdAt").is_some());
        // Unset acks are omitted entirely, not serialized as null
        assert!(value.get("sentAt").is_none());
    }
}
