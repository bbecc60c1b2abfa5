//! The two wire sums.
//!
//! Every frame on the socket is `{"event": "<name>", "data": {...}}`.
//! [`ServerBound`] covers everything a client emits, [`ClientBound`]
//! everything the backend pushes. Modeling each direction as one tagged enum
//! means the router dispatches with a single exhaustive `match` - adding an
//! event forces every consumer to handle it at compile time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    envelope::EncryptedEnvelope,
    message::{
        Attachment, MessageId, MessageType, ParticipantId, RoomId, SenderType, Timestamp,
    },
};

/// Wire encode/decode failure.
#[derive(Debug, Error)]
pub enum WireError {
    /// Serializing an event to JSON failed.
    #[error("event encode failed: {reason}")]
    Encode {
        /// Underlying serde message.
        reason: String,
    },

    /// An inbound frame was not a known event.
    #[error("event decode failed: {reason}")]
    Decode {
        /// Underlying serde message.
        reason: String,
    },
}

/// Reference to a message in acknowledgement payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    /// The acknowledged message.
    pub message_id: MessageId,
    /// Its original sender.
    pub sender_id: ParticipantId,
}

/// Outbound chat message payload, shared by `agent-message` and
/// `visitor-message`.
///
/// When the session has encryption enabled, `encrypted_data` carries the real
/// ciphertext envelope and `message` is empty; when disabled, `message`
/// carries the plaintext and the envelope is a pass-through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Client-generated message id.
    pub message_id: MessageId,
    /// Plaintext content; empty when `is_encrypted`.
    pub message: String,
    /// Target room.
    pub room_id: RoomId,
    /// Whether `encrypted_data` carries real ciphertext.
    pub is_encrypted: bool,
    /// Content envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_data: Option<EncryptedEnvelope>,
    /// Optional attachment descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

/// Inbound chat message payload, shared by `new-message` and
/// `visitor-message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Sender-generated message id.
    pub message_id: MessageId,
    /// Plaintext content; may be empty when the envelope is encrypted.
    pub content: String,
    /// Source room.
    pub room_id: RoomId,
    /// Sender's stable id.
    pub sender_id: ParticipantId,
    /// Sender classification.
    pub sender_type: SenderType,
    /// Whether `encrypted_data` carries real ciphertext.
    #[serde(default)]
    pub is_encrypted: bool,
    /// Content envelope, when the sender attached one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_data: Option<EncryptedEnvelope>,
    /// Optional attachment descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Content kind; defaults to text when the backend omits it.
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    /// Sender-side creation time.
    #[serde(default)]
    pub created_at: Timestamp,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

/// Room descriptor pushed by the backend when a room's details change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetails {
    /// Room id.
    pub room_id: RoomId,
    /// Visitor owning the room.
    pub visitor_id: ParticipantId,
    /// Display name, when the visitor identified themselves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_name: Option<String>,
    /// When the conversation started.
    #[serde(default)]
    pub started_at: Timestamp,
}

/// Everything a client emits to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerBound {
    /// Typing-state change for a room.
    ClientTyping {
        /// New typing state.
        is_typing: bool,
        /// Room being typed in.
        room_id: RoomId,
    },

    /// Subscribe to a room's events.
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
    },

    /// Unsubscribe from a room.
    LeaveRoom {
        /// Room to leave.
        room_id: RoomId,
    },

    /// Chat message from the agent side.
    AgentMessage(OutboundMessage),

    /// Chat message from the visitor side.
    VisitorMessage(OutboundMessage),

    /// Delivery acknowledgement for inbound messages.
    MessageDelivered {
        /// Messages being acknowledged.
        messages: Vec<MessageRef>,
        /// Room they arrived in.
        room_id: RoomId,
    },

    /// Batched read receipt for a room.
    ReadReceipt {
        /// Room whose messages were read.
        room_id: RoomId,
        /// Messages being marked read.
        messages: Vec<MessageRef>,
    },
}

impl ServerBound {
    /// Encode to the wire JSON form.
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(|e| WireError::Encode { reason: e.to_string() })
    }

    /// Decode from the wire JSON form.
    pub fn decode(raw: &str) -> Result<Self, WireError> {
        serde_json::from_str(raw).map_err(|e| WireError::Decode { reason: e.to_string() })
    }

    /// Room this event belongs to. `None` for events with no room scope.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::ClientTyping { room_id, .. }
            | Self::JoinRoom { room_id }
            | Self::LeaveRoom { room_id }
            | Self::MessageDelivered { room_id, .. }
            | Self::ReadReceipt { room_id, .. } => Some(room_id),
            Self::AgentMessage(msg) | Self::VisitorMessage(msg) => Some(&msg.room_id),
        }
    }
}

/// Everything the backend pushes to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientBound {
    /// Handshake greeting after the socket opens; lists rooms this client
    /// was in before the reconnect.
    AgentConnected {
        /// Rooms to rejoin.
        past_room_ids: Vec<RoomId>,
    },

    /// New message from the counterpart (agent dashboard receives these).
    NewMessage(InboundMessage),

    /// New message from the visitor side (widget echo / dashboard push).
    VisitorMessage(InboundMessage),

    /// Server accepted an outbound message.
    MessageAck {
        /// The accepted message.
        message_id: MessageId,
        /// Its room.
        room_id: RoomId,
        /// Server acceptance time.
        sent_at: Timestamp,
    },

    /// Peer confirmed delivery of one message.
    DeliveredTo {
        /// The delivered message.
        message_id: MessageId,
        /// Its room.
        room_id: RoomId,
        /// Delivery time.
        delivered_at: Timestamp,
    },

    /// Alternate delivery confirmation emitted by older backends.
    MessageDelivered {
        /// The delivered message.
        message_id: MessageId,
        /// Its room.
        room_id: RoomId,
        /// Delivery time.
        delivered_at: Timestamp,
    },

    /// Counterpart read a batch of messages.
    MessagesRead {
        /// Room whose messages were read.
        room_id: RoomId,
        /// The read messages.
        message_ids: Vec<MessageId>,
        /// Read time.
        read_at: Timestamp,
    },

    /// Counterpart typing-state change.
    TypingIndicator {
        /// Room being typed in.
        room_id: RoomId,
        /// Which side is typing.
        client_type: SenderType,
        /// New typing state.
        is_typing: bool,
    },

    /// An agent joined a room.
    AgentJoinedRoom {
        /// Room joined.
        room_id: RoomId,
        /// Agent display name.
        agent_name: String,
        /// Agent id.
        sender_id: ParticipantId,
        /// Join time.
        joined_at: Timestamp,
    },

    /// An agent left a room.
    AgentLeftRoom {
        /// Room left.
        room_id: RoomId,
        /// Agent display name.
        agent_name: String,
        /// Agent id.
        sender_id: ParticipantId,
        /// Leave time.
        left_at: Timestamp,
    },

    /// Room details changed.
    RoomDetails(RoomDetails),

    /// The visitor navigated to another page.
    VisitorPageChanged {
        /// Visitor's room.
        room_id: RoomId,
        /// New page URL.
        page_url: String,
        /// New page title.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_title: Option<String>,
    },
}

impl ClientBound {
    /// Encode to the wire JSON form.
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(|e| WireError::Encode { reason: e.to_string() })
    }

    /// Decode from the wire JSON form.
    pub fn decode(raw: &str) -> Result<Self, WireError> {
        serde_json::from_str(raw).map_err(|e| WireError::Decode { reason: e.to_string() })
    }
}
