//! Router events and actions.
//!
//! The caller (UI layer plus connection driver) feeds [`RouterEvent`]s in and
//! executes the returned [`RouterAction`]s: emits go to the transport, sink
//! updates go to the external application state store, logs go to the
//! logging layer. The router itself performs no I/O.

use std::fmt;

use chatwire_proto::{
    Attachment, ChatMessage, ClientBound, MessageId, ParticipantId, RoomDetails, RoomId,
    SenderType, ServerBound, Timestamp,
};

use crate::queue::QueueEntry;

/// Which side of the conversation this client is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    /// Agent dashboard.
    Agent,
    /// Visitor widget.
    Visitor,
}

impl ClientRole {
    /// The sender type this client stamps on its own messages.
    pub fn sender_type(self) -> SenderType {
        match self {
            Self::Agent => SenderType::Agent,
            Self::Visitor => SenderType::Visitor,
        }
    }

    /// Whether a sender type belongs to the counterpart side - the side
    /// whose messages we acknowledge and mark read.
    pub fn is_counterpart(self, sender: SenderType) -> bool {
        match self {
            Self::Agent => {
                matches!(sender, SenderType::Visitor | SenderType::VisitorSystem)
            },
            Self::Visitor => matches!(
                sender,
                SenderType::Agent | SenderType::AgentSystem | SenderType::AiAgent
            ),
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent => f.write_str("agent"),
            Self::Visitor => f.write_str("visitor"),
        }
    }
}

/// Events the caller feeds into the router.
///
/// The caller is responsible for:
/// - Receiving wire events from the transport
/// - Forwarding application intents (send, typing, focus, room switches)
/// - Driving time forward via ticks
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// A decoded wire event arrived from the transport.
    WireReceived(ClientBound),

    /// The connection manager reports the transport open.
    TransportOpen,

    /// The connection manager reports the transport gone.
    TransportClosed,

    /// The transport rejected an emit during a flush; the entry goes back
    /// to the front of its bucket.
    EmitRejected {
        /// The rejected entry.
        entry: QueueEntry,
    },

    /// Application wants to send a chat message.
    SendMessage {
        /// Target room.
        room_id: RoomId,
        /// Plaintext content.
        content: String,
        /// Optional attachment descriptor.
        attachment: Option<Attachment>,
    },

    /// Keystroke-level typing state from the UI.
    SetTyping {
        /// Room being typed in.
        room_id: RoomId,
        /// Whether the user is currently typing.
        is_typing: bool,
    },

    /// Application wants to join a room.
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
    },

    /// Application closed a room; pending queued events for it are
    /// discarded.
    LeaveRoom {
        /// Room to leave.
        room_id: RoomId,
    },

    /// The active (displayed) room changed. `None` means no room is open.
    RoomActivated {
        /// Newly active room.
        room_id: Option<RoomId>,
    },

    /// The tab/window gained or lost focus.
    FocusChanged {
        /// Whether the window is now focused.
        focused: bool,
    },

    /// Toggle end-to-end encryption for outgoing content.
    SetEncryption {
        /// New toggle state.
        enabled: bool,
    },

    /// Periodic tick for timeout processing (typing debounce).
    Tick,
}

/// Actions the router produces for the caller to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterAction {
    /// Emit this event on the transport.
    Emit(ServerBound),

    /// Apply this update to the external application state sink.
    Sink(SinkUpdate),

    /// Log message for debugging.
    Log {
        /// Log message.
        message: String,
    },
}

/// Updates the router hands to the external state sink.
///
/// The sink is opaque to the router: it applies updates in order and owns
/// the per-room message logs. Delivery and read timestamps are monotonic -
/// the sink sets them once and never clears them.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkUpdate {
    /// Append a message to its room's log.
    AppendMessage(ChatMessage),

    /// The server accepted an outbound message (`sent_at`, clears
    /// `is_loading`).
    MessageSent {
        /// The message's room.
        room_id: RoomId,
        /// The accepted message.
        message_id: MessageId,
        /// Server acceptance time.
        sent_at: Timestamp,
    },

    /// The peer confirmed delivery of a message.
    MessageDelivered {
        /// The message's room.
        room_id: RoomId,
        /// The delivered message.
        message_id: MessageId,
        /// Delivery time.
        delivered_at: Timestamp,
    },

    /// The counterpart read a batch of messages.
    MessagesRead {
        /// The room read.
        room_id: RoomId,
        /// The messages read.
        message_ids: Vec<MessageId>,
        /// Read time.
        read_at: Timestamp,
    },

    /// Counterpart typing-state change.
    PeerTyping {
        /// Room being typed in.
        room_id: RoomId,
        /// Which side is typing.
        client_type: SenderType,
        /// New typing state.
        is_typing: bool,
    },

    /// An agent joined a room.
    AgentJoined {
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
    AgentLeft {
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
        page_title: Option<String>,
    },

    /// The backend greeting arrived; the connection is fully established.
    HandshakeComplete {
        /// Rooms this client was in before the reconnect.
        past_room_ids: Vec<RoomId>,
    },
}
