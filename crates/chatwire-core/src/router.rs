//! Event router state machine.
//!
//! The router is the single dispatch point between the wire and the
//! application: inbound wire events become sink updates (plus automatic
//! delivery acks), application intents become outbound emits routed through
//! the outgoing queue. It follows the action pattern - `handle` consumes one
//! event and returns the actions for the caller to execute - so the whole
//! policy surface (typing debounce, read-receipt gating, reconnect replay)
//! is testable without a transport.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use chatwire_crypto::SessionKeyStore;
use chatwire_proto::{
    ChatMessage, ClientBound, InboundMessage, MessageId, MessageRef, OutboundMessage,
    ParticipantId, RoomId, ServerBound, SessionId,
};
use thiserror::Error;

use crate::{
    codec::{CodecError, MessageCodec},
    env::Environment,
    event::{ClientRole, RouterAction, RouterEvent, SinkUpdate},
    queue::{OutgoingQueue, RoutingKey, SendOutcome},
    storage::StateStore,
};

/// Trailing window after the last keystroke before "is typing" auto-clears.
pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_secs(2);

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Typing auto-clear window.
    pub typing_debounce: Duration,
    /// Whether outgoing content is encrypted.
    pub encryption_enabled: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { typing_debounce: DEFAULT_TYPING_DEBOUNCE, encryption_enabled: false }
    }
}

/// Errors from router event processing.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Envelope encoding failed (session key unavailable).
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Per-room outbound typing state.
struct TypingState<I> {
    active: bool,
    last_input: Option<I>,
}

/// The event router.
///
/// # Invariants
///
/// - Typing emits happen only on actual boolean flips.
/// - A read receipt is emitted only while focus, membership, and room
///   activation all hold, and batches every unread counterpart message.
/// - Each inbound message is delivery-acked at most once.
pub struct Router<E: Environment, S: StateStore> {
    env: E,
    role: ClientRole,
    identity: ParticipantId,
    session_id: SessionId,
    config: RouterConfig,

    codec: MessageCodec,
    keys: SessionKeyStore,
    queue: OutgoingQueue<S>,

    connected: bool,
    handshaken: bool,
    joined: HashSet<RoomId>,
    active_room: Option<RoomId>,
    focused: bool,

    typing: HashMap<RoomId, TypingState<E::Instant>>,
    unread: HashMap<RoomId, Vec<MessageRef>>,
    acked: HashSet<MessageId>,
}

impl<E: Environment, S: StateStore> Router<E, S> {
    /// Create a router for one client session.
    ///
    /// The outgoing queue restores any events persisted under this
    /// session/role namespace by a previous run.
    pub fn new(
        env: E,
        store: S,
        role: ClientRole,
        identity: ParticipantId,
        session_id: SessionId,
        config: RouterConfig,
    ) -> Self {
        let queue_key = format!("chatwire:queue:{session_id}:{role}");

        Self {
            codec: MessageCodec::new(config.encryption_enabled),
            keys: SessionKeyStore::new(),
            queue: OutgoingQueue::open(store, queue_key),
            env,
            role,
            identity,
            session_id,
            config,
            connected: false,
            handshaken: false,
            joined: HashSet::new(),
            active_room: None,
            focused: true,
            typing: HashMap::new(),
            unread: HashMap::new(),
            acked: HashSet::new(),
        }
    }

    /// Whether the router currently believes the transport is open.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Rooms currently joined.
    pub fn joined_rooms(&self) -> impl Iterator<Item = &RoomId> {
        self.joined.iter()
    }

    /// Buffered outbound events for a room.
    pub fn pending_for(&self, room_id: &RoomId) -> usize {
        self.queue.pending(&RoutingKey::Room(room_id.clone()))
    }

    /// Total buffered outbound events.
    pub fn total_pending(&self) -> usize {
        self.queue.total_pending()
    }

    /// Process an event and return resulting actions.
    pub fn handle(&mut self, event: RouterEvent) -> Result<Vec<RouterAction>, RouterError> {
        match event {
            RouterEvent::WireReceived(wire) => self.handle_wire(wire),
            RouterEvent::TransportOpen => Ok(self.handle_transport_open()),
            RouterEvent::TransportClosed => Ok(self.handle_transport_closed()),
            RouterEvent::EmitRejected { entry } => Ok(self.handle_emit_rejected(entry)),
            RouterEvent::SendMessage { room_id, content, attachment } => {
                self.handle_send_message(room_id, content, attachment)
            },
            RouterEvent::SetTyping { room_id, is_typing } => {
                Ok(self.handle_set_typing(room_id, is_typing))
            },
            RouterEvent::JoinRoom { room_id } => Ok(self.handle_join_room(room_id)),
            RouterEvent::LeaveRoom { room_id } => Ok(self.handle_leave_room(&room_id)),
            RouterEvent::RoomActivated { room_id } => Ok(self.handle_room_activated(room_id)),
            RouterEvent::FocusChanged { focused } => Ok(self.handle_focus_changed(focused)),
            RouterEvent::SetEncryption { enabled } => Ok(self.handle_set_encryption(enabled)),
            RouterEvent::Tick => Ok(self.handle_tick()),
        }
    }

    fn handle_wire(&mut self, wire: ClientBound) -> Result<Vec<RouterAction>, RouterError> {
        match wire {
            ClientBound::AgentConnected { past_room_ids } => {
                Ok(self.handle_greeting(past_room_ids))
            },
            ClientBound::NewMessage(message) | ClientBound::VisitorMessage(message) => {
                Ok(self.handle_inbound_message(message))
            },
            ClientBound::MessageAck { message_id, room_id, sent_at } => {
                Ok(vec![RouterAction::Sink(SinkUpdate::MessageSent {
                    room_id,
                    message_id,
                    sent_at,
                })])
            },
            ClientBound::DeliveredTo { message_id, room_id, delivered_at }
            | ClientBound::MessageDelivered { message_id, room_id, delivered_at } => {
                Ok(vec![RouterAction::Sink(SinkUpdate::MessageDelivered {
                    room_id,
                    message_id,
                    delivered_at,
                })])
            },
            ClientBound::MessagesRead { room_id, message_ids, read_at } => {
                Ok(vec![RouterAction::Sink(SinkUpdate::MessagesRead {
                    room_id,
                    message_ids,
                    read_at,
                })])
            },
            ClientBound::TypingIndicator { room_id, client_type, is_typing } => {
                Ok(vec![RouterAction::Sink(SinkUpdate::PeerTyping {
                    room_id,
                    client_type,
                    is_typing,
                })])
            },
            ClientBound::AgentJoinedRoom { room_id, agent_name, sender_id, joined_at } => {
                Ok(vec![RouterAction::Sink(SinkUpdate::AgentJoined {
                    room_id,
                    agent_name,
                    sender_id,
                    joined_at,
                })])
            },
            ClientBound::AgentLeftRoom { room_id, agent_name, sender_id, left_at } => {
                Ok(vec![RouterAction::Sink(SinkUpdate::AgentLeft {
                    room_id,
                    agent_name,
                    sender_id,
                    left_at,
                })])
            },
            ClientBound::RoomDetails(details) => {
                Ok(vec![RouterAction::Sink(SinkUpdate::RoomDetails(details))])
            },
            ClientBound::VisitorPageChanged { room_id, page_url, page_title } => {
                Ok(vec![RouterAction::Sink(SinkUpdate::VisitorPageChanged {
                    room_id,
                    page_url,
                    page_title,
                })])
            },
        }
    }

    /// Transport opened: replay everything buffered while offline, FIFO per
    /// room.
    fn handle_transport_open(&mut self) -> Vec<RouterAction> {
        self.connected = true;
        self.flush_queue()
    }

    fn handle_transport_closed(&mut self) -> Vec<RouterAction> {
        self.connected = false;
        self.handshaken = false;

        vec![RouterAction::Log { message: "transport closed, buffering outbound events".to_string() }]
    }

    fn handle_emit_rejected(&mut self, entry: crate::queue::QueueEntry) -> Vec<RouterAction> {
        let mut actions = Vec::new();

        if let Some(err) = self.queue.requeue(entry) {
            actions.push(RouterAction::Log {
                message: format!("queue persistence failed, continuing in memory: {err}"),
            });
        }

        actions
    }

    /// Backend greeting: rejoin past rooms and re-flush anything buffered
    /// before the handshake completed (including pre-room fallback sends).
    fn handle_greeting(&mut self, past_room_ids: Vec<RoomId>) -> Vec<RouterAction> {
        if self.handshaken {
            return vec![RouterAction::Log {
                message: "ignoring duplicate handshake greeting".to_string(),
            }];
        }
        self.handshaken = true;

        let mut actions = Vec::new();

        for room_id in &past_room_ids {
            self.joined.insert(room_id.clone());
            actions.push(RouterAction::Emit(ServerBound::JoinRoom { room_id: room_id.clone() }));
        }

        actions.extend(self.flush_queue());
        actions.push(RouterAction::Sink(SinkUpdate::HandshakeComplete { past_room_ids }));

        actions
    }

    fn handle_inbound_message(&mut self, message: InboundMessage) -> Vec<RouterAction> {
        if message.sender_id == self.identity {
            // Our own message echoed back - the optimistic copy is already
            // in the log and acks update it.
            return Vec::new();
        }

        let content = match &message.encrypted_data {
            Some(envelope) => self.codec.decode(&self.keys, &self.session_id, envelope),
            None => message.content.clone(),
        };

        let created_at =
            if message.created_at > 0 { message.created_at } else { self.env.unix_millis() };

        let chat_message = ChatMessage {
            message_id: message.message_id.clone(),
            room_id: message.room_id.clone(),
            sender_id: message.sender_id.clone(),
            sender_type: message.sender_type,
            content,
            message_type: message.message_type,
            created_at,
            sent_at: Some(created_at),
            delivered_at: None,
            read_at: None,
            attachment: message.attachment.clone(),
            is_loading: false,
        };

        let mut actions = vec![RouterAction::Sink(SinkUpdate::AppendMessage(chat_message))];

        if self.role.is_counterpart(message.sender_type) {
            let reference = MessageRef {
                message_id: message.message_id.clone(),
                sender_id: message.sender_id.clone(),
            };

            // At-least-once delivery means duplicates arrive; ack each
            // message id once.
            if self.acked.insert(message.message_id.clone()) {
                let ack = ServerBound::MessageDelivered {
                    messages: vec![reference.clone()],
                    room_id: message.room_id.clone(),
                };
                actions.extend(self.send_or_queue(ack));

                self.unread.entry(message.room_id.clone()).or_default().push(reference);
            }

            actions.extend(self.maybe_emit_read_receipt(&message.room_id));
        }

        actions
    }

    fn handle_send_message(
        &mut self,
        room_id: RoomId,
        content: String,
        attachment: Option<chatwire_proto::Attachment>,
    ) -> Result<Vec<RouterAction>, RouterError> {
        let message_id = MessageId::new(format!("{:032x}", self.env.random_u128()));
        let created_at = self.env.unix_millis();

        let chat_message = ChatMessage::outgoing(
            message_id.clone(),
            room_id.clone(),
            self.identity.clone(),
            self.role.sender_type(),
            content.clone(),
            attachment.clone(),
            created_at,
        );

        let envelope = self.codec.encode(
            &self.env,
            &mut self.keys,
            &self.session_id,
            &content,
            chat_message.message_type,
        )?;

        let encrypted = self.codec.encryption_enabled();
        let outbound = OutboundMessage {
            message_id,
            message: if encrypted { String::new() } else { content },
            room_id,
            is_encrypted: encrypted,
            encrypted_data: Some(envelope),
            attachment,
        };

        let wire = match self.role {
            ClientRole::Agent => ServerBound::AgentMessage(outbound),
            ClientRole::Visitor => ServerBound::VisitorMessage(outbound),
        };

        let mut actions = vec![RouterAction::Sink(SinkUpdate::AppendMessage(chat_message))];
        actions.extend(self.send_or_queue(wire));

        Ok(actions)
    }

    fn handle_set_typing(&mut self, room_id: RoomId, is_typing: bool) -> Vec<RouterAction> {
        let now = self.env.now();
        let state = self
            .typing
            .entry(room_id.clone())
            .or_insert(TypingState { active: false, last_input: None });

        if is_typing {
            state.last_input = Some(now);

            if state.active {
                // Already typing; the trailing timer was just extended.
                return Vec::new();
            }
            state.active = true;
        } else {
            if !state.active {
                return Vec::new();
            }
            state.active = false;
            state.last_input = None;
        }

        self.send_or_queue(ServerBound::ClientTyping { is_typing, room_id })
    }

    fn handle_join_room(&mut self, room_id: RoomId) -> Vec<RouterAction> {
        self.joined.insert(room_id.clone());
        self.send_or_queue(ServerBound::JoinRoom { room_id })
    }

    /// Leaving a room discards its pending queue - those events have no
    /// destination anymore.
    fn handle_leave_room(&mut self, room_id: &RoomId) -> Vec<RouterAction> {
        self.joined.remove(room_id);
        self.typing.remove(room_id);
        self.unread.remove(room_id);

        let mut actions = Vec::new();

        if let Some(err) = self.queue.clear(&RoutingKey::Room(room_id.clone())) {
            actions.push(RouterAction::Log {
                message: format!("queue persistence failed, continuing in memory: {err}"),
            });
        }

        if self.connected {
            actions.push(RouterAction::Emit(ServerBound::LeaveRoom { room_id: room_id.clone() }));
        }

        actions
    }

    fn handle_room_activated(&mut self, room_id: Option<RoomId>) -> Vec<RouterAction> {
        self.active_room = room_id.clone();

        match room_id {
            Some(room_id) => self.maybe_emit_read_receipt(&room_id),
            None => Vec::new(),
        }
    }

    fn handle_focus_changed(&mut self, focused: bool) -> Vec<RouterAction> {
        self.focused = focused;

        if !focused {
            return Vec::new();
        }

        match self.active_room.clone() {
            Some(room_id) => self.maybe_emit_read_receipt(&room_id),
            None => Vec::new(),
        }
    }

    fn handle_set_encryption(&mut self, enabled: bool) -> Vec<RouterAction> {
        self.config.encryption_enabled = enabled;
        self.codec.set_encryption_enabled(enabled);

        vec![RouterAction::Log { message: format!("content encryption toggled: {enabled}") }]
    }

    /// Timeout processing: auto-clear stale typing states.
    fn handle_tick(&mut self) -> Vec<RouterAction> {
        let now = self.env.now();
        let debounce = self.config.typing_debounce;

        let expired: Vec<RoomId> = self
            .typing
            .iter()
            .filter(|(_, state)| {
                state.active
                    && state.last_input.is_some_and(|last| now - last >= debounce)
            })
            .map(|(room_id, _)| room_id.clone())
            .collect();

        let mut actions = Vec::new();
        for room_id in expired {
            if let Some(state) = self.typing.get_mut(&room_id) {
                state.active = false;
                state.last_input = None;
            }

            actions.extend(
                self.send_or_queue(ServerBound::ClientTyping { is_typing: false, room_id }),
            );
        }

        actions
    }

    /// Emit a read receipt for a room when - and only when - the window is
    /// focused, the room is joined, and the room is the active one. Batches
    /// every unread counterpart message into a single event.
    fn maybe_emit_read_receipt(&mut self, room_id: &RoomId) -> Vec<RouterAction> {
        let eligible = self.focused
            && self.joined.contains(room_id)
            && self.active_room.as_ref() == Some(room_id);

        if !eligible {
            return Vec::new();
        }

        let Some(unread) = self.unread.get_mut(room_id) else {
            return Vec::new();
        };

        if unread.is_empty() {
            return Vec::new();
        }

        let messages = std::mem::take(unread);
        self.send_or_queue(ServerBound::ReadReceipt { room_id: room_id.clone(), messages })
    }

    /// Route an outbound event: direct emit when connected, buffered
    /// otherwise. Safe to call from any handler without tracking connection
    /// state.
    fn send_or_queue(&mut self, event: ServerBound) -> Vec<RouterAction> {
        match self.queue.enqueue_or_send(self.connected, event, self.env.unix_millis()) {
            SendOutcome::Sent(event) => vec![RouterAction::Emit(event)],
            SendOutcome::Queued { persist_error: None } => Vec::new(),
            SendOutcome::Queued { persist_error: Some(err) } => vec![RouterAction::Log {
                message: format!("queue persistence failed, continuing in memory: {err}"),
            }],
        }
    }

    fn flush_queue(&mut self) -> Vec<RouterAction> {
        let (entries, persist_error) = self.queue.take_all();

        let mut actions = Vec::new();

        if let Some(err) = persist_error {
            actions.push(RouterAction::Log {
                message: format!("queue persistence failed, continuing in memory: {err}"),
            });
        }

        if !entries.is_empty() {
            actions.push(RouterAction::Log {
                message: format!("replaying {} buffered events", entries.len()),
            });
        }

        actions.extend(entries.into_iter().map(|entry| RouterAction::Emit(entry.event)));
        actions
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chatwire_proto::SenderType;

    use super::*;
    use crate::{env::test_utils::MockEnv, storage::MemoryStore};

    fn router(role: ClientRole) -> Router<MockEnv, MemoryStore> {
        router_with(role, MockEnv::new(), MemoryStore::new())
    }

    fn router_with(
        role: ClientRole,
        env: MockEnv,
        store: MemoryStore,
    ) -> Router<MockEnv, MemoryStore> {
        Router::new(
            env,
            store,
            role,
            ParticipantId::new("self-id"),
            SessionId::new("session-1"),
            RouterConfig::default(),
        )
    }

    fn inbound(room: &str, id: &str, sender_type: SenderType) -> ClientBound {
        ClientBound::NewMessage(InboundMessage {
            message_id: MessageId::new(id),
            content: format!("content of {id}"),
            room_id: RoomId::new(room),
            sender_id: ParticipantId::new("peer-id"),
            sender_type,
            is_encrypted: false,
            encrypted_data: None,
            attachment: None,
            message_type: chatwire_proto::MessageType::Text,
            created_at: 42,
        })
    }

    fn emits(actions: &[RouterAction]) -> Vec<&ServerBound> {
        actions
            .iter()
            .filter_map(|a| match a {
                RouterAction::Emit(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn send_while_connected_emits_directly() {
        let mut router = router(ClientRole::Agent);
        router.handle(RouterEvent::TransportOpen).unwrap();

        let actions = router
            .handle(RouterEvent::SendMessage {
                room_id: RoomId::new("r1"),
                content: "hello".to_string(),
                attachment: None,
            })
            .unwrap();

        // Optimistic append plus a direct emit.
        assert!(matches!(
            actions[0],
            RouterAction::Sink(SinkUpdate::AppendMessage(ref m)) if m.is_loading
        ));
        match emits(&actions)[0] {
            ServerBound::AgentMessage(out) => {
                assert_eq!(out.message, "hello");
                assert!(!out.is_encrypted);
            },
            other => panic!("expected agent-message, got {other:?}"),
        }
        assert_eq!(router.total_pending(), 0);
    }

    #[test]
    fn visitor_role_emits_visitor_message() {
        let mut router = router(ClientRole::Visitor);
        router.handle(RouterEvent::TransportOpen).unwrap();

        let actions = router
            .handle(RouterEvent::SendMessage {
                room_id: RoomId::new("r1"),
                content: "hi".to_string(),
                attachment: None,
            })
            .unwrap();

        assert!(matches!(emits(&actions)[0], ServerBound::VisitorMessage(_)));
    }

    #[test]
    fn offline_sends_queue_and_replay_in_order() {
        let mut router = router(ClientRole::Agent);

        for n in 0..3 {
            let actions = router
                .handle(RouterEvent::SendMessage {
                    room_id: RoomId::new("r1"),
                    content: format!("msg {n}"),
                    attachment: None,
                })
                .unwrap();
            assert!(emits(&actions).is_empty());
        }
        assert_eq!(router.pending_for(&RoomId::new("r1")), 3);

        let actions = router.handle(RouterEvent::TransportOpen).unwrap();
        let replayed = emits(&actions);
        assert_eq!(replayed.len(), 3);

        for (n, event) in replayed.iter().enumerate() {
            match event {
                ServerBound::AgentMessage(out) => assert_eq!(out.message, format!("msg {n}")),
                other => panic!("expected agent-message, got {other:?}"),
            }
        }

        assert_eq!(router.pending_for(&RoomId::new("r1")), 0);
    }

    #[test]
    fn inbound_counterpart_message_appends_and_acks_once() {
        let mut router = router(ClientRole::Agent);
        router.handle(RouterEvent::TransportOpen).unwrap();

        let actions =
            router.handle(RouterEvent::WireReceived(inbound("r1", "m1", SenderType::Visitor))).unwrap();

        assert!(matches!(
            actions[0],
            RouterAction::Sink(SinkUpdate::AppendMessage(ref m)) if !m.is_loading
        ));
        match emits(&actions)[0] {
            ServerBound::MessageDelivered { messages, room_id } => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].message_id, MessageId::new("m1"));
                assert_eq!(room_id, &RoomId::new("r1"));
            },
            other => panic!("expected delivery ack, got {other:?}"),
        }

        // Duplicate delivery still appends (sink dedupes) but never
        // double-acks.
        let actions =
            router.handle(RouterEvent::WireReceived(inbound("r1", "m1", SenderType::Visitor))).unwrap();
        assert!(emits(&actions).is_empty());
    }

    #[test]
    fn own_echo_is_ignored() {
        let mut router = router(ClientRole::Agent);
        router.handle(RouterEvent::TransportOpen).unwrap();

        let echo = ClientBound::NewMessage(InboundMessage {
            message_id: MessageId::new("m1"),
            content: "mine".to_string(),
            room_id: RoomId::new("r1"),
            sender_id: ParticipantId::new("self-id"),
            sender_type: SenderType::Agent,
            is_encrypted: false,
            encrypted_data: None,
            attachment: None,
            message_type: chatwire_proto::MessageType::Text,
            created_at: 1,
        });

        assert!(router.handle(RouterEvent::WireReceived(echo)).unwrap().is_empty());
    }

    #[test]
    fn same_side_message_is_not_acked() {
        let mut router = router(ClientRole::Agent);
        router.handle(RouterEvent::TransportOpen).unwrap();

        let actions = router
            .handle(RouterEvent::WireReceived(inbound("r1", "m1", SenderType::AgentSystem)))
            .unwrap();

        assert!(matches!(actions[0], RouterAction::Sink(SinkUpdate::AppendMessage(_))));
        assert!(emits(&actions).is_empty());
    }

    #[test]
    fn typing_emits_only_on_flips() {
        let mut router = router(ClientRole::Agent);
        router.handle(RouterEvent::TransportOpen).unwrap();
        let room = RoomId::new("r1");

        let first = router
            .handle(RouterEvent::SetTyping { room_id: room.clone(), is_typing: true })
            .unwrap();
        assert_eq!(emits(&first).len(), 1);

        // Second keystroke within the window: no duplicate emit.
        let second = router
            .handle(RouterEvent::SetTyping { room_id: room.clone(), is_typing: true })
            .unwrap();
        assert!(emits(&second).is_empty());

        let stop =
            router.handle(RouterEvent::SetTyping { room_id: room.clone(), is_typing: false }).unwrap();
        match emits(&stop)[0] {
            ServerBound::ClientTyping { is_typing, .. } => assert!(!is_typing),
            other => panic!("expected client-typing, got {other:?}"),
        }

        // Clearing twice is idempotent.
        let again =
            router.handle(RouterEvent::SetTyping { room_id: room, is_typing: false }).unwrap();
        assert!(emits(&again).is_empty());
    }

    #[test]
    fn typing_auto_clears_after_debounce() {
        let env = MockEnv::new();
        let mut router = router_with(ClientRole::Agent, env.clone(), MemoryStore::new());
        router.handle(RouterEvent::TransportOpen).unwrap();
        let room = RoomId::new("r1");

        router.handle(RouterEvent::SetTyping { room_id: room.clone(), is_typing: true }).unwrap();

        // Not yet expired.
        env.advance(Duration::from_millis(1_500));
        assert!(emits(&router.handle(RouterEvent::Tick).unwrap()).is_empty());

        // A keystroke extends the window.
        router.handle(RouterEvent::SetTyping { room_id: room.clone(), is_typing: true }).unwrap();
        env.advance(Duration::from_millis(1_500));
        assert!(emits(&router.handle(RouterEvent::Tick).unwrap()).is_empty());

        env.advance(Duration::from_millis(600));
        let actions = router.handle(RouterEvent::Tick).unwrap();
        match emits(&actions)[0] {
            ServerBound::ClientTyping { is_typing, room_id } => {
                assert!(!is_typing);
                assert_eq!(room_id, &room);
            },
            other => panic!("expected client-typing, got {other:?}"),
        }

        // Already cleared; further ticks stay quiet.
        env.advance(Duration::from_secs(10));
        assert!(emits(&router.handle(RouterEvent::Tick).unwrap()).is_empty());
    }

    #[test]
    fn read_receipt_requires_focus_joined_and_active() {
        let mut router = router(ClientRole::Agent);
        router.handle(RouterEvent::TransportOpen).unwrap();
        let room = RoomId::new("r1");

        // Unread counterpart messages accumulate while the room is neither
        // joined nor active.
        router.handle(RouterEvent::WireReceived(inbound("r1", "m1", SenderType::Visitor))).unwrap();
        router.handle(RouterEvent::WireReceived(inbound("r1", "m2", SenderType::Visitor))).unwrap();

        // Joined but not active: no receipt.
        let actions = router.handle(RouterEvent::JoinRoom { room_id: room.clone() }).unwrap();
        assert!(!actions.iter().any(|a| matches!(a, RouterAction::Emit(ServerBound::ReadReceipt { .. }))));

        // Active and focused and joined: one batched receipt.
        let actions =
            router.handle(RouterEvent::RoomActivated { room_id: Some(room.clone()) }).unwrap();
        let receipt = emits(&actions)
            .into_iter()
            .find_map(|e| match e {
                ServerBound::ReadReceipt { messages, room_id } => Some((messages, room_id)),
                _ => None,
            })
            .unwrap_or_else(|| panic!("expected read receipt in {actions:?}"));
        assert_eq!(receipt.1, &room);
        assert_eq!(receipt.0.len(), 2);

        // Nothing left unread: re-activating stays quiet.
        let actions =
            router.handle(RouterEvent::RoomActivated { room_id: Some(room.clone()) }).unwrap();
        assert!(emits(&actions).is_empty());
    }

    #[test]
    fn unfocused_window_suppresses_receipts_until_refocus() {
        let mut router = router(ClientRole::Agent);
        router.handle(RouterEvent::TransportOpen).unwrap();
        let room = RoomId::new("r1");

        router.handle(RouterEvent::JoinRoom { room_id: room.clone() }).unwrap();
        router.handle(RouterEvent::RoomActivated { room_id: Some(room.clone()) }).unwrap();
        router.handle(RouterEvent::FocusChanged { focused: false }).unwrap();

        let actions = router
            .handle(RouterEvent::WireReceived(inbound("r1", "m1", SenderType::Visitor)))
            .unwrap();
        assert!(
            !actions.iter().any(|a| matches!(a, RouterAction::Emit(ServerBound::ReadReceipt { .. })))
        );

        // Focus returns: the batched receipt goes out.
        let actions = router.handle(RouterEvent::FocusChanged { focused: true }).unwrap();
        assert!(
            actions.iter().any(|a| matches!(a, RouterAction::Emit(ServerBound::ReadReceipt { .. })))
        );
    }

    #[test]
    fn greeting_rejoins_past_rooms_and_flushes() {
        let mut router = router(ClientRole::Agent);

        // Buffered before any connection or room knowledge.
        router
            .handle(RouterEvent::SendMessage {
                room_id: RoomId::new("r1"),
                content: "early".to_string(),
                attachment: None,
            })
            .unwrap();

        let open_actions = router.handle(RouterEvent::TransportOpen).unwrap();
        assert_eq!(emits(&open_actions).len(), 1);

        // A message buffered between open and greeting.
        router.handle(RouterEvent::TransportClosed).unwrap();
        router
            .handle(RouterEvent::SendMessage {
                room_id: RoomId::new("r2"),
                content: "mid".to_string(),
                attachment: None,
            })
            .unwrap();
        router.handle(RouterEvent::TransportOpen).unwrap();

        let actions = router
            .handle(RouterEvent::WireReceived(ClientBound::AgentConnected {
                past_room_ids: vec![RoomId::new("r1"), RoomId::new("r3")],
            }))
            .unwrap();

        let emitted = emits(&actions);
        let joins = emitted
            .iter()
            .filter(|e| matches!(e, ServerBound::JoinRoom { .. }))
            .count();
        assert_eq!(joins, 2);
        assert!(router.joined_rooms().any(|r| r == &RoomId::new("r3")));
        assert!(actions
            .iter()
            .any(|a| matches!(a, RouterAction::Sink(SinkUpdate::HandshakeComplete { .. }))));
    }

    #[test]
    fn leave_room_discards_pending_bucket() {
        let mut router = router(ClientRole::Agent);
        let room = RoomId::new("r1");

        router
            .handle(RouterEvent::SendMessage {
                room_id: room.clone(),
                content: "never sent".to_string(),
                attachment: None,
            })
            .unwrap();
        assert_eq!(router.pending_for(&room), 1);

        router.handle(RouterEvent::LeaveRoom { room_id: room.clone() }).unwrap();
        assert_eq!(router.pending_for(&room), 0);

        // Reconnect replays nothing for the closed room.
        let actions = router.handle(RouterEvent::TransportOpen).unwrap();
        assert!(emits(&actions).is_empty());
    }

    #[test]
    fn acks_update_delivery_and_read_state() {
        let mut router = router(ClientRole::Agent);

        let actions = router
            .handle(RouterEvent::WireReceived(ClientBound::MessageAck {
                message_id: MessageId::new("m1"),
                room_id: RoomId::new("r1"),
                sent_at: 10,
            }))
            .unwrap();
        assert!(matches!(
            actions[0],
            RouterAction::Sink(SinkUpdate::MessageSent { sent_at: 10, .. })
        ));

        let actions = router
            .handle(RouterEvent::WireReceived(ClientBound::DeliveredTo {
                message_id: MessageId::new("m1"),
                room_id: RoomId::new("r1"),
                delivered_at: 20,
            }))
            .unwrap();
        assert!(matches!(
            actions[0],
            RouterAction::Sink(SinkUpdate::MessageDelivered { delivered_at: 20, .. })
        ));

        let actions = router
            .handle(RouterEvent::WireReceived(ClientBound::MessagesRead {
                room_id: RoomId::new("r1"),
                message_ids: vec![MessageId::new("m1")],
                read_at: 30,
            }))
            .unwrap();
        assert!(matches!(
            actions[0],
            RouterAction::Sink(SinkUpdate::MessagesRead { read_at: 30, .. })
        ));
    }

    #[test]
    fn encrypted_send_carries_envelope_not_plaintext() {
        let env = MockEnv::new();
        let mut router = router_with(ClientRole::Agent, env, MemoryStore::new());
        router.handle(RouterEvent::TransportOpen).unwrap();
        router.handle(RouterEvent::SetEncryption { enabled: true }).unwrap();

        let actions = router
            .handle(RouterEvent::SendMessage {
                room_id: RoomId::new("r1"),
                content: "secret".to_string(),
                attachment: None,
            })
            .unwrap();

        match emits(&actions)[0] {
            ServerBound::AgentMessage(out) => {
                assert!(out.is_encrypted);
                assert!(out.message.is_empty());
                let envelope = out.encrypted_data.as_ref().unwrap();
                assert!(!envelope.is_passthrough());
                assert_eq!(envelope.original_length, 6);
            },
            other => panic!("expected agent-message, got {other:?}"),
        }

        // The optimistic local copy keeps the plaintext.
        assert!(matches!(
            actions[0],
            RouterAction::Sink(SinkUpdate::AppendMessage(ref m)) if m.content == "secret"
        ));
    }

    #[test]
    fn queue_survives_router_restart() {
        let env = MockEnv::new();
        let store = MemoryStore::new();

        let mut router = router_with(ClientRole::Agent, env.clone(), store.clone());
        router
            .handle(RouterEvent::SendMessage {
                room_id: RoomId::new("r1"),
                content: "persisted".to_string(),
                attachment: None,
            })
            .unwrap();
        drop(router);

        // Same session/role namespace: the buffered send is restored.
        let mut reborn = router_with(ClientRole::Agent, env, store);
        assert_eq!(reborn.pending_for(&RoomId::new("r1")), 1);

        let actions = reborn.handle(RouterEvent::TransportOpen).unwrap();
        assert_eq!(emits(&actions).len(), 1);
    }

    #[test]
    fn emit_rejected_restores_entry_for_next_flush() {
        let mut router = router(ClientRole::Agent);

        router
            .handle(RouterEvent::SendMessage {
                room_id: RoomId::new("r1"),
                content: "fragile".to_string(),
                attachment: None,
            })
            .unwrap();

        let actions = router.handle(RouterEvent::TransportOpen).unwrap();
        let flushed = emits(&actions);
        assert_eq!(flushed.len(), 1);
        let rejected = flushed[0].clone();

        // Transport dropped mid-flush; the driver hands the entry back.
        router.handle(RouterEvent::TransportClosed).unwrap();
        router
            .handle(RouterEvent::EmitRejected {
                entry: crate::queue::QueueEntry { event: rejected, timestamp: 0 },
            })
            .unwrap();

        let actions = router.handle(RouterEvent::TransportOpen).unwrap();
        assert_eq!(emits(&actions).len(), 1);
    }
}
