//! Wire Protocol
//!
//! Typed wire protocol and chat domain model for chatwire. The backend speaks
//! a socket-event protocol: every frame is a JSON object with an `event` name
//! and a `data` payload. Both directions are modeled as single tagged sums
//! ([`ServerBound`], [`ClientBound`]) so the router dispatches through one
//! exhaustive `match` instead of scattered per-event handlers.
//!
//! # Components
//!
//! - [`ChatMessage`] and friends: the domain model shared by both clients
//! - [`EncryptedEnvelope`]: the content envelope (ciphertext or pass-through)
//! - [`ServerBound`] / [`ClientBound`]: the two wire sums
//!
//! # Invariants
//!
//! Encoding an event and decoding it back must produce an equivalent value.
//! Event names and payload field names are fixed by the backend (kebab-case
//! events, camelCase fields) and must never drift.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod envelope;
mod events;
mod message;

pub use envelope::{Algorithm, EncryptedEnvelope, EnvelopeMetadata, ENVELOPE_VERSION};
pub use events::{
    ClientBound, InboundMessage, MessageRef, OutboundMessage, RoomDetails, ServerBound, WireError,
};
pub use message::{
    Attachment, ChatMessage, MessageId, MessageType, ParticipantId, RoomId, SenderType, SessionId,
    Timestamp,
};
