//! Chatwire Core
//!
//! Sans-IO messaging core shared by the agent dashboard and the visitor
//! widget. Protocol logic lives in pure state machines that consume events
//! and return actions; the caller (see `chatwire-client`) owns every socket,
//! clock, and storage file.
//!
//! # Architecture
//!
//! - [`Router`]: the single dispatch point between wire events and the
//!   application, producing [`RouterAction`]s
//! - [`MessageCodec`]: envelope encode/decode with placeholder degradation
//! - [`OutgoingQueue`]: durable per-room FIFO buffer with at-least-once
//!   replay
//! - [`AdvisoryLock`]: cooperative cross-tab connection lock
//! - [`StateStore`]: the durable key-value surface everything persists
//!   through
//! - [`Environment`]: time and randomness abstraction for deterministic
//!   tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod codec;
pub mod env;
mod event;
mod lock;
mod queue;
mod router;
pub mod storage;

pub use codec::{CodecError, MessageCodec, DECRYPT_FAILED_PLACEHOLDER, MAX_SESSION_KEY_ATTEMPTS};
pub use env::Environment;
pub use event::{ClientRole, RouterAction, RouterEvent, SinkUpdate};
pub use lock::{AdvisoryLock, LockLease, DEFAULT_LEASE_DURATION};
pub use queue::{OutgoingQueue, QueueEntry, RoutingKey, SendOutcome};
pub use router::{Router, RouterConfig, RouterError, DEFAULT_TYPING_DEBOUNCE};
pub use storage::{MemoryStore, StateStore, StorageError};
