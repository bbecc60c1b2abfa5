//! Chatwire Client
//!
//! The I/O layer around the sans-IO core: connection lifecycle, WebSocket
//! transport, health probing, durable storage, and the session driver that
//! wires them all to the [`Router`](chatwire_core::Router).
//!
//! # Components
//!
//! - [`Supervisor`]: connection state machine (probe, dial, bounded retry,
//!   fail-stop)
//! - [`transport`]: WebSocket pumps bridging the socket to typed channels
//! - [`HealthProbe`]: backend health and network reachability checks
//! - [`RedbStore`]: durable [`StateStore`](chatwire_core::StateStore)
//! - [`KeyRing`]: persisted key pairs for session-key exchange
//! - [`session`]: the tokio driver task and its [`SessionHandle`]
//!
//! # Quick start
//!
//! ```no_run
//! use chatwire_client::{session, ProbeConfig, RedbStore, SessionConfig};
//! use chatwire_core::{ClientRole, RouterConfig, RouterEvent};
//! use chatwire_proto::{ParticipantId, RoomId, SessionId};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedbStore::open("chatwire.redb")?;
//! let mut handle = session::spawn(
//!     SessionConfig {
//!         ws_url: "wss://chat.example/socket".into(),
//!         probe: ProbeConfig {
//!             healthz_url: "https://chat.example/healthz".into(),
//!             auth_token: "token".into(),
//!             reachability_url: "https://connectivity.example/".into(),
//!             ..ProbeConfig::default()
//!         },
//!         role: ClientRole::Agent,
//!         identity: ParticipantId::new("agent-1"),
//!         session_id: SessionId::new("session-1"),
//!         tab_id: "tab-1".into(),
//!         router: RouterConfig::default(),
//!         supervisor: Default::default(),
//!     },
//!     store,
//! )?;
//!
//! handle
//!     .commands
//!     .send(RouterEvent::SendMessage {
//!         room_id: RoomId::new("room-1"),
//!         content: "hello".into(),
//!         attachment: None,
//!     })
//!     .await?;
//!
//! while let Some(update) = handle.sink.recv().await {
//!     // apply to the application state store
//!     let _ = update;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod env;
mod error;
mod keyring;
mod probe;
pub mod session;
mod storage;
mod supervisor;
pub mod transport;

pub use env::SystemEnv;
pub use error::{SessionError, TransportError};
pub use keyring::{KeyRing, KeyRingError, DEFAULT_KEY_LIFETIME, DEFAULT_KEY_MAX_AGE};
pub use probe::{HealthProbe, ProbeConfig, HEALTH_TOKEN_HEADER};
pub use session::{SessionConfig, SessionHandle};
pub use storage::RedbStore;
pub use supervisor::{
    ConnectionState, Supervisor, SupervisorAction, SupervisorConfig, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_PROBE_INTERVAL, DEFAULT_RETRY_DELAY, DEFAULT_RETRY_LIMIT,
};
