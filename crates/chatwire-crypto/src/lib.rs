//! Chatwire Cryptographic Primitives
//!
//! Key material and AEAD operations for per-session content encryption. Pure
//! where possible: callers provide key material and IVs, which keeps every
//! operation deterministic under test.
//!
//! # Key Lifecycle
//!
//! ```text
//! caller randomness ──> Session Key (per session, memory only)
//!                              │
//!                              ▼
//!                    AES-256-GCM ──> ciphertext + IV + tag
//!
//! caller RNG ──> RSA Key Pair (per identity, archived on rotation)
//!                              │
//!                              ▼
//!                    OAEP wrap ──> session key in transit
//! ```
//!
//! Session keys never leave the process and are never persisted raw; only
//! key-pair metadata (public key, an opaque private-key reference, rotation
//! timestamps) is handed back to callers for durable storage. Compromise of
//! that storage exposes metadata, not content keys.
//!
//! # Security
//!
//! - A fresh 96-bit IV is required for every encryption; IVs are never
//!   derived or reused internally.
//! - Tampered ciphertext fails closed: [`CryptoError::VerificationFailed`],
//!   never a panic and never unverified plaintext.
//! - Session-key bytes are zeroized on drop.
//! - The RSA path exists only for transporting session keys to a new
//!   participant; it is never on the message hot path.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod key_exchange;
mod session_keys;

pub use error::CryptoError;
pub use key_exchange::{
    generate_key_pair, import_public_key, install_wrapped_session_key, unwrap_session_key,
    wrap_cached_session_key, wrap_session_key, KeyPair, KeyPairRecord, KeyPairStore, RSA_KEY_BITS,
};
pub use session_keys::{
    EncryptedContent, SessionKeyStore, IV_SIZE, SESSION_KEY_SIZE, TAG_SIZE,
};

// The public-key type callers shuttle between export and wrap.
pub use rsa::RsaPublicKey;
