//! Crypto error taxonomy.
//!
//! Key-generation and key-lookup failures are retryable by callers (bounded
//! attempts); verification failures are terminal for that ciphertext and
//! must degrade to a placeholder upstream, never crash the message path.

use thiserror::Error;

/// Errors from session-key and key-exchange operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Session-key generation was handed unusable key material.
    #[error("session key generation failed: {reason}")]
    KeyGeneration {
        /// Why the material was rejected.
        reason: String,
    },

    /// No session key is cached for the session; callers must generate one
    /// first (or retry generation).
    #[error("no session key for session {session_id}")]
    SessionKeyNotFound {
        /// The session that has no key.
        session_id: String,
    },

    /// AEAD authentication failed: the ciphertext, IV, or tag was tampered
    /// with, or a different key was used.
    #[error("ciphertext verification failed")]
    VerificationFailed,

    /// RSA key-pair generation failed.
    #[error("key pair generation failed: {reason}")]
    KeyPairGeneration {
        /// Underlying RSA error.
        reason: String,
    },

    /// No key pair exists under the given id.
    #[error("key pair not found: {key_id}")]
    KeyPairNotFound {
        /// The missing key id.
        key_id: String,
    },

    /// An imported public key was not valid DER.
    #[error("public key import failed: {reason}")]
    InvalidPublicKey {
        /// Underlying parse error.
        reason: String,
    },

    /// OAEP wrap of a session key failed.
    #[error("session key wrap failed: {reason}")]
    WrapFailed {
        /// Underlying RSA error.
        reason: String,
    },

    /// OAEP unwrap failed: wrong private key or corrupted payload.
    #[error("session key unwrap failed: {reason}")]
    UnwrapFailed {
        /// Underlying RSA error.
        reason: String,
    },
}
