//! Encrypted content envelope.
//!
//! The envelope is the wire-level carrier for message content: either real
//! AES-GCM ciphertext with its metadata, or a base64 pass-through when
//! encryption is disabled for the session. Envelopes are transient - the
//! receiver decodes one and keeps only the resulting plaintext in the
//! message log.

use serde::{Deserialize, Serialize};

use crate::message::{MessageType, Timestamp};

/// Envelope format version tag carried in the metadata.
pub const ENVELOPE_VERSION: u8 = 1;

/// Content algorithm of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Plaintext pass-through (reversibly encoded, not encrypted). Decodes
    /// without any key lookup.
    #[serde(rename = "none")]
    None,
    /// AES-256-GCM with a per-session key.
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

/// Metadata needed to reverse an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    /// Identifies the session key used; empty for pass-through envelopes.
    pub key_id: String,
    /// Content algorithm.
    pub algorithm: Algorithm,
    /// Hex-encoded 96-bit IV; empty for pass-through envelopes.
    pub iv: String,
    /// Hex-encoded 128-bit authentication tag; empty for pass-through.
    pub auth_tag: String,
    /// Envelope creation time.
    pub timestamp: Timestamp,
    /// Format version, [`ENVELOPE_VERSION`].
    pub version: u8,
}

/// Wire-level content envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    /// Base64 of the ciphertext (or of the plaintext for pass-through).
    pub encrypted_content: String,
    /// Decode metadata.
    pub metadata: EnvelopeMetadata,
    /// Content kind of the wrapped message.
    pub message_type: MessageType,
    /// Plaintext length in bytes, for display placeholders and sanity checks.
    pub original_length: usize,
}

impl EncryptedEnvelope {
    /// True when this envelope carries pass-through content that decodes
    /// without a key lookup.
    pub fn is_passthrough(&self) -> bool {
        self.metadata.algorithm == Algorithm::None
    }
}
