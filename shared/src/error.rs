//! Error taxonomy for the signed chat protocol.
//!
//! Every failure is surfaced as a value. Callers reject the single offending
//! message or update; only the server decides whether a failure is severe
//! enough to drop the connection.

use thiserror::Error;

use crate::codec::CodecError;

/// Errors produced while signing, decoding or validating chat.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The link index reached `i32::MAX`; a new session must be started.
    #[error("message chain exhausted at index {index}")]
    ChainExhausted { index: u32 },

    /// The signature does not verify against the sender's public key.
    #[error("invalid message signature")]
    SignatureInvalid,

    /// The sender's profile public key has expired.
    #[error("profile public key has expired")]
    KeyExpired,

    /// The message is not a descendant of the last accepted one, or its
    /// timestamp went backwards.
    #[error("out-of-order chat message")]
    OutOfOrder,

    /// The chain failed validation earlier and is permanently untrusted.
    #[error("message chain is broken")]
    ChainBroken,

    /// An acknowledgement offset or bitset does not fit the tracked window.
    #[error("last-seen window overflow: {reason}")]
    WindowOverflow { reason: String },

    /// A packed signature refers to a cache slot with no signature in it.
    #[error("unknown signature cache reference {slot}")]
    UnknownCacheReference { slot: usize },

    /// A signed chain received a message without a signature.
    #[error("missing message signature")]
    MissingSignature,

    /// The remote side has no chat session and signed chat is mandatory.
    #[error("unsigned chat rejected from {sender}")]
    SignatureRequired { sender: uuid::Uuid },

    /// The identity service refused the presented public key.
    #[error("profile key validation failed: {reason}")]
    KeyValidation { reason: String },

    /// Chat content is too long or contains forbidden characters.
    #[error("illegal chat content: {reason}")]
    IllegalContent { reason: String },

    /// The peer never acknowledges what it has been sent.
    #[error("too many pending messages ({count})")]
    TooManyPending { count: usize },

    #[error("wire error: {0}")]
    Codec(#[from] CodecError),
}

impl ChatError {
    /// Returns true for failures that permanently break a signed chain.
    pub fn breaks_chain(&self) -> bool {
        matches!(
            self,
            ChatError::SignatureInvalid
                | ChatError::KeyExpired
                | ChatError::OutOfOrder
                | ChatError::ChainBroken
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
