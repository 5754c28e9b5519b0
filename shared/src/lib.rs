//! # Signed chat protocol
//!
//! Shared between the server and the client. Lets the server relay player
//! chat while every client can check that a message really came from its
//! sender, that one sender's messages arrive in order, and that the server has
//! not quietly hidden anything the sender had already seen.
//!
//! ## Module Organization
//!
//! - `signature`, `link`, `body`, `message`: what gets signed and how
//! - `cache`: per-connection signature cache for wire compression
//! - `last_seen`: the acknowledgement window (tracker and validator)
//! - `chain`: per-session encoder and server-side decoder
//! - `validator`: client-side chain validation policies
//! - `session`: local/remote chat sessions and key validation
//! - `codec`, `packets`: bit-exact chat payloads
//!
//! Transport framing is the serde [`Packet`] envelope, serialized with
//! `bincode`; chat payloads ride inside it as opaque bytes.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod body;
pub mod cache;
pub mod chain;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod last_seen;
pub mod link;
pub mod message;
pub mod packets;
pub mod session;
pub mod signature;
pub mod validator;

pub use body::{LastSeenMessages, SignedMessageBody};
pub use cache::MessageSignatureCache;
pub use chain::{MessageDecoder, MessageEncoder};
pub use crypto::{ChatKeyPair, ChatPublicKey};
pub use error::ChatError;
pub use last_seen::{LastSeenMessagesTracker, LastSeenMessagesValidator, LastSeenUpdate};
pub use link::MessageLink;
pub use message::PlayerChatMessage;
pub use packets::ChatPacket;
pub use session::{LocalChatSession, RemoteChatSession, RemoteChatSessionData};
pub use signature::MessageSignature;
pub use validator::ChainValidator;

pub const PROTOCOL_VERSION: u32 = 1;

/// Most characters a chat message may contain.
pub const MAX_CONTENT_LENGTH: usize = 256;
/// Positions in the last-seen acknowledgement window.
pub const LAST_SEEN_WINDOW_SIZE: usize = 20;
/// Unacknowledged messages the server tolerates before dropping a client.
pub const MAX_TRACKED_MESSAGES: usize = 4096;
/// Tracker offset at which a client acknowledges without sending chat.
pub const ACK_OFFSET_THRESHOLD: u32 = 64;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
        profile_id: uuid::Uuid,
        name: String,
    },
    /// Encoded [`ChatPacket`], either direction.
    Chat {
        payload: Vec<u8>,
    },
    Heartbeat,
    Disconnect,

    Connected {
        client_id: u32,
        enforces_secure_chat: bool,
    },
    Disconnected {
        reason: String,
    },
}

impl Packet {
    pub fn chat(packet: &ChatPacket) -> Result<Self, codec::CodecError> {
        Ok(Packet::Chat {
            payload: packet.encode()?,
        })
    }
}

/// Current time in whole seconds since the Unix epoch.
pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_packet_serialization_connect() {
        let profile_id = uuid::Uuid::new_v4();
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            profile_id,
            name: "alex".to_string(),
        };
        let serialized = assert_ok!(bincode::serialize(&packet));
        let deserialized: Packet = assert_ok!(bincode::deserialize(&serialized));

        match deserialized {
            Packet::Connect {
                client_version,
                profile_id: id,
                name,
            } => {
                assert_eq!(client_version, PROTOCOL_VERSION);
                assert_eq!(id, profile_id);
                assert_eq!(name, "alex");
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_carries_chat_payload() {
        let chat = ChatPacket::SystemChat {
            content: "welcome".to_string(),
        };
        let packet = assert_ok!(Packet::chat(&chat));
        let serialized = assert_ok!(bincode::serialize(&packet));
        let deserialized: Packet = assert_ok!(bincode::deserialize(&serialized));

        match deserialized {
            Packet::Chat { payload } => {
                assert_eq!(assert_ok!(ChatPacket::decode(&payload)), chat);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_oversized_chat_is_not_encoded() {
        let chat = ChatPacket::SystemChat {
            content: "x".repeat(packets::MAX_SYSTEM_MESSAGE_LENGTH + 1),
        };
        assert_err!(Packet::chat(&chat));
    }

    #[test]
    fn test_epoch_seconds_is_recent() {
        // 2023-01-01T00:00:00Z
        assert!(epoch_seconds() > 1_672_531_200);
    }
}
