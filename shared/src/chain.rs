//! Per-sender message chains.
//!
//! The encoder signs each outgoing body under the next link of the sender's
//! chain. The decoder on the server mirrors that link, so the client never
//! sends its index and cannot skip or rewind.

use log::warn;
use uuid::Uuid;

use crate::body::SignedMessageBody;
use crate::crypto::ChatKeyPair;
use crate::epoch_seconds;
use crate::error::{ChatError, Result};
use crate::link::MessageLink;
use crate::message::{sign_message, PlayerChatMessage};
use crate::session::ProfilePublicKey;
use crate::signature::MessageSignature;
use crate::validator::ChainState;

#[derive(Debug, Clone)]
pub struct SignedMessageChain {
    next_link: Option<MessageLink>,
    last_timestamp: u64,
}

impl SignedMessageChain {
    pub fn new(sender: Uuid, session_id: Uuid) -> Self {
        Self {
            next_link: Some(MessageLink::root(sender, session_id)),
            last_timestamp: 0,
        }
    }

    pub fn encoder(self, signer: ChatKeyPair) -> MessageEncoder {
        MessageEncoder {
            chain: self,
            signer,
        }
    }

    pub fn decoder(self, key: ProfilePublicKey) -> MessageDecoder {
        MessageDecoder::Signed(SignedDecoder {
            chain: self,
            key,
            state: ChainState::Valid,
        })
    }

    fn take_link(&self) -> Result<MessageLink> {
        self.next_link.ok_or(ChatError::ChainExhausted {
            index: MessageLink::MAX_INDEX,
        })
    }

    fn advance(&mut self, link: &MessageLink) {
        self.next_link = link.advance().ok();
    }
}

/// Signs outgoing messages for a local session.
#[derive(Debug, Clone)]
pub struct MessageEncoder {
    chain: SignedMessageChain,
    signer: ChatKeyPair,
}

impl MessageEncoder {
    /// Signs `body` under the next link. Once the chain is exhausted every
    /// call fails and a new session is needed.
    pub fn pack(&mut self, body: &SignedMessageBody) -> Result<MessageSignature> {
        let link = self.chain.take_link()?;
        let signature = sign_message(&self.signer, &link, body);
        self.chain.advance(&link);
        Ok(signature)
    }

    pub fn next_link(&self) -> Option<MessageLink> {
        self.chain.next_link
    }
}

/// Rebuilds and verifies incoming messages on the server.
#[derive(Debug, Clone)]
pub enum MessageDecoder {
    Signed(SignedDecoder),
    /// The sender has no chat session.
    Unsigned {
        sender: Uuid,
        enforce_secure_chat: bool,
    },
}

impl MessageDecoder {
    pub fn unsigned(sender: Uuid, enforce_secure_chat: bool) -> Self {
        MessageDecoder::Unsigned {
            sender,
            enforce_secure_chat,
        }
    }

    pub fn unpack(
        &mut self,
        signature: Option<MessageSignature>,
        body: SignedMessageBody,
    ) -> Result<PlayerChatMessage> {
        match self {
            MessageDecoder::Signed(decoder) => decoder.unpack(signature, body),
            MessageDecoder::Unsigned {
                sender,
                enforce_secure_chat,
            } => {
                if *enforce_secure_chat {
                    return Err(ChatError::MissingSignature);
                }
                Ok(PlayerChatMessage::unsigned(*sender, body.content))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignedDecoder {
    chain: SignedMessageChain,
    key: ProfilePublicKey,
    state: ChainState,
}

impl SignedDecoder {
    pub fn state(&self) -> ChainState {
        self.state
    }

    fn unpack(
        &mut self,
        signature: Option<MessageSignature>,
        body: SignedMessageBody,
    ) -> Result<PlayerChatMessage> {
        let signature = signature.ok_or(ChatError::MissingSignature)?;
        let now = epoch_seconds();
        if self.key.has_expired(now) {
            return Err(ChatError::KeyExpired);
        }
        if self.state == ChainState::Poisoned {
            return Err(ChatError::ChainBroken);
        }

        let link = self.chain.take_link()?;
        if body.timestamp < self.chain.last_timestamp {
            self.state = ChainState::Poisoned;
            return Err(ChatError::OutOfOrder);
        }
        self.chain.last_timestamp = body.timestamp;

        let message = PlayerChatMessage::new(link, Some(signature), body);
        if !message.verify(self.key.key()) {
            self.state = ChainState::Poisoned;
            return Err(ChatError::SignatureInvalid);
        }
        if message.has_expired_server(now) {
            warn!(
                "Received expired chat from {}: is the client clock out of sync?",
                message.sender()
            );
        }

        self.chain.advance(&link);
        Ok(message)
    }
}
