//! Client-side validation of relayed chat, one validator per sender.

use std::time::Duration;

use log::{error, warn};

use crate::error::{ChatError, Result};
use crate::message::PlayerChatMessage;
use crate::session::ProfilePublicKey;
use crate::epoch_seconds;

/// Trust state of a signed chain. `Poisoned` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Valid,
    Poisoned,
}

/// Validation policy for one remote sender.
#[derive(Debug, Clone)]
pub enum ChainValidator {
    /// The sender has a verified chat key.
    KeyBased(KeyBasedValidator),
    /// The sender has no key and the server allows unsigned chat.
    AcceptUnsigned,
    /// The sender has no key but signed chat is mandatory.
    RejectAll,
}

impl ChainValidator {
    pub fn key_based(key: ProfilePublicKey, grace_period: Duration) -> Self {
        ChainValidator::KeyBased(KeyBasedValidator::new(key, grace_period))
    }

    pub fn update_and_validate(&mut self, message: PlayerChatMessage) -> Result<PlayerChatMessage> {
        match self {
            ChainValidator::KeyBased(validator) => validator.update_and_validate(message),
            ChainValidator::AcceptUnsigned => Ok(message.remove_signature()),
            ChainValidator::RejectAll => {
                error!(
                    "Rejecting unsigned chat from {}: secure chat is enforced",
                    message.sender()
                );
                Err(ChatError::SignatureRequired {
                    sender: message.sender(),
                })
            }
        }
    }

    pub fn is_chain_valid(&self) -> bool {
        match self {
            ChainValidator::KeyBased(validator) => validator.state == ChainState::Valid,
            ChainValidator::AcceptUnsigned => true,
            ChainValidator::RejectAll => false,
        }
    }
}

/// Checks signatures and chain continuity against a sender's public key.
#[derive(Debug, Clone)]
pub struct KeyBasedValidator {
    key: ProfilePublicKey,
    grace_period: Duration,
    last_accepted: Option<PlayerChatMessage>,
    state: ChainState,
}

impl KeyBasedValidator {
    pub fn new(key: ProfilePublicKey, grace_period: Duration) -> Self {
        Self {
            key,
            grace_period,
            last_accepted: None,
            state: ChainState::Valid,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn update_and_validate(&mut self, message: PlayerChatMessage) -> Result<PlayerChatMessage> {
        if self.state == ChainState::Poisoned {
            return Err(ChatError::ChainBroken);
        }

        if let Err(err) = self.validate(&message) {
            warn!(
                "Chat chain of {} broken at index {}: {}",
                message.sender(),
                message.link.index(),
                err
            );
            self.state = ChainState::Poisoned;
            return Err(err);
        }

        self.last_accepted = Some(message.clone());
        Ok(message)
    }

    fn validate(&self, message: &PlayerChatMessage) -> Result<()> {
        if self.last_accepted.as_ref() == Some(message) {
            return Ok(());
        }
        if self
            .key
            .has_expired_with_grace(self.grace_period, epoch_seconds())
        {
            return Err(ChatError::KeyExpired);
        }
        if !message.verify(self.key.key()) {
            return Err(ChatError::SignatureInvalid);
        }
        if let Some(last) = &self.last_accepted {
            if !message.link.is_descendant_of(&last.link) {
                return Err(ChatError::OutOfOrder);
            }
        }
        Ok(())
    }
}
