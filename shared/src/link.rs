use uuid::Uuid;

use crate::codec::PacketWriter;
use crate::error::{ChatError, Result};

/// Position of a message within one sender's chain for one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageLink {
    index: u32,
    sender: Uuid,
    session_id: Uuid,
}

impl MessageLink {
    /// Highest index a chain can reach.
    pub const MAX_INDEX: u32 = i32::MAX as u32;

    pub fn root(sender: Uuid, session_id: Uuid) -> Self {
        Self::new(0, sender, session_id)
    }

    /// Unsigned links carry no session; they never descend from anything
    /// signed.
    pub fn unsigned(sender: Uuid) -> Self {
        Self::root(sender, Uuid::nil())
    }

    pub fn new(index: u32, sender: Uuid, session_id: Uuid) -> Self {
        Self {
            index,
            sender,
            session_id,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn sender(&self) -> Uuid {
        self.sender
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_descendant_of(&self, other: &MessageLink) -> bool {
        self.index > other.index
            && self.sender == other.sender
            && self.session_id == other.session_id
    }

    pub fn advance(&self) -> Result<MessageLink> {
        if self.index >= Self::MAX_INDEX {
            return Err(ChatError::ChainExhausted { index: self.index });
        }
        Ok(Self {
            index: self.index + 1,
            ..*self
        })
    }

    pub(crate) fn update_signature(&self, writer: &mut PacketWriter) {
        writer.write_uuid(&self.sender);
        writer.write_uuid(&self.session_id);
        writer.write_i32(self.index as i32);
    }
}
