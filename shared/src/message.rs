use std::time::Duration;

use uuid::Uuid;

use crate::body::SignedMessageBody;
use crate::codec::PacketWriter;
use crate::crypto::{SignatureValidator, Signer};
use crate::link::MessageLink;
use crate::signature::MessageSignature;

/// Version tag prefixed to every signed payload.
const SIGNATURE_VERSION: i32 = 1;

/// How long the server treats a message as fresh.
pub const MESSAGE_EXPIRES_AFTER_SERVER: Duration = Duration::from_secs(5 * 60);

/// Builds the exact bytes a message signature covers.
pub fn signed_payload(link: &MessageLink, body: &SignedMessageBody) -> Vec<u8> {
    let mut writer = PacketWriter::new();
    writer.write_i32(SIGNATURE_VERSION);
    link.update_signature(&mut writer);
    body.update_signature(&mut writer);
    writer.into_bytes()
}

pub fn sign_message(
    signer: &dyn Signer,
    link: &MessageLink,
    body: &SignedMessageBody,
) -> MessageSignature {
    signer.sign(&signed_payload(link, body))
}

/// A chat message as it travels through the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerChatMessage {
    pub link: MessageLink,
    pub signature: Option<MessageSignature>,
    pub body: SignedMessageBody,
    /// Server-side replacement text shown instead of the signed content.
    pub unsigned_content: Option<String>,
}

impl PlayerChatMessage {
    pub fn new(link: MessageLink, signature: Option<MessageSignature>, body: SignedMessageBody) -> Self {
        Self {
            link,
            signature,
            body,
            unsigned_content: None,
        }
    }

    pub fn unsigned(sender: Uuid, content: String) -> Self {
        Self::new(
            MessageLink::unsigned(sender),
            None,
            SignedMessageBody::unsigned(content),
        )
    }

    pub fn sender(&self) -> Uuid {
        self.link.sender()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn with_unsigned_content(mut self, content: String) -> Self {
        self.unsigned_content = Some(content);
        self
    }

    pub fn remove_unsigned_content(mut self) -> Self {
        self.unsigned_content = None;
        self
    }

    /// Strips the signature; the message keeps its sender but is no longer
    /// authenticated.
    pub fn remove_signature(self) -> Self {
        let mut message = Self::unsigned(self.sender(), self.body.content);
        message.unsigned_content = self.unsigned_content;
        message
    }

    /// Text to display: the server's replacement if present, else the
    /// signed content.
    pub fn decorated_content(&self) -> &str {
        self.unsigned_content.as_deref().unwrap_or(&self.body.content)
    }

    pub fn verify(&self, validator: &dyn SignatureValidator) -> bool {
        match &self.signature {
            Some(signature) => signature.verify(validator, &signed_payload(&self.link, &self.body)),
            None => false,
        }
    }

    /// True once the message is older than `MESSAGE_EXPIRES_AFTER_SERVER`.
    pub fn has_expired_server(&self, now_secs: u64) -> bool {
        now_secs > self.body.timestamp.saturating_add(MESSAGE_EXPIRES_AFTER_SERVER.as_secs())
    }
}
