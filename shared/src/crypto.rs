//! Signing primitive behind the chat protocol.
//!
//! The protocol only needs an opaque `sign`/`verify` pair. Ed25519 from
//! `ed25519-dalek` backs both; nothing outside this module depends on it.

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::signature::MessageSignature;

/// Produces signatures over canonical payload bytes.
pub trait Signer {
    fn sign(&self, payload: &[u8]) -> MessageSignature;
}

/// Checks signatures over canonical payload bytes.
pub trait SignatureValidator {
    fn validate(&self, payload: &[u8], signature: &MessageSignature) -> bool;
}

/// Ed25519 public key used to verify chat signatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatPublicKey([u8; 32]);

impl ChatPublicKey {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl SignatureValidator for ChatPublicKey {
    fn validate(&self, payload: &[u8], signature: &MessageSignature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        key.verify_strict(payload, &signature).is_ok()
    }
}

/// Ed25519 signing key pair. The private half is zeroized on drop by
/// `ed25519-dalek`.
#[derive(Clone)]
pub struct ChatKeyPair {
    signing_key: SigningKey,
}

impl ChatKeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuilds a key pair from its 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> ChatPublicKey {
        ChatPublicKey(self.signing_key.verifying_key().to_bytes())
    }
}

impl Signer for ChatKeyPair {
    fn sign(&self, payload: &[u8]) -> MessageSignature {
        MessageSignature::from_bytes(self.signing_key.sign(payload).to_bytes())
    }
}

impl std::fmt::Debug for ChatKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}
