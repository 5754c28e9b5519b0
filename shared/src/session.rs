//! Chat sessions and the keys that back them.
//!
//! A [`LocalChatSession`] owns a signing key and produces signed messages. Its
//! public half travels to the server as [`RemoteChatSessionData`], which only
//! becomes a trusted [`RemoteChatSession`] once an [`IdentityService`] has
//! confirmed the key belongs to the claimed player.

use std::time::Duration;

use uuid::Uuid;

use crate::chain::{MessageDecoder, MessageEncoder, SignedMessageChain};
use crate::codec::{CodecResult, PacketReader, PacketWriter};
use crate::crypto::{ChatKeyPair, ChatPublicKey, SignatureValidator, Signer};
use crate::error::{ChatError, Result};
use crate::signature::MessageSignature;
use crate::validator::ChainValidator;

/// How long clients keep trusting an expired key they already accepted.
pub const EXPIRY_GRACE_PERIOD: Duration = Duration::from_secs(8 * 60 * 60);

/// A chat public key as certified by the identity authority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfilePublicKeyData {
    /// Whole seconds since the Unix epoch.
    pub expires_at: u64,
    pub key: ChatPublicKey,
    /// Authority signature over [`ProfilePublicKeyData::signed_payload`].
    pub key_signature: MessageSignature,
}

impl ProfilePublicKeyData {
    /// Bytes the authority signs: profile id, expiry, then the key.
    pub fn signed_payload(profile_id: Uuid, expires_at: u64, key: &ChatPublicKey) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_uuid(&profile_id);
        writer.write_i64(expires_at as i64);
        writer.write_bytes(key.as_bytes());
        writer.into_bytes()
    }

    pub fn has_expired(&self, now_secs: u64) -> bool {
        now_secs > self.expires_at
    }

    pub fn has_expired_with_grace(&self, grace_period: Duration, now_secs: u64) -> bool {
        now_secs > self.expires_at.saturating_add(grace_period.as_secs())
    }

    pub fn write(&self, writer: &mut PacketWriter) {
        writer.write_i64(self.expires_at as i64);
        writer.write_bytes(self.key.as_bytes());
        self.key_signature.write(writer);
    }

    pub fn read(reader: &mut PacketReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            expires_at: crate::body::read_timestamp(reader)?,
            key: ChatPublicKey::from_bytes(reader.read_array()?),
            key_signature: MessageSignature::read(reader)?,
        })
    }
}

/// A public key that passed identity validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfilePublicKey {
    data: ProfilePublicKeyData,
}

impl ProfilePublicKey {
    pub(crate) fn trusted(data: ProfilePublicKeyData) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &ProfilePublicKeyData {
        &self.data
    }

    pub fn key(&self) -> &ChatPublicKey {
        &self.data.key
    }

    pub fn has_expired(&self, now_secs: u64) -> bool {
        self.data.has_expired(now_secs)
    }

    pub fn has_expired_with_grace(&self, grace_period: Duration, now_secs: u64) -> bool {
        self.data.has_expired_with_grace(grace_period, now_secs)
    }
}

/// External check that a key really belongs to a player.
pub trait IdentityService {
    fn validate_public_key(
        &self,
        profile_id: Uuid,
        data: &ProfilePublicKeyData,
    ) -> Result<ProfilePublicKey>;
}

/// Identity service trusting keys certified by a single authority key.
#[derive(Clone, Debug)]
pub struct AuthorityKeyService {
    authority: ChatPublicKey,
}

impl AuthorityKeyService {
    pub fn new(authority: ChatPublicKey) -> Self {
        Self { authority }
    }
}

impl IdentityService for AuthorityKeyService {
    fn validate_public_key(
        &self,
        profile_id: Uuid,
        data: &ProfilePublicKeyData,
    ) -> Result<ProfilePublicKey> {
        let payload = ProfilePublicKeyData::signed_payload(profile_id, data.expires_at, &data.key);
        if !self.authority.validate(&payload, &data.key_signature) {
            return Err(ChatError::KeyValidation {
                reason: format!("key is not certified for profile {profile_id}"),
            });
        }
        if data.has_expired(crate::epoch_seconds()) {
            return Err(ChatError::KeyValidation {
                reason: "key has expired".to_string(),
            });
        }
        Ok(ProfilePublicKey::trusted(data.clone()))
    }
}

/// Certifies player chat keys. Stands in for the external identity provider
/// in development setups and tests.
#[derive(Debug, Clone)]
pub struct KeyAuthority {
    keys: ChatKeyPair,
}

impl KeyAuthority {
    pub fn generate() -> Self {
        Self {
            keys: ChatKeyPair::generate(),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            keys: ChatKeyPair::from_seed(seed),
        }
    }

    pub fn public_key(&self) -> ChatPublicKey {
        self.keys.public_key()
    }

    pub fn service(&self) -> AuthorityKeyService {
        AuthorityKeyService::new(self.public_key())
    }

    pub fn issue(&self, profile_id: Uuid, key: &ChatPublicKey, expires_at: u64) -> ProfilePublicKeyData {
        let payload = ProfilePublicKeyData::signed_payload(profile_id, expires_at, key);
        ProfilePublicKeyData {
            expires_at,
            key: *key,
            key_signature: self.keys.sign(&payload),
        }
    }
}

/// The signing side of a chat session.
#[derive(Debug, Clone)]
pub struct LocalChatSession {
    session_id: Uuid,
    key_pair: ChatKeyPair,
    public_key: ProfilePublicKeyData,
}

impl LocalChatSession {
    /// Starts a session with a fresh random id.
    pub fn create(key_pair: ChatKeyPair, public_key: ProfilePublicKeyData) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            key_pair,
            public_key,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn as_remote_data(&self) -> RemoteChatSessionData {
        RemoteChatSessionData {
            session_id: self.session_id,
            profile_public_key: self.public_key.clone(),
        }
    }

    pub fn create_message_encoder(&self, sender: Uuid) -> MessageEncoder {
        SignedMessageChain::new(sender, self.session_id).encoder(self.key_pair.clone())
    }
}

/// A session announced by a peer, not yet validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteChatSessionData {
    pub session_id: Uuid,
    pub profile_public_key: ProfilePublicKeyData,
}

impl RemoteChatSessionData {
    pub fn validate(
        &self,
        profile_id: Uuid,
        identity: &dyn IdentityService,
    ) -> Result<RemoteChatSession> {
        let profile_public_key = identity.validate_public_key(profile_id, &self.profile_public_key)?;
        Ok(RemoteChatSession {
            session_id: self.session_id,
            profile_public_key,
        })
    }

    pub fn write(&self, writer: &mut PacketWriter) {
        writer.write_uuid(&self.session_id);
        self.profile_public_key.write(writer);
    }

    pub fn read(reader: &mut PacketReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            session_id: reader.read_uuid()?,
            profile_public_key: ProfilePublicKeyData::read(reader)?,
        })
    }
}

/// A peer's session whose key has been validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteChatSession {
    session_id: Uuid,
    profile_public_key: ProfilePublicKey,
}

impl RemoteChatSession {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn profile_public_key(&self) -> &ProfilePublicKey {
        &self.profile_public_key
    }

    pub fn has_expired(&self, now_secs: u64) -> bool {
        self.profile_public_key.has_expired(now_secs)
    }

    pub fn as_data(&self) -> RemoteChatSessionData {
        RemoteChatSessionData {
            session_id: self.session_id,
            profile_public_key: self.profile_public_key.data().clone(),
        }
    }

    pub fn create_message_validator(&self, grace_period: Duration) -> ChainValidator {
        ChainValidator::key_based(self.profile_public_key.clone(), grace_period)
    }

    pub fn create_message_decoder(&self, sender: Uuid) -> MessageDecoder {
        SignedMessageChain::new(sender, self.session_id).decoder(self.profile_public_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch_seconds;

    fn issued(authority: &KeyAuthority, profile: Uuid, expires_at: u64) -> (ChatKeyPair, ProfilePublicKeyData) {
        let keys = ChatKeyPair::generate();
        let data = authority.issue(profile, &keys.public_key(), expires_at);
        (keys, data)
    }

    #[test]
    fn test_certified_key_validates() {
        let authority = KeyAuthority::generate();
        let profile = Uuid::new_v4();
        let (keys, data) = issued(&authority, profile, epoch_seconds() + 60);

        let local = LocalChatSession::create(keys, data);
        let remote = local
            .as_remote_data()
            .validate(profile, &authority.service())
            .unwrap();

        assert_eq!(remote.session_id(), local.session_id());
        assert_eq!(remote.as_data(), local.as_remote_data());
    }

    #[test]
    fn test_key_bound_to_profile() {
        let authority = KeyAuthority::generate();
        let (_, data) = issued(&authority, Uuid::new_v4(), epoch_seconds() + 60);

        let result = authority.service().validate_public_key(Uuid::new_v4(), &data);
        assert!(matches!(result, Err(ChatError::KeyValidation { .. })));
    }

    #[test]
    fn test_foreign_authority_rejected() {
        let authority = KeyAuthority::generate();
        let impostor = KeyAuthority::generate();
        let profile = Uuid::new_v4();
        let (_, data) = issued(&impostor, profile, epoch_seconds() + 60);

        let result = authority.service().validate_public_key(profile, &data);
        assert!(matches!(result, Err(ChatError::KeyValidation { .. })));
    }

    #[test]
    fn test_expired_key_rejected() {
        let authority = KeyAuthority::generate();
        let profile = Uuid::new_v4();
        let (_, data) = issued(&authority, profile, epoch_seconds() - 1);

        let result = authority.service().validate_public_key(profile, &data);
        assert!(matches!(result, Err(ChatError::KeyValidation { .. })));
    }

    #[test]
    fn test_expiry_with_grace() {
        let data = ProfilePublicKeyData {
            expires_at: 1_000,
            key: ChatKeyPair::generate().public_key(),
            key_signature: MessageSignature::from_bytes([0; 64]),
        };
        assert!(!data.has_expired(1_000));
        assert!(data.has_expired(1_001));
        assert!(!data.has_expired_with_grace(Duration::from_secs(10), 1_010));
        assert!(data.has_expired_with_grace(Duration::from_secs(10), 1_011));
    }

    #[test]
    fn test_fresh_sessions_have_distinct_ids() {
        let authority = KeyAuthority::generate();
        let profile = Uuid::new_v4();
        let (keys, data) = issued(&authority, profile, epoch_seconds() + 60);

        let a = LocalChatSession::create(keys.clone(), data.clone());
        let b = LocalChatSession::create(keys, data);
        assert_ne!(a.session_id(), b.session_id());
    }
}
