//! Signable message payloads and their cache-compressed wire forms.

use crate::cache::MessageSignatureCache;
use crate::codec::{CodecError, CodecResult, PacketReader, PacketWriter};
use crate::error::{ChatError, Result};
use crate::signature::{MessageSignature, PackedSignature};
use crate::{epoch_seconds, LAST_SEEN_WINDOW_SIZE, MAX_CONTENT_LENGTH};

/// Rejects content the protocol refuses to sign or relay.
pub fn validate_content(content: &str) -> Result<()> {
    let length = crate::codec::code_units(content);
    if length > MAX_CONTENT_LENGTH {
        return Err(ChatError::IllegalContent {
            reason: format!("{length} characters exceeds {MAX_CONTENT_LENGTH}"),
        });
    }
    if let Some(bad) = content.chars().find(|c| !is_allowed_chat_character(*c)) {
        return Err(ChatError::IllegalContent {
            reason: format!("character U+{:04X} is not allowed", bad as u32),
        });
    }
    Ok(())
}

fn is_allowed_chat_character(c: char) -> bool {
    c != '\u{a7}' && c >= ' ' && c != '\u{7f}'
}

/// Ordered signatures of the messages a sender had seen when signing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LastSeenMessages(Vec<MessageSignature>);

impl LastSeenMessages {
    pub fn new(entries: Vec<MessageSignature>) -> Self {
        Self(entries)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[MessageSignature] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn update_signature(&self, writer: &mut PacketWriter) {
        writer.write_i32(self.0.len() as i32);
        for signature in &self.0 {
            signature.write(writer);
        }
    }

    pub fn pack(&self, cache: &MessageSignatureCache) -> PackedLastSeenMessages {
        PackedLastSeenMessages(self.0.iter().map(|s| s.pack(cache)).collect())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackedLastSeenMessages(Vec<PackedSignature>);

impl PackedLastSeenMessages {
    pub fn entries(&self) -> &[PackedSignature] {
        &self.0
    }

    /// Resolves every entry against the cache; any dangling slot fails the
    /// whole list.
    pub fn unpack(&self, cache: &MessageSignatureCache) -> Result<LastSeenMessages> {
        let mut entries = Vec::with_capacity(self.0.len());
        for packed in &self.0 {
            let signature = match packed {
                PackedSignature::Full(signature) => *signature,
                PackedSignature::Cached(slot) => cache
                    .unpack(*slot)
                    .ok_or(ChatError::UnknownCacheReference { slot: *slot })?,
            };
            entries.push(signature);
        }
        Ok(LastSeenMessages(entries))
    }

    pub fn write(&self, writer: &mut PacketWriter) {
        writer.write_var_int(self.0.len() as u32);
        for entry in &self.0 {
            entry.write(writer);
        }
    }

    pub fn read(reader: &mut PacketReader<'_>) -> CodecResult<Self> {
        let count = reader.read_var_int()? as usize;
        if count > LAST_SEEN_WINDOW_SIZE {
            return Err(CodecError::TooManyEntries {
                count,
                max: LAST_SEEN_WINDOW_SIZE,
            });
        }
        let entries = (0..count)
            .map(|_| PackedSignature::read(reader))
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Self(entries))
    }
}

/// The signed part of a chat message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedMessageBody {
    pub content: String,
    /// Whole seconds since the Unix epoch.
    pub timestamp: u64,
    pub salt: i64,
    pub last_seen: LastSeenMessages,
}

impl SignedMessageBody {
    pub fn new(content: String, timestamp: u64, salt: i64, last_seen: LastSeenMessages) -> Self {
        Self {
            content,
            timestamp,
            salt,
            last_seen,
        }
    }

    pub fn unsigned(content: String) -> Self {
        Self::new(content, epoch_seconds(), 0, LastSeenMessages::empty())
    }

    /// Canonical bytes: salt, timestamp, content length, content, last seen.
    pub(crate) fn update_signature(&self, writer: &mut PacketWriter) {
        writer.write_i64(self.salt);
        writer.write_i64(self.timestamp as i64);
        writer.write_i32(self.content.len() as i32);
        writer.write_bytes(self.content.as_bytes());
        self.last_seen.update_signature(writer);
    }

    pub fn pack(&self, cache: &MessageSignatureCache) -> PackedMessageBody {
        PackedMessageBody {
            content: self.content.clone(),
            timestamp: self.timestamp,
            salt: self.salt,
            last_seen: self.last_seen.pack(cache),
        }
    }
}

/// A body as relayed by the server, with last-seen entries compressed
/// against the recipient's cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedMessageBody {
    pub content: String,
    pub timestamp: u64,
    pub salt: i64,
    pub last_seen: PackedLastSeenMessages,
}

impl PackedMessageBody {
    pub fn unpack(&self, cache: &MessageSignatureCache) -> Result<SignedMessageBody> {
        Ok(SignedMessageBody {
            content: self.content.clone(),
            timestamp: self.timestamp,
            salt: self.salt,
            last_seen: self.last_seen.unpack(cache)?,
        })
    }

    pub fn write(&self, writer: &mut PacketWriter) -> CodecResult<()> {
        writer.write_string(&self.content, MAX_CONTENT_LENGTH)?;
        writer.write_i64(self.timestamp as i64);
        writer.write_i64(self.salt);
        self.last_seen.write(writer);
        Ok(())
    }

    pub fn read(reader: &mut PacketReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            content: reader.read_string(MAX_CONTENT_LENGTH)?,
            timestamp: read_timestamp(reader)?,
            salt: reader.read_i64()?,
            last_seen: PackedLastSeenMessages::read(reader)?,
        })
    }
}

pub(crate) fn read_timestamp(reader: &mut PacketReader<'_>) -> CodecResult<u64> {
    let value = reader.read_i64()?;
    u64::try_from(value).map_err(|_| CodecError::OutOfRange { value })
}
