//! Chat payloads carried inside [`crate::Packet::Chat`].
//!
//! Each payload starts with a varint packet id followed by the fields in the
//! order they are declared here.

use uuid::Uuid;

use crate::body::{read_timestamp, PackedMessageBody};
use crate::codec::{CodecError, CodecResult, PacketReader, PacketWriter};
use crate::last_seen::LastSeenUpdate;
use crate::link::MessageLink;
use crate::session::RemoteChatSessionData;
use crate::signature::MessageSignature;
use crate::MAX_CONTENT_LENGTH;

pub const MAX_NAME_LENGTH: usize = 16;
pub const MAX_SYSTEM_MESSAGE_LENGTH: usize = 4096;

const SESSION_UPDATE: u32 = 0;
const CHAT: u32 = 1;
const CHAT_ACK: u32 = 2;
const PLAYER_CHAT: u32 = 3;
const PLAYER_SESSION: u32 = 4;
const SYSTEM_CHAT: u32 = 5;

/// A chat message as sent by its author. The signed last-seen list is
/// replaced by the compact update; the server rebuilds it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerboundChat {
    pub content: String,
    pub timestamp: u64,
    pub salt: i64,
    pub signature: Option<MessageSignature>,
    pub last_seen: LastSeenUpdate,
}

/// A relayed chat message, packed against the recipient's cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientboundPlayerChat {
    pub sender: Uuid,
    pub index: u32,
    pub signature: Option<MessageSignature>,
    pub body: PackedMessageBody,
    pub unsigned_content: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatPacket {
    SessionUpdate(RemoteChatSessionData),
    Chat(ServerboundChat),
    ChatAck {
        offset: u32,
    },
    PlayerChat(ClientboundPlayerChat),
    PlayerSession {
        profile_id: Uuid,
        name: String,
        session: Option<RemoteChatSessionData>,
    },
    SystemChat {
        content: String,
    },
}

impl ChatPacket {
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut writer = PacketWriter::new();
        match self {
            ChatPacket::SessionUpdate(data) => {
                writer.write_var_int(SESSION_UPDATE);
                data.write(&mut writer);
            }
            ChatPacket::Chat(chat) => {
                writer.write_var_int(CHAT);
                writer.write_string(&chat.content, MAX_CONTENT_LENGTH)?;
                writer.write_i64(chat.timestamp as i64);
                writer.write_i64(chat.salt);
                write_optional_signature(&mut writer, chat.signature.as_ref());
                chat.last_seen.write(&mut writer)?;
            }
            ChatPacket::ChatAck { offset } => {
                writer.write_var_int(CHAT_ACK);
                writer.write_var_int(*offset);
            }
            ChatPacket::PlayerChat(chat) => {
                writer.write_var_int(PLAYER_CHAT);
                writer.write_uuid(&chat.sender);
                writer.write_var_int(chat.index);
                write_optional_signature(&mut writer, chat.signature.as_ref());
                chat.body.write(&mut writer)?;
                writer.write_bool(chat.unsigned_content.is_some());
                if let Some(content) = &chat.unsigned_content {
                    writer.write_string(content, MAX_SYSTEM_MESSAGE_LENGTH)?;
                }
            }
            ChatPacket::PlayerSession {
                profile_id,
                name,
                session,
            } => {
                writer.write_var_int(PLAYER_SESSION);
                writer.write_uuid(profile_id);
                writer.write_string(name, MAX_NAME_LENGTH)?;
                writer.write_bool(session.is_some());
                if let Some(session) = session {
                    session.write(&mut writer);
                }
            }
            ChatPacket::SystemChat { content } => {
                writer.write_var_int(SYSTEM_CHAT);
                writer.write_string(content, MAX_SYSTEM_MESSAGE_LENGTH)?;
            }
        }
        Ok(writer.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = PacketReader::new(bytes);
        let packet = match reader.read_var_int()? {
            SESSION_UPDATE => ChatPacket::SessionUpdate(RemoteChatSessionData::read(&mut reader)?),
            CHAT => ChatPacket::Chat(ServerboundChat {
                content: reader.read_string(MAX_CONTENT_LENGTH)?,
                timestamp: read_timestamp(&mut reader)?,
                salt: reader.read_i64()?,
                signature: read_optional_signature(&mut reader)?,
                last_seen: LastSeenUpdate::read(&mut reader)?,
            }),
            CHAT_ACK => ChatPacket::ChatAck {
                offset: reader.read_var_int()?,
            },
            PLAYER_CHAT => ChatPacket::PlayerChat(ClientboundPlayerChat {
                sender: reader.read_uuid()?,
                index: read_link_index(&mut reader)?,
                signature: read_optional_signature(&mut reader)?,
                body: PackedMessageBody::read(&mut reader)?,
                unsigned_content: if reader.read_bool()? {
                    Some(reader.read_string(MAX_SYSTEM_MESSAGE_LENGTH)?)
                } else {
                    None
                },
            }),
            PLAYER_SESSION => ChatPacket::PlayerSession {
                profile_id: reader.read_uuid()?,
                name: reader.read_string(MAX_NAME_LENGTH)?,
                session: if reader.read_bool()? {
                    Some(RemoteChatSessionData::read(&mut reader)?)
                } else {
                    None
                },
            },
            SYSTEM_CHAT => ChatPacket::SystemChat {
                content: reader.read_string(MAX_SYSTEM_MESSAGE_LENGTH)?,
            },
            id => return Err(CodecError::UnknownPacket { id }),
        };
        reader.finish()?;
        Ok(packet)
    }
}

fn write_optional_signature(writer: &mut PacketWriter, signature: Option<&MessageSignature>) {
    writer.write_bool(signature.is_some());
    if let Some(signature) = signature {
        signature.write(writer);
    }
}

fn read_optional_signature(reader: &mut PacketReader<'_>) -> CodecResult<Option<MessageSignature>> {
    if reader.read_bool()? {
        Ok(Some(MessageSignature::read(reader)?))
    } else {
        Ok(None)
    }
}

fn read_link_index(reader: &mut PacketReader<'_>) -> CodecResult<u32> {
    let index = reader.read_var_int()?;
    if index > MessageLink::MAX_INDEX {
        return Err(CodecError::OutOfRange {
            value: i64::from(index),
        });
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::LastSeenMessages;
    use crate::cache::MessageSignatureCache;

    fn sig(id: u8) -> MessageSignature {
        MessageSignature::from_bytes([id; 64])
    }

    #[test]
    fn test_chat_ack_bytes() {
        let bytes = ChatPacket::ChatAck { offset: 300 }.encode().unwrap();
        assert_eq!(bytes, vec![CHAT_ACK as u8, 0xAC, 0x02]);
    }

    #[test]
    fn test_serverbound_chat_layout() {
        let packet = ChatPacket::Chat(ServerboundChat {
            content: "hey".to_string(),
            timestamp: 10,
            salt: 99,
            signature: None,
            last_seen: LastSeenUpdate {
                offset: 2,
                acknowledged: 0b11 << 18,
            },
        });
        let bytes = packet.encode().unwrap();

        // id, len, "hey", timestamp, salt, no signature, offset, 3-byte ack
        assert_eq!(bytes.len(), 1 + 1 + 3 + 8 + 8 + 1 + 1 + 3);
        assert_eq!(&bytes[bytes.len() - 3..], &[0x00, 0x00, 0x0C]);
        assert_eq!(ChatPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_player_chat_compresses_cached_signatures() {
        let mut cache = MessageSignatureCache::default();
        cache.push(&[sig(1), sig(2)], None);

        let body = crate::body::SignedMessageBody::new(
            "hello".to_string(),
            1_700_000_000,
            5,
            LastSeenMessages::new(vec![sig(1), sig(2), sig(3)]),
        );
        let packet = ChatPacket::PlayerChat(ClientboundPlayerChat {
            sender: Uuid::new_v4(),
            index: 4,
            signature: Some(sig(4)),
            body: body.pack(&cache),
            unsigned_content: None,
        });
        let bytes = packet.encode().unwrap();

        let decoded = ChatPacket::decode(&bytes).unwrap();
        let ChatPacket::PlayerChat(chat) = &decoded else {
            panic!("Wrong packet type after decoding");
        };
        assert_eq!(chat.body.unpack(&cache).unwrap(), body);
        // Two cached references cost one byte each; one full signature.
        let full_size = 1 + 16 + 1 + 1 + 64 + 1 + 5 + 8 + 8 + 1 + (1 + 1) + (1 + 64) + 1;
        assert_eq!(bytes.len(), full_size);
    }

    #[test]
    fn test_player_session_roundtrip() {
        let packet = ChatPacket::PlayerSession {
            profile_id: Uuid::new_v4(),
            name: "steve".to_string(),
            session: None,
        };
        let bytes = packet.encode().unwrap();
        assert_eq!(ChatPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_rejects_unknown_packet() {
        assert_eq!(
            ChatPacket::decode(&[42]),
            Err(CodecError::UnknownPacket { id: 42 })
        );
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = ChatPacket::ChatAck { offset: 1 }.encode().unwrap();
        bytes.push(0);
        assert_eq!(
            ChatPacket::decode(&bytes),
            Err(CodecError::TrailingBytes { count: 1 })
        );
    }

    #[test]
    fn test_rejects_oversized_link_index() {
        let mut writer = PacketWriter::new();
        writer.write_var_int(PLAYER_CHAT);
        writer.write_uuid(&Uuid::nil());
        writer.write_var_int(u32::MAX);
        let bytes = writer.into_bytes();
        assert!(matches!(
            ChatPacket::decode(&bytes),
            Err(CodecError::OutOfRange { .. })
        ));
    }
}
