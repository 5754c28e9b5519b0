//! Client-side chat state
//!
//! [`ChatClient`] holds everything the client needs to take part in signed
//! chat: its own session and encoder, the last-seen tracker, the signature
//! cache mirroring the server's, and one validator per known player. It is
//! transport-free; the network layer feeds it decoded [`ChatPacket`]s and
//! sends whatever packets it returns.

use log::{debug, info, warn};
use rand::Rng;
use shared::body::validate_content;
use shared::error::{ChatError, Result};
use shared::packets::{ClientboundPlayerChat, ServerboundChat};
use shared::session::{IdentityService, EXPIRY_GRACE_PERIOD};
use shared::{
    epoch_seconds, ChainValidator, ChatPacket, LastSeenMessagesTracker, LocalChatSession,
    MessageEncoder, MessageLink, MessageSignatureCache, PlayerChatMessage, RemoteChatSession,
    RemoteChatSessionData, SignedMessageBody, ACK_OFFSET_THRESHOLD,
};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A line to show the player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatLine {
    Player {
        name: String,
        content: String,
        /// Whether the message carried a verified signature
        secure: bool,
    },
    System(String),
}

impl fmt::Display for ChatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatLine::Player {
                name,
                content,
                secure: true,
            } => write!(f, "<{name}> {content}"),
            ChatLine::Player {
                name,
                content,
                secure: false,
            } => write!(f, "<{name}> {content} [not secure]"),
            ChatLine::System(content) => write!(f, "* {content}"),
        }
    }
}

/// Another player as known to this client
#[derive(Debug)]
pub struct PlayerInfo {
    pub name: String,
    pub session: Option<RemoteChatSession>,
    pub validator: ChainValidator,
}

pub struct ChatClient {
    profile_id: Uuid,
    session: Option<LocalChatSession>,
    encoder: Option<MessageEncoder>,
    tracker: LastSeenMessagesTracker,
    signature_cache: MessageSignatureCache,
    players: HashMap<Uuid, PlayerInfo>,
    enforces_secure_chat: bool,
    identity: Option<Box<dyn IdentityService + Send + Sync>>,
}

impl ChatClient {
    pub fn new(profile_id: Uuid) -> Self {
        Self {
            profile_id,
            session: None,
            encoder: None,
            tracker: LastSeenMessagesTracker::new(),
            signature_cache: MessageSignatureCache::default(),
            players: HashMap::new(),
            enforces_secure_chat: false,
            identity: None,
        }
    }

    /// Sets the service used to validate other players' chat keys.
    pub fn with_identity(mut self, identity: Box<dyn IdentityService + Send + Sync>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn profile_id(&self) -> Uuid {
        self.profile_id
    }

    pub fn player(&self, profile_id: &Uuid) -> Option<&PlayerInfo> {
        self.players.get(profile_id)
    }

    pub fn tracker(&self) -> &LastSeenMessagesTracker {
        &self.tracker
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Called once the server accepted the connection.
    pub fn on_connected(&mut self, enforces_secure_chat: bool) {
        self.enforces_secure_chat = enforces_secure_chat;
    }

    /// Starts signing with `session`. The returned packet announces it to the
    /// server.
    pub fn start_session(&mut self, session: LocalChatSession) -> ChatPacket {
        info!("Starting chat session {}", session.session_id());
        let packet = ChatPacket::SessionUpdate(session.as_remote_data());
        self.encoder = Some(session.create_message_encoder(self.profile_id));
        self.session = Some(session);
        packet
    }

    /// Builds the packet for a message typed by the player.
    pub fn send_chat(&mut self, content: &str) -> Result<ChatPacket> {
        validate_content(content)?;
        if self.encoder.is_none() && self.enforces_secure_chat {
            return Err(ChatError::MissingSignature);
        }

        let update = self.tracker.generate_and_apply_update();
        let timestamp = epoch_seconds();
        let salt: i64 = rand::thread_rng().gen();
        let body = SignedMessageBody::new(content.to_string(), timestamp, salt, update.last_seen);

        let signature = match &mut self.encoder {
            Some(encoder) => Some(encoder.pack(&body)?),
            None => None,
        };

        Ok(ChatPacket::Chat(ServerboundChat {
            content: body.content,
            timestamp,
            salt,
            signature,
            last_seen: update.update,
        }))
    }

    /// Returns a standalone acknowledgement once enough messages piled up
    /// without the player chatting.
    pub fn take_acknowledgement(&mut self) -> Option<ChatPacket> {
        if self.tracker.offset() > ACK_OFFSET_THRESHOLD {
            Some(ChatPacket::ChatAck {
                offset: self.tracker.get_and_clear_offset(),
            })
        } else {
            None
        }
    }

    /// Handles a packet from the server, returning anything worth showing.
    pub fn handle_packet(&mut self, packet: ChatPacket) -> Option<ChatLine> {
        match packet {
            ChatPacket::PlayerSession {
                profile_id,
                name,
                session,
            } => {
                self.update_player(profile_id, name, session);
                None
            }
            ChatPacket::PlayerChat(chat) => self.handle_player_chat(chat),
            ChatPacket::SystemChat { content } => Some(ChatLine::System(content)),
            ChatPacket::SessionUpdate(_) | ChatPacket::Chat(_) | ChatPacket::ChatAck { .. } => {
                warn!("Server sent a serverbound chat packet");
                None
            }
        }
    }

    fn unsigned_validator(&self) -> ChainValidator {
        if self.enforces_secure_chat {
            ChainValidator::RejectAll
        } else {
            ChainValidator::AcceptUnsigned
        }
    }

    fn update_player(&mut self, profile_id: Uuid, name: String, data: Option<RemoteChatSessionData>) {
        let session = data.and_then(|data| self.validate_session(profile_id, &data));

        if let (Some(known), Some(session)) = (self.players.get_mut(&profile_id), &session) {
            if known.session.as_ref().map(|s| s.session_id()) == Some(session.session_id()) {
                known.name = name;
                return;
            }
        }

        let validator = match &session {
            Some(session) => session.create_message_validator(EXPIRY_GRACE_PERIOD),
            None => self.unsigned_validator(),
        };
        debug!(
            "Player {} ({}) has {} chat session",
            name,
            profile_id,
            if session.is_some() { "a" } else { "no" }
        );
        self.players.insert(
            profile_id,
            PlayerInfo {
                name,
                session,
                validator,
            },
        );
    }

    fn validate_session(
        &self,
        profile_id: Uuid,
        data: &RemoteChatSessionData,
    ) -> Option<RemoteChatSession> {
        let Some(identity) = &self.identity else {
            debug!("Cannot verify chat session of {} without an authority", profile_id);
            return None;
        };
        match data.validate(profile_id, identity.as_ref()) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Chat session of {} failed validation: {}", profile_id, e);
                None
            }
        }
    }

    fn handle_player_chat(&mut self, chat: ClientboundPlayerChat) -> Option<ChatLine> {
        let body = match chat.body.unpack(&self.signature_cache) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to unpack chat from {}: {}", chat.sender, e);
                if let Some(signature) = chat.signature {
                    self.tracker.add_pending(signature, false);
                }
                return None;
            }
        };

        // The server's mirror records every relayed signature, displayed or not.
        self.signature_cache
            .push(body.last_seen.entries(), chat.signature);

        let Some(player) = self.players.get_mut(&chat.sender) else {
            warn!("Received chat from unknown player {}", chat.sender);
            if let Some(signature) = chat.signature {
                self.tracker.add_pending(signature, false);
            }
            return None;
        };

        let link = match (&player.session, chat.signature) {
            (Some(session), Some(_)) => MessageLink::new(chat.index, chat.sender, session.session_id()),
            _ => MessageLink::unsigned(chat.sender),
        };
        let mut message = PlayerChatMessage::new(link, chat.signature, body);
        if let Some(content) = chat.unsigned_content {
            message = message.with_unsigned_content(content);
        }

        match player.validator.update_and_validate(message) {
            Ok(message) => {
                if let Some(signature) = chat.signature {
                    self.tracker.add_pending(signature, true);
                }
                Some(ChatLine::Player {
                    name: player.name.clone(),
                    content: message.decorated_content().to_string(),
                    secure: message.is_signed(),
                })
            }
            Err(e) => {
                warn!("Hiding chat from {}: {}", player.name, e);
                if let Some(signature) = chat.signature {
                    self.tracker.add_pending(signature, false);
                }
                None
            }
        }
    }
}
