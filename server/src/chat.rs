//! Server-side chat handling
//!
//! [`ChatRelay`] turns decoded chat payloads into outbound work for the
//! network layer. It never touches sockets, so every rule here can be driven
//! directly from tests with a [`ClientManager`].
//!
//! Failures that mean the client and server no longer agree on chain or
//! window state end the connection. Anything else only costs the sender the
//! message.

use crate::client_manager::ClientManager;
use log::{debug, error, info, warn};
use shared::body::validate_content;
use shared::packets::{ClientboundPlayerChat, ServerboundChat};
use shared::session::IdentityService;
use shared::{ChatPacket, PlayerChatMessage, RemoteChatSessionData, SignedMessageBody};

/// Work produced by the relay for the network layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Send { client_id: u32, packet: ChatPacket },
    Disconnect { client_id: u32, reason: String },
}

fn disconnect(client_id: u32, reason: impl Into<String>) -> Vec<Outbound> {
    vec![Outbound::Disconnect {
        client_id,
        reason: reason.into(),
    }]
}

pub struct ChatRelay {
    /// Confirms chat keys belong to their players. Without one, chat sessions
    /// are ignored and every message is relayed unsigned.
    identity: Option<Box<dyn IdentityService + Send + Sync>>,
}

impl ChatRelay {
    pub fn new(identity: Option<Box<dyn IdentityService + Send + Sync>>) -> Self {
        Self { identity }
    }

    /// Introduces a freshly connected player to everyone, and everyone
    /// (themselves included) to them.
    pub fn player_joined(&self, clients: &ClientManager, client_id: u32) -> Vec<Outbound> {
        let Some(joined) = clients.get(client_id) else {
            return Vec::new();
        };
        let announcement = ChatPacket::PlayerSession {
            profile_id: joined.profile_id,
            name: joined.name.clone(),
            session: None,
        };

        let mut outbound = Vec::new();
        for other_id in clients.client_ids() {
            let Some(other) = clients.get(other_id) else {
                continue;
            };
            outbound.push(Outbound::Send {
                client_id,
                packet: ChatPacket::PlayerSession {
                    profile_id: other.profile_id,
                    name: other.name.clone(),
                    session: other.chat.session.as_ref().map(|s| s.as_data()),
                },
            });
            if other_id != client_id {
                outbound.push(Outbound::Send {
                    client_id: other_id,
                    packet: announcement.clone(),
                });
            }
        }
        outbound
    }

    /// Handles one chat payload received from `client_id`.
    pub fn handle(
        &self,
        clients: &mut ClientManager,
        client_id: u32,
        packet: ChatPacket,
    ) -> Vec<Outbound> {
        match packet {
            ChatPacket::SessionUpdate(data) => self.handle_session_update(clients, client_id, data),
            ChatPacket::Chat(chat) => self.handle_chat(clients, client_id, chat),
            ChatPacket::ChatAck { offset } => self.handle_ack(clients, client_id, offset),
            ChatPacket::PlayerChat(_)
            | ChatPacket::PlayerSession { .. }
            | ChatPacket::SystemChat { .. } => {
                warn!("Client {} sent a clientbound chat packet", client_id);
                disconnect(client_id, "Unexpected packet")
            }
        }
    }

    fn handle_session_update(
        &self,
        clients: &mut ClientManager,
        client_id: u32,
        data: RemoteChatSessionData,
    ) -> Vec<Outbound> {
        let Some(client) = clients.get_mut(client_id) else {
            return Vec::new();
        };

        let current = client
            .chat
            .session
            .as_ref()
            .map(|session| session.profile_public_key().data().clone());
        if current.as_ref() == Some(&data.profile_public_key) {
            debug!("Client {} resent its current chat key", client_id);
            return Vec::new();
        }
        if let Some(current) = &current {
            if data.profile_public_key.expires_at < current.expires_at {
                return disconnect(client_id, "Expired profile public key");
            }
        }

        let Some(identity) = &self.identity else {
            warn!(
                "Ignoring chat session from {} without an identity service",
                client.name
            );
            return Vec::new();
        };
        let session = match data.validate(client.profile_id, identity.as_ref()) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to validate profile key of {}: {}", client.name, e);
                return disconnect(client_id, "Invalid profile public key");
            }
        };

        info!(
            "Client {} started chat session {}",
            client_id,
            session.session_id()
        );
        let profile_id = client.profile_id;
        let name = client.name.clone();
        client.chat.reset_session(profile_id, session);

        clients
            .client_ids()
            .into_iter()
            .map(|recipient| Outbound::Send {
                client_id: recipient,
                packet: ChatPacket::PlayerSession {
                    profile_id,
                    name: name.clone(),
                    session: Some(data.clone()),
                },
            })
            .collect()
    }

    fn handle_chat(
        &self,
        clients: &mut ClientManager,
        client_id: u32,
        chat: ServerboundChat,
    ) -> Vec<Outbound> {
        let Some(client) = clients.get_mut(client_id) else {
            return Vec::new();
        };

        if let Err(e) = validate_content(&chat.content) {
            warn!("Client {} sent illegal chat: {}", client_id, e);
            return disconnect(client_id, "Illegal characters in chat");
        }

        let last_seen = match client.chat.last_seen.apply_update(&chat.last_seen) {
            Ok(last_seen) => last_seen,
            Err(e) => {
                warn!("Client {} sent a bad acknowledgement: {}", client_id, e);
                return disconnect(client_id, "Chat message validation failure");
            }
        };

        let body = SignedMessageBody::new(chat.content, chat.timestamp, chat.salt, last_seen);
        let message = match client.chat.decoder.unpack(chat.signature, body) {
            Ok(message) => message,
            Err(e) if e.breaks_chain() => {
                warn!("Chain of client {} is broken: {}", client_id, e);
                return disconnect(client_id, format!("Chat chain broken: {e}"));
            }
            Err(e) => {
                warn!("Dropping chat from client {}: {}", client_id, e);
                return vec![Outbound::Send {
                    client_id,
                    packet: ChatPacket::SystemChat {
                        content: format!("Your message was not delivered: {e}"),
                    },
                }];
            }
        };

        client.chat.messages_sent += 1;
        info!("<{}> {}", client.name, message.decorated_content());
        Self::broadcast_message(clients, &message)
    }

    /// Packs `message` against every recipient's cache, then records it as
    /// pending for them.
    fn broadcast_message(clients: &mut ClientManager, message: &PlayerChatMessage) -> Vec<Outbound> {
        let mut outbound = Vec::new();
        for recipient in clients.client_ids() {
            let Some(client) = clients.get_mut(recipient) else {
                continue;
            };

            outbound.push(Outbound::Send {
                client_id: recipient,
                packet: ChatPacket::PlayerChat(ClientboundPlayerChat {
                    sender: message.sender(),
                    index: message.link.index(),
                    signature: message.signature,
                    body: message.body.pack(&client.chat.signature_cache),
                    unsigned_content: message.unsigned_content.clone(),
                }),
            });

            if let Err(e) = client.chat.add_pending_message(message) {
                warn!("Client {} stopped acknowledging chat: {}", recipient, e);
                outbound.push(Outbound::Disconnect {
                    client_id: recipient,
                    reason: "Too many unacknowledged chat messages".to_string(),
                });
            }
        }
        outbound
    }

    fn handle_ack(&self, clients: &mut ClientManager, client_id: u32, offset: u32) -> Vec<Outbound> {
        let Some(client) = clients.get_mut(client_id) else {
            return Vec::new();
        };
        match client.chat.last_seen.apply_offset(offset) {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!("Client {} sent a bad acknowledgement: {}", client_id, e);
                disconnect(client_id, "Chat message validation failure")
            }
        }
    }
}
