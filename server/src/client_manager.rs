//! Connected clients and their per-connection chat state
//!
//! This module handles the server-side management of connected clients, including:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - The signature cache and last-seen validator kept for every connection
//! - The chat session and message decoder of every player
//! - Client capacity management and address tracking
//!
//! Chat state lives and dies with the connection. Nothing here is persisted.

use log::info;
use shared::error::{ChatError, Result};
use shared::{
    LastSeenMessagesValidator, MessageDecoder, MessageSignatureCache, PlayerChatMessage,
    RemoteChatSession, MAX_TRACKED_MESSAGES,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Chat-related state of one connection
///
/// The signature cache and last-seen validator mirror what the client keeps
/// on its side; both must see exactly the same sequence of relayed messages.
#[derive(Debug)]
pub struct ChatState {
    /// Chat messages sent by this player and accepted
    pub messages_sent: u32,
    /// Chat messages relayed to this player
    pub messages_received: u32,
    /// Compresses signatures in messages relayed to this player
    pub signature_cache: MessageSignatureCache,
    /// Checks this player's acknowledgements of relayed messages
    pub last_seen: LastSeenMessagesValidator,
    /// Validated chat session, if the player registered one
    pub session: Option<RemoteChatSession>,
    /// Rebuilds and verifies this player's outgoing chain
    pub decoder: MessageDecoder,
}

impl ChatState {
    pub fn new(profile_id: Uuid, enforce_secure_chat: bool) -> Self {
        Self {
            messages_sent: 0,
            messages_received: 0,
            signature_cache: MessageSignatureCache::default(),
            last_seen: LastSeenMessagesValidator::new(),
            session: None,
            decoder: MessageDecoder::unsigned(profile_id, enforce_secure_chat),
        }
    }

    /// Starts a new chain for a freshly validated session.
    pub fn reset_session(&mut self, profile_id: Uuid, session: RemoteChatSession) {
        self.decoder = session.create_message_decoder(profile_id);
        self.session = Some(session);
    }

    /// Records a message that was just relayed to this player.
    ///
    /// Must run after the message was packed for this player, mirroring the
    /// order in which the client pushes it into its own cache.
    pub fn add_pending_message(&mut self, message: &PlayerChatMessage) -> Result<()> {
        self.messages_received += 1;
        let Some(signature) = message.signature else {
            return Ok(());
        };
        self.signature_cache
            .push(message.body.last_seen.entries(), Some(signature));
        self.last_seen.add_pending(signature);

        let count = self.last_seen.tracked_count();
        if count > MAX_TRACKED_MESSAGES {
            return Err(ChatError::TooManyPending { count });
        }
        Ok(())
    }
}

/// Represents a connected client and their chat state
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Player identity, also the sender id of every chat message
    pub profile_id: Uuid,
    /// Display name
    pub name: String,
    pub chat: ChatState,
}

impl Client {
    /// Creates a new client, marked as recently active and without a chat
    /// session.
    pub fn new(
        id: u32,
        addr: SocketAddr,
        profile_id: Uuid,
        name: String,
        enforce_secure_chat: bool,
    ) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            profile_id,
            name,
            chat: ChatState::new(profile_id, enforce_secure_chat),
        }
    }

    pub fn refresh(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients
///
/// Enforces the capacity limit and hands out client ids. Every client's chat
/// state is only touched through this manager, from the server's main loop
/// or the timeout checker.
#[derive(Debug)]
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
    /// Whether players without a chat session may chat at all
    enforce_secure_chat: bool,
}

impl ClientManager {
    pub fn new(max_clients: usize, enforce_secure_chat: bool) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            enforce_secure_chat,
        }
    }

    pub fn enforces_secure_chat(&self) -> bool {
        self.enforce_secure_chat
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr, profile_id: Uuid, name: String) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} ({}) connected from {}", client_id, name, addr);
        let client = Client::new(client_id, addr, profile_id, name, self.enforce_secure_chat);
        self.clients.insert(client_id, client);

        Some(client_id)
    }

    /// Removes a client from the server, dropping its chat state
    pub fn remove_client(&mut self, client_id: &u32) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!(
            "Client {} disconnected ({} sent, {} received)",
            client.id, client.chat.messages_sent, client.chat.messages_received
        );
        Some(client)
    }

    /// Finds a client ID by their network address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Finds a client ID by player identity
    pub fn find_client_by_profile(&self, profile_id: Uuid) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.profile_id == profile_id)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut Client> {
        self.clients.get_mut(&client_id)
    }

    /// Marks a client as alive. Returns false if the client is unknown.
    pub fn refresh(&mut self, client_id: u32) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.refresh();
            true
        } else {
            false
        }
    }

    /// Connected client ids in ascending order, so relays are deterministic.
    pub fn client_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the removed client IDs so their connections can be reported.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
