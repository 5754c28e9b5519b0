//! Server network layer handling UDP communications and the chat relay loop

use crate::chat::{ChatRelay, Outbound};
use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::codec::code_units;
use shared::packets::MAX_NAME_LENGTH;
use shared::session::IdentityService;
use shared::{ChatPacket, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: u32,
    },
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum OutgoingMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Main server coordinating networking and chat relay
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    relay: ChatRelay,
    status_interval: Duration,
    client_timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outgoing_tx: mpsc::UnboundedSender<OutgoingMessage>,
    outgoing_rx: mpsc::UnboundedReceiver<OutgoingMessage>,
}

impl Server {
    pub async fn new(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let identity = config
            .identity_service()?
            .map(|service| Box::new(service) as Box<dyn IdentityService + Send + Sync>);
        if identity.is_none() {
            warn!("No authority key configured, chat sessions will be ignored");
        }

        let addr = config.bind_addr();
        let socket = Arc::new(UdpSocket::bind(&addr).await?);
        info!("Server listening on {}", addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.enforce_secure_chat,
            ))),
            relay: ChatRelay::new(identity),
            status_interval: config.status_interval(),
            client_timeout: config.client_timeout(),
            server_tx,
            server_rx,
            outgoing_tx,
            outgoing_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 8192];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut outgoing_rx =
            std::mem::replace(&mut self.outgoing_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(OutgoingMessage::SendPacket { packet, addr }) = outgoing_rx.recv().await
            {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let timeout = self.client_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(timeout)
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outgoing_tx
            .send(OutgoingMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Turns relay output into packets, dropping clients it disconnected.
    ///
    /// Runs under the roster lock so addresses are resolved before a
    /// disconnected client is removed.
    fn dispatch(&self, clients: &mut ClientManager, outbound: Vec<Outbound>) {
        for out in outbound {
            match out {
                Outbound::Send { client_id, packet } => {
                    let Some(addr) = clients.get(client_id).map(|c| c.addr) else {
                        continue;
                    };
                    match Packet::chat(&packet) {
                        Ok(packet) => self.send_packet(packet, addr),
                        Err(e) => error!("Failed to encode chat for client {}: {}", client_id, e),
                    }
                }
                Outbound::Disconnect { client_id, reason } => {
                    if let Some(client) = clients.remove_client(&client_id) {
                        info!("Disconnecting client {}: {}", client_id, reason);
                        self.send_packet(Packet::Disconnected { reason }, client.addr);
                    }
                }
            }
        }
    }

    /// Processes incoming packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                profile_id,
                name,
            } => {
                info!(
                    "Client {} connecting from {} (version: {})",
                    name, addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Disconnected {
                        reason: format!("Outdated client, server speaks version {PROTOCOL_VERSION}"),
                    };
                    self.send_packet(response, addr);
                    return;
                }
                if name.is_empty() || code_units(&name) > MAX_NAME_LENGTH {
                    let response = Packet::Disconnected {
                        reason: "Invalid player name".to_string(),
                    };
                    self.send_packet(response, addr);
                    return;
                }

                let mut clients = self.clients.write().await;

                // Remove existing connection if present
                if let Some(existing_id) = clients.find_client_by_addr(addr) {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    clients.remove_client(&existing_id);
                }
                if let Some(existing_id) = clients.find_client_by_profile(profile_id) {
                    self.dispatch(
                        &mut clients,
                        vec![Outbound::Disconnect {
                            client_id: existing_id,
                            reason: "Logged in from another location".to_string(),
                        }],
                    );
                }

                if let Some(client_id) = clients.add_client(addr, profile_id, name) {
                    let response = Packet::Connected {
                        client_id,
                        enforces_secure_chat: clients.enforces_secure_chat(),
                    };
                    self.send_packet(response, addr);
                    let outbound = self.relay.player_joined(&clients, client_id);
                    self.dispatch(&mut clients, outbound);
                } else {
                    let response = Packet::Disconnected {
                        reason: "Server full".to_string(),
                    };
                    self.send_packet(response, addr);
                }
            }

            Packet::Chat { payload } => {
                let mut clients = self.clients.write().await;
                let Some(client_id) = clients.find_client_by_addr(addr) else {
                    debug!("Chat from unknown address {}", addr);
                    return;
                };
                clients.refresh(client_id);

                let outbound = match ChatPacket::decode(&payload) {
                    Ok(packet) => self.relay.handle(&mut clients, client_id, packet),
                    Err(e) => {
                        warn!("Malformed chat payload from client {}: {}", client_id, e);
                        vec![Outbound::Disconnect {
                            client_id,
                            reason: "Malformed chat packet".to_string(),
                        }]
                    }
                };
                self.dispatch(&mut clients, outbound);
            }

            Packet::Heartbeat => {
                let mut clients = self.clients.write().await;
                if let Some(client_id) = clients.find_client_by_addr(addr) {
                    clients.refresh(client_id);
                }
            }

            Packet::Disconnect => {
                let mut clients = self.clients.write().await;
                if let Some(client_id) = clients.find_client_by_addr(addr) {
                    clients.remove_client(&client_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut status_interval = interval(self.status_interval);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                        },
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Periodic status reporting
                _ = status_interval.tick() => {
                    let clients = self.clients.read().await;
                    if !clients.is_empty() {
                        let sessions = clients.clients().filter(|c| c.chat.session.is_some()).count();
                        debug!("Status: {} clients, {} with chat sessions", clients.len(), sessions);
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080)
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        let profile_id = Uuid::new_v4();

        let msg = ServerMessage::PacketReceived {
            packet: Packet::Connect {
                client_version: PROTOCOL_VERSION,
                profile_id,
                name: "alex".to_string(),
            },
            addr: test_addr(),
        };

        assert!(tx.send(msg).is_ok());

        match rx.try_recv().unwrap() {
            ServerMessage::PacketReceived { packet, addr } => {
                assert_eq!(addr, test_addr());
                match packet {
                    Packet::Connect {
                        profile_id: id, ..
                    } => assert_eq!(id, profile_id),
                    _ => panic!("Unexpected packet type"),
                }
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_connect_registers_client() {
        let mut server = Server::new(&test_config()).await.unwrap();

        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    profile_id: Uuid::new_v4(),
                    name: "alex".to_string(),
                },
                test_addr(),
            )
            .await;

        assert_eq!(server.clients.read().await.len(), 1);
        match server.outgoing_rx.try_recv().unwrap() {
            OutgoingMessage::SendPacket {
                packet: Packet::Connected { client_id, .. },
                addr,
            } => {
                assert_eq!(client_id, 1);
                assert_eq!(addr, test_addr());
            }
            other => panic!("Unexpected outgoing message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outdated_client_is_refused() {
        let mut server = Server::new(&test_config()).await.unwrap();

        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION + 1,
                    profile_id: Uuid::new_v4(),
                    name: "alex".to_string(),
                },
                test_addr(),
            )
            .await;

        assert!(server.clients.read().await.is_empty());
        assert!(matches!(
            server.outgoing_rx.try_recv().unwrap(),
            OutgoingMessage::SendPacket {
                packet: Packet::Disconnected { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_chat_disconnects() {
        let mut server = Server::new(&test_config()).await.unwrap();
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    profile_id: Uuid::new_v4(),
                    name: "alex".to_string(),
                },
                test_addr(),
            )
            .await;

        server
            .handle_packet(Packet::Chat { payload: vec![0xFF] }, test_addr())
            .await;

        assert!(server.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_login_replaces_first() {
        let mut server = Server::new(&test_config()).await.unwrap();
        let profile_id = Uuid::new_v4();
        let other_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9090);

        for addr in [test_addr(), other_addr] {
            server
                .handle_packet(
                    Packet::Connect {
                        client_version: PROTOCOL_VERSION,
                        profile_id,
                        name: "alex".to_string(),
                    },
                    addr,
                )
                .await;
        }

        let clients = server.clients.read().await;
        assert_eq!(clients.len(), 1);
        assert_eq!(clients.find_client_by_addr(other_addr), Some(2));
    }

    #[tokio::test]
    async fn test_timeout_checker_reports_stale_client() {
        let config = ServerConfig {
            timeout: 0,
            ..test_config()
        };
        let mut server = Server::new(&config).await.unwrap();
        let client_id = server
            .clients
            .write()
            .await
            .add_client(test_addr(), Uuid::new_v4(), "alex".to_string())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        server.spawn_timeout_checker().await;

        let message = tokio::time::timeout(Duration::from_secs(3), server.server_rx.recv())
            .await
            .unwrap();
        match message {
            Some(ServerMessage::ClientTimeout { client_id: id }) => assert_eq!(id, client_id),
            other => panic!("Unexpected message: {:?}", other),
        }
        assert!(server.clients.read().await.is_empty());
    }
}
