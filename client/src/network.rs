use crate::chat::ChatClient;
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use shared::{ChatPacket, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::interval;
use uuid::Uuid;

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    client_id: Option<u32>,
    connected: bool,
    closed: bool,

    name: String,
    chat: ChatClient,
    session_pending: Option<ChatPacket>,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        name: String,
        chat: ChatClient,
        session_update: Option<ChatPacket>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            client_id: None,
            connected: false,
            closed: false,
            name,
            chat,
            session_pending: session_update,
        })
    }

    pub fn profile_id(&self) -> Uuid {
        self.chat.profile_id()
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server as {}...", self.name);

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            profile_id: self.profile_id(),
            name: self.name.clone(),
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn send_chat_packet(&self, packet: &ChatPacket) -> Result<(), Box<dyn std::error::Error>> {
        self.send_packet(&Packet::chat(packet)?).await
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<(), Box<dyn std::error::Error>> {
        match packet {
            Packet::Connected {
                client_id,
                enforces_secure_chat,
            } => {
                info!("Connected! Client ID: {}", client_id);
                if enforces_secure_chat {
                    info!("Server enforces secure chat");
                }
                self.client_id = Some(client_id);
                self.connected = true;
                self.chat.on_connected(enforces_secure_chat);

                if let Some(update) = self.session_pending.take() {
                    self.send_chat_packet(&update).await?;
                }
            }

            Packet::Chat { payload } => match ChatPacket::decode(&payload) {
                Ok(packet) => {
                    if let Some(line) = self.chat.handle_packet(packet) {
                        println!("{line}");
                    }
                    if let Some(ack) = self.chat.take_acknowledgement() {
                        self.send_chat_packet(&ack).await?;
                    }
                }
                Err(e) => warn!("Malformed chat payload from server: {}", e),
            },

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                println!("Disconnected: {reason}");
                self.connected = false;
                self.closed = true;
                self.client_id = None;
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
        Ok(())
    }

    async fn send_line(&mut self, line: &str) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected {
            warn!("Not connected, message dropped");
            return Ok(());
        }

        match self.chat.send_chat(line) {
            Ok(packet) => self.send_chat_packet(&packet).await?,
            Err(e) => println!("Message not sent: {e}"),
        }
        Ok(())
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut heartbeat_interval = interval(Duration::from_secs(1));
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut buffer = [0u8; 8192];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                                if let Err(e) = self.handle_packet(packet).await {
                                    error!("Error handling packet: {}", e);
                                }
                                if self.closed {
                                    break;
                                }
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                line = lines.next_line() => {
                    match line? {
                        Some(line) if line.trim() == "/quit" => break,
                        Some(line) if line.trim().is_empty() => {},
                        Some(line) => {
                            if let Err(e) = self.send_line(line.trim()).await {
                                error!("Error sending chat: {}", e);
                            }
                        },
                        None => break,
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if self.connected {
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                    }
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        Ok(())
    }
}
