//! # Chat Relay Server Library
//!
//! This library provides the server side of the signed chat protocol. The
//! server sits between players: it checks every message against its sender's
//! chain, rebuilds the list of messages the sender acknowledged, and relays the
//! result to every connected player, compressed against that player's
//! signature cache.
//!
//! ## Core Responsibilities
//!
//! ### Chain Enforcement
//! Each player's messages must form an unbroken chain. The server derives the
//! next link itself, so a player cannot skip, replay or reorder a message
//! without its signature failing. A broken chain ends the connection.
//!
//! ### Acknowledgement Tracking
//! For every player the server mirrors the last-seen window and the signature
//! cache the client keeps. A player that acknowledges messages it was never
//! sent, or that stops acknowledging altogether, is disconnected.
//!
//! ### Client Management
//! Handles the complete lifecycle of client connections including:
//! - Connection establishment and player registration
//! - Chat session validation against the configured identity authority
//! - Disconnection handling and timeout cleanup
//!
//! ## Module Organization
//!
//! ### Chat Module (`chat`)
//! The relay rules, independent of any socket. Produces [`chat::Outbound`]
//! work items for the network layer.
//!
//! ### Client Manager Module (`client_manager`)
//! Connected clients and their per-connection chat state.
//!
//! ### Config Module (`config`)
//! Command-line configuration.
//!
//! ### Network Module (`network`)
//! UDP socket handling and the main event loop:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Processes the outgoing packet queue
//! - **Timeout Checker**: Removes inactive connections
//! - **Main Loop**: Feeds packets through the relay and dispatches its output
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let mut server = Server::new(&config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod client_manager;
pub mod config;
pub mod network;
