//! # Chat Client Library
//!
//! Terminal client for the signed chat relay. Lines typed by the player are
//! signed with the player's chat key, chained to the previous message, and
//! sent together with an acknowledgement of the messages the player has
//! seen. Relayed messages are checked against each sender's chain before they
//! are shown.
//!
//! ## Module Organization
//!
//! ### Chat Module (`chat`)
//! Transport-free chat state:
//! - Local session and message encoder
//! - Last-seen tracker and signature cache, mirroring the server
//! - One chain validator per known player
//!
//! ### Network Module (`network`)
//! UDP connection handling, heartbeats and the stdin loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::chat::ChatClient;
//! use client::network::Client;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let chat = ChatClient::new(Uuid::new_v4());
//!     let mut client = Client::new("127.0.0.1:8080", "alex".to_string(), chat, None).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod network;
