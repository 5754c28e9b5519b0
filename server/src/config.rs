//! Command-line configuration for the chat server

use clap::Parser;
use shared::session::AuthorityKeyService;
use shared::ChatPublicKey;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Seconds between status log lines
    #[arg(long, default_value = "1")]
    pub status_interval: u64,

    /// Maximum number of concurrent players
    #[arg(short, long, default_value = "32")]
    pub max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(short, long, default_value = "5")]
    pub timeout: u64,

    /// Refuse chat from players without a valid chat session
    #[arg(short, long)]
    pub enforce_secure_chat: bool,

    /// Hex-encoded public key of the authority that certifies player keys.
    /// Without it, chat sessions are ignored.
    #[arg(short, long)]
    pub authority_key: Option<String>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval.max(1))
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Builds the identity service from `--authority-key`, if given.
    pub fn identity_service(&self) -> Result<Option<AuthorityKeyService>, String> {
        let Some(encoded) = &self.authority_key else {
            return Ok(None);
        };
        let bytes = hex::decode(encoded.trim()).map_err(|e| format!("invalid authority key: {e}"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("authority key must be 32 bytes, got {}", b.len()))?;
        Ok(Some(AuthorityKeyService::new(ChatPublicKey::from_bytes(bytes))))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            status_interval: 1,
            max_clients: 32,
            timeout: 5,
            enforce_secure_chat: false,
            authority_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::session::KeyAuthority;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_parse_defaults() {
        let config = ServerConfig::parse_from(["server"]);
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.client_timeout(), Duration::from_secs(5));
        assert_eq!(config.status_interval(), Duration::from_secs(1));
        assert!(!config.enforce_secure_chat);
        assert!(assert_ok!(config.identity_service()).is_none());
    }

    #[test]
    fn test_parse_authority_key() {
        let authority = KeyAuthority::from_seed(&[3; 32]);
        let encoded = hex::encode(authority.public_key().as_bytes());
        let config = ServerConfig::parse_from([
            "server",
            "--enforce-secure-chat",
            "--authority-key",
            encoded.as_str(),
        ]);

        assert!(config.enforce_secure_chat);
        assert!(assert_ok!(config.identity_service()).is_some());
    }

    #[test]
    fn test_parse_status_interval() {
        let config = ServerConfig::parse_from(["server", "--status-interval", "30"]);
        assert_eq!(config.status_interval(), Duration::from_secs(30));

        let config = ServerConfig {
            status_interval: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.status_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_rejects_malformed_authority_key() {
        let config = ServerConfig {
            authority_key: Some("zz".to_string()),
            ..ServerConfig::default()
        };
        assert_err!(config.identity_service());

        let config = ServerConfig {
            authority_key: Some("abcd".to_string()),
            ..ServerConfig::default()
        };
        assert_err!(config.identity_service());
    }
}
