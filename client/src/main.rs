use clap::Parser;
use client::chat::ChatClient;
use client::network::Client;
use log::info;
use shared::session::KeyAuthority;
use shared::{epoch_seconds, ChatKeyPair, LocalChatSession};
use uuid::Uuid;

/// Lifetime of self-certified development keys
const DEV_KEY_LIFETIME_SECS: u64 = 24 * 60 * 60;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Player name shown to others
    #[arg(short = 'n', long)]
    name: String,

    /// Player identity, random if not given
    #[arg(short = 'p', long)]
    profile_id: Option<Uuid>,

    /// Hex-encoded 32-byte seed of a development key authority. Used to
    /// certify this player's chat key and to verify everyone else's.
    #[arg(short = 'a', long)]
    authority_seed: Option<String>,
}

fn parse_seed(encoded: &str) -> Result<[u8; 32], Box<dyn std::error::Error>> {
    let bytes = hex::decode(encoded.trim())?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("authority seed must be 32 bytes, got {}", b.len()))?;
    Ok(seed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let profile_id = args.profile_id.unwrap_or_else(Uuid::new_v4);

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let mut chat = ChatClient::new(profile_id);
    let mut session_update = None;

    if let Some(seed) = &args.authority_seed {
        let authority = KeyAuthority::from_seed(&parse_seed(seed)?);
        info!(
            "Using development authority {}",
            hex::encode(authority.public_key().as_bytes())
        );

        let keys = ChatKeyPair::generate();
        let data = authority.issue(
            profile_id,
            &keys.public_key(),
            epoch_seconds() + DEV_KEY_LIFETIME_SECS,
        );
        chat = chat.with_identity(Box::new(authority.service()));
        session_update = Some(chat.start_session(LocalChatSession::create(keys, data)));
    } else {
        info!("No authority seed given, chatting without signatures");
    }

    let mut client = Client::new(&args.server, args.name, chat, session_update).await?;

    client.run().await?;

    Ok(())
}
