//! Shockwire -- command-line driver for the wallet channel.
//!
//! Usage:
//!   shockwire watch                         # Connect and print broadcasts
//!   shockwire --config path.toml status     # Dial once and report status
//!   shockwire send-message <pk> <body>      # One correlated command

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use shockwire_client::correlator::new_token;
use shockwire_client::quic::QuicConnector;
use shockwire_client::store::EventSink;
use shockwire_client::{
    expand_tilde, Client, ClientConfig, Collaborators, Connector, MemoryStore, TcpConnector,
};
use shockwire_crypto::{key_fingerprint, EnvelopeCodec, Keyring, SealedBoxCipher};

#[derive(Parser)]
#[command(name = "shockwire", about = "Encrypted event channel to a wallet node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.shockwire/config.toml")]
    config: String,

    /// Override the node URL from the config
    #[arg(long)]
    node: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stay connected and print broadcast events
    Watch,
    /// Dial once and report channel status
    Status,
    /// Send a chat message
    SendMessage {
        recipient_public_key: String,
        body: String,
    },
    /// Send a payment
    SendPayment {
        recipient_public_key: String,
        amount: u64,
        #[arg(long, default_value = "")]
        memo: String,
    },
    /// Update the profile bio
    SetBio { bio: String },
    /// Send a handshake request
    Handshake {
        recipient_public_key: String,
        /// Opening message to send along with the request
        #[arg(long)]
        message: Option<String>,
    },
    /// Remove a contact
    DisconnectContact { public_key: String },
}

/// Prints every broadcast, then hands it to the backing store.
struct PrintingSink {
    inner: Arc<MemoryStore>,
}

impl EventSink for PrintingSink {
    fn on_broadcast(&self, event: &str, data: Value) {
        println!("{event} {data}");
        self.inner.on_broadcast(event, data);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shockwire_client=info,shockwire_crypto=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = ClientConfig::load_or_default(&config_path)?;

    let device_id = cfg
        .node
        .device_id
        .clone()
        .unwrap_or_else(new_token);
    let store = Arc::new(MemoryStore::new(device_id));
    store.set_node_url(cli.node.clone().or_else(|| cfg.node.url.clone()));
    store.set_token(cfg.session.token.clone());
    store.set_remote_public_key(cfg.session.remote_public_key.clone());

    // Local session key
    let keyring = Arc::new(Keyring::new());
    let session_id = match (&cfg.session.session_id, &cfg.session.session_secret) {
        (Some(id), Some(secret)) => {
            let public = keyring.insert(id, secret)?;
            tracing::info!(session = %id, public = %key_fingerprint(&public), "shockwire: session loaded");
            id.clone()
        }
        _ => {
            let (id, public) = keyring.generate_session();
            tracing::info!(session = %id, public = %public, "shockwire: ephemeral session generated");
            id
        }
    };
    store.set_session_id(Some(session_id));

    let cipher = Arc::new(SealedBoxCipher::new(keyring));
    let codec = EnvelopeCodec::new(cipher, store.clone()).with_bypass(cfg.crypto.disable_encryption);

    let connector: Arc<dyn Connector> = match cfg.node.transport.as_str() {
        "quic" => Arc::new(QuicConnector::new(cfg.connect_timeout())?),
        _ => Arc::new(TcpConnector::new(cfg.connect_timeout())),
    };

    let mut collab = Collaborators::in_memory(store.clone());
    if matches!(cli.command, Commands::Watch) {
        collab.events = Arc::new(PrintingSink {
            inner: store.clone(),
        });
    }

    let client = Client::start(cfg.channel_settings()?, connector, collab, codec);

    let result = run(&cli.command, &client).await;
    client.shutdown().await;
    result
}

async fn run(command: &Commands, client: &Client) -> anyhow::Result<()> {
    if let Commands::Status = command {
        let outcome = client.connect().await;
        println!("status: {}", client.channel.status());
        if let Err(e) = outcome {
            println!("last error: {e}");
        }
        return Ok(());
    }

    client.connect().await?;
    let commands = &client.commands;

    match command {
        Commands::Watch => {
            let mut status = client.channel.subscribe_status();
            loop {
                tokio::select! {
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *status.borrow_and_update();
                        eprintln!("-- channel {current}");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shockwire: interrupted, shutting down");
                        break;
                    }
                }
            }
        }
        Commands::Status => {}
        Commands::SendMessage {
            recipient_public_key,
            body,
        } => {
            commands.send_message(recipient_public_key, body).await?;
            println!("sent");
        }
        Commands::SendPayment {
            recipient_public_key,
            amount,
            memo,
        } => {
            commands
                .send_payment(recipient_public_key, *amount, memo)
                .await?;
            println!("payment accepted");
        }
        Commands::SetBio { bio } => {
            commands.set_bio(bio).await?;
            println!("bio updated");
        }
        Commands::Handshake {
            recipient_public_key,
            message,
        } => {
            match message {
                Some(msg) => {
                    commands
                        .send_handshake_request_with_initial_msg(recipient_public_key, msg)
                        .await?;
                    // Let the delayed sent-requests refresh go out
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                None => commands.send_handshake_request(recipient_public_key).await?,
            }
            println!("handshake sent");
        }
        Commands::DisconnectContact { public_key } => {
            commands.disconnect_contact(public_key).await?;
            println!("contact removed");
        }
    }
    Ok(())
}
