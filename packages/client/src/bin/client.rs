//! Banstage lobby client.
//!
//! Joins a ban-stage lobby, tracks presence, and logs roster and ban-state
//! changes until Ctrl+C. Ban-state updates ride the WebSocket channel by
//! default, or the SSE stream with `--sse`.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin banstage-client -- --name Alice
//! cargo run --bin banstage-client -- --lobby ABC-123 --name Bob --sse
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use banstage_client::infrastructure::http::HttpVoteStore;
use banstage_client::infrastructure::sse::SseTransport;
use banstage_client::infrastructure::websocket::WebSocketTransport;
use banstage_client::profile::{load_display_name, save_display_name};
use banstage_client::session::{LobbySession, SessionConfig, SessionHandles};
use banstage_client::transport::ChannelTransport;
use banstage_shared::logger::setup_logger;
use banstage_shared::time::SystemClock;

#[derive(Parser, Debug)]
#[command(name = "banstage-client")]
#[command(about = "Join a ban-stage lobby and log realtime activity", long_about = None)]
struct Args {
    /// Realtime server URL
    #[arg(long, default_value = "ws://127.0.0.1:8787")]
    server_url: String,

    /// HTTP API URL (item/vote store, SSE stream)
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    api_url: String,

    /// Lobby code to join (XXX-XXX); a fresh one is generated when omitted
    #[arg(short = 'l', long)]
    lobby: Option<String>,

    /// Display name; falls back to the persisted profile when omitted
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Receive ban-state updates over the SSE stream instead of WebSocket
    #[arg(long)]
    sse: bool,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let clock = SystemClock;
    let profile_path = PathBuf::from(".banstage-profile.json");

    let display_name = match args.name {
        Some(name) => {
            save_display_name(&profile_path, &name, &clock)?;
            Some(name)
        }
        None => load_display_name(&profile_path, &clock),
    };

    let presence_transport: Arc<dyn ChannelTransport> =
        Arc::new(WebSocketTransport::new(args.server_url.clone()));
    let update_transport: Arc<dyn ChannelTransport> = if args.sse {
        Arc::new(SseTransport::new(args.api_url.clone()))
    } else {
        Arc::clone(&presence_transport)
    };

    let mut config = SessionConfig::new(uuid::Uuid::new_v4().to_string());
    config.lobby_code = args.lobby;
    config.display_name = display_name;

    let session = LobbySession::join(
        SessionHandles {
            presence_transport,
            update_transport,
            store: Arc::new(HttpVoteStore::new(args.api_url)),
        },
        config,
    )
    .await?;

    println!(
        "\nJoined lobby {}. Share this code with other players. Press Ctrl+C to leave.\n",
        session.lobby_code()
    );

    let mut presence = session.presence_view();
    let mut ban_list = session.ban_list_view();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = presence.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = presence.borrow().clone();
                if view.is_reconnecting {
                    tracing::warn!("Presence channel reconnecting...");
                } else if let Some(error) = &view.last_error {
                    tracing::warn!("Presence error: {}", error);
                } else {
                    let names: Vec<String> = view
                        .connected_users
                        .iter()
                        .map(|u| u.name.clone().unwrap_or_else(|| u.id.clone()))
                        .collect();
                    tracing::info!("{} online: {}", names.len(), names.join(", "));
                }
            }
            changed = ban_list.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = ban_list.borrow().clone();
                if view.loading {
                    continue;
                }
                if let Some(error) = &view.error {
                    tracing::warn!("Ban list error: {}", error);
                }
                let banned: Vec<String> = view
                    .items
                    .iter()
                    .filter(|i| i.is_banned)
                    .map(|i| {
                        format!(
                            "{} (by {})",
                            i.name,
                            i.banned_by.as_deref().unwrap_or("unknown")
                        )
                    })
                    .collect();
                tracing::info!(
                    "{}/{} banned: {}",
                    banned.len(),
                    view.items.len(),
                    banned.join(", ")
                );
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
