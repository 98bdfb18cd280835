//! Minimal voice session wired to the local platform adapters.
//!
//! ```sh
//! COLLOQUY_URL=wss://host/session COLLOQUY_TOKEN=... \
//!     cargo run --example voice_session
//! ```

use std::sync::Arc;

use colloquy_client::adapters::{AudioThread, MpegDecoder, WsConnector};
use colloquy_client::core::config::ClientOptions;
use colloquy_client::core::ports::{MemoryKeyValueStore, StaticTokenProvider};
use colloquy_client::{CachedTokenProvider, ClientDeps, ClientEvent, ConversationClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,colloquy_client=debug".into()),
        )
        .init();

    let url = std::env::var("COLLOQUY_URL")?;
    let token = std::env::var("COLLOQUY_TOKEN")?;

    let audio = Arc::new(AudioThread::spawn()?);
    let clock = Arc::new(audio.clock());
    let tokens = Arc::new(CachedTokenProvider::new(
        Arc::new(StaticTokenProvider::new(token)),
        Arc::new(MemoryKeyValueStore::new()),
    ));

    let options = ClientOptions::new(url, "demo", "You are a friendly voice assistant.");
    let deps = ClientDeps {
        connector: Arc::new(WsConnector::new()),
        microphone: audio.clone(),
        sink: audio,
        clock,
        decoder: Arc::new(MpegDecoder::new()),
        tokens,
    };

    let (client, mut events) = ConversationClient::spawn(options, deps);
    client.initialize().await?;

    let event_client = client.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::StateChanged { old, new } => {
                    tracing::info!(from = old.name(), to = new.name(), "state");
                    // Open the mic again once a turn finishes.
                    if new == colloquy_client::ConversationState::Idle {
                        if let Err(e) = event_client.start_listening().await {
                            tracing::warn!(error = %e, "could not resume listening");
                        }
                    }
                }
                ClientEvent::Text { content } => println!("assistant: {content}"),
                ClientEvent::Error { kind, message } => {
                    tracing::error!(%kind, message, "client error");
                }
                _ => {}
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    client.stop().await?;
    Ok(())
}
