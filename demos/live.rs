use roomsync::{StateSynchronizerBuilder, StaticToken, SyncOptions};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let token = std::env::var("ROOMSYNC_TOKEN").unwrap_or_default();
    let hotel = std::env::var("ROOMSYNC_HOTEL").unwrap_or_else(|_| "hotel1".to_string());

    let sync = StateSynchronizerBuilder::new(SyncOptions::from_env())
        .token_source(Arc::new(StaticToken::new(token)))
        .build();
    sync.store().set_selected_hotel(Some(hotel.clone())).await;

    println!("Connecting to {} for {}...", sync.options().endpoint, hotel);
    sync.connect().await?;

    let mut updates = sync.subscribe().await;
    let mut states = sync.watch_state();
    loop {
        tokio::select! {
            Some(envelope) = updates.recv() => {
                let state = sync.store().snapshot().await;
                let vacant = state.rooms.iter().filter(|r| r.is_vacant).count();
                println!("{:<14} {} rooms, {} vacant", envelope.kind, state.rooms.len(), vacant);
            }
            Ok(()) = states.changed() => {
                println!("Connection is now {}", *states.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("Disconnecting...");
    sync.disconnect().await?;
    Ok(())
}
