use roomsync::{
    FileStore, LocalCache, RuntimeMode, StateSynchronizerBuilder, SyncOptions, Visibility,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .init();

    let options = SyncOptions {
        mode: RuntimeMode::Demo,
        demo_update_interval: Duration::from_secs(1),
        ..SyncOptions::from_env()
    };

    // Cached rooms survive restarts, so a second run starts from the same layout.
    let cache_dir = std::env::temp_dir().join("roomsync-demo");
    let cache = LocalCache::new(Arc::new(FileStore::new(&cache_dir)))
        .with_ttls(options.room_cache_ttl, options.label_cache_ttl);

    let sync = StateSynchronizerBuilder::new(options).cache(cache).build();
    sync.store().set_selected_hotel(Some("hotel2".to_string())).await;
    sync.connect().await?;

    let mut updates = sync.subscribe().await;
    for _ in 0..5 {
        if let Some(envelope) = updates.recv().await {
            println!("{} {}", envelope.kind, envelope.payload);
        }
    }

    println!("Hiding the view for two seconds...");
    sync.set_visibility(Visibility::Hidden);
    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("State while hidden: {}", sync.connection_state());

    sync.set_visibility(Visibility::Visible);
    tokio::time::sleep(Duration::from_secs(3)).await;

    for room in sync.store().rooms().await {
        println!(
            "{:>4} {:<9} {}{}",
            room.id,
            room.label,
            if room.is_vacant { "vacant" } else { "occupied" },
            if room.is_inactive { " (inactive)" } else { "" }
        );
    }

    sync.disconnect().await?;
    Ok(())
}
