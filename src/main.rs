// region:    --- Imports
use auction_coordinator::app::AppState;
use auction_coordinator::clock::{Clock, SystemClock};
use auction_coordinator::config::Config;
use auction_coordinator::database::DatabaseManager;
use auction_coordinator::handlers;
use auction_coordinator::live_sync::{BroadcastLiveSync, LiveSync};
use auction_coordinator::message_broker::{KafkaManager, KafkaRelay};
use auction_coordinator::scheduler::AuctionScheduler;
use auction_coordinator::store::{MemoryStore, PostgresStore, Store};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
// endregion: --- Imports

// region:    --- Main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    let config = Config::from_env()?;

    // Store
    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            let db_manager = Arc::new(DatabaseManager::connect(database_url, &config).await?);
            if let Err(e) = db_manager.initialize_database(config.database_reset).await {
                error!("{:<12} --> database initialization failed: {:?}", "Main", e);
                return Err(e.into());
            }
            info!("{:<12} --> database initialized", "Main");
            Arc::new(PostgresStore::new(db_manager))
        }
        None => {
            warn!(
                "{:<12} --> DATABASE_URL not set, state is kept in memory",
                "Main"
            );
            Arc::new(MemoryStore::new())
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let live_sync: Arc<dyn LiveSync> = Arc::new(BroadcastLiveSync::default());
    let state = AppState::new(store, Arc::clone(&clock), Arc::clone(&live_sync));

    // Kafka relay
    if let Some(brokers) = &config.kafka_brokers {
        let kafka_manager = KafkaManager::new(brokers)?;
        kafka_manager.create_topic(&config.kafka_topic, 5, 1).await?;
        KafkaRelay::new(kafka_manager.get_producer(), config.kafka_topic.clone())
            .spawn(live_sync.as_ref());
        info!("{:<12} --> Kafka relay started", "Main");
    }

    // Background workers
    Arc::clone(&state.settlement).spawn_reactive(live_sync.as_ref());
    AuctionScheduler::new(
        Arc::clone(&state.registry),
        Arc::clone(&state.settlement),
        clock,
        config.sweep_interval,
    )
    .start();

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        "{:<12} --> Web Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    if let Err(err) = axum::serve(listener, handlers::router(state).into_make_service()).await {
        error!("{:<12} --> Server error: {}", "Main", err);
    }
    Ok(())
}
// endregion: --- Main
