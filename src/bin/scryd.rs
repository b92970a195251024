use std::sync::Arc;

use clap::Parser;
use scryd::cli::Args;
use scryd::config::{Config, LOG_ENV_VAR};
use scryd::scry::{walker, Scryer};
use scryd::store::EventStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config).and_then(Config::validate) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("scryd: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(config.log_level().to_string().to_lowercase())
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("top directory: {}", config.top_dir.display());
    tracing::info!("database: {}", config.db_dir.display());

    let store = Arc::new(EventStore::open(&config.db_dir).expect("failed to open event store"));

    // register configured directories and reconcile the store with disk
    for scry_dir in &config.dirs {
        let dir = match store
            .get_directory_by_path(&scry_dir.path)
            .await
            .expect("failed to look up directory")
        {
            Some(dir) => dir,
            None => store
                .add_directory(&scry_dir.path)
                .await
                .expect("failed to add directory"),
        };
        let seeded = walker::seed_directory(&store, &config.top_dir, scry_dir, &dir)
            .await
            .expect("failed to seed directory");
        tracing::info!("scrying {:?} ({} nodes seeded)", dir.path, seeded);
    }

    let mut scryer = Scryer::init(config.top_dir.clone(), store.clone(), config.dirs.clone())
        .await
        .expect("failed to init scryer");
    let mut events = scryer
        .take_events()
        .expect("processed event channel already taken");
    scryer.start();

    // drain the observation channel; the sync layer attaches here
    let observer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!(
                "{} {:?} (chain {}, {} bytes)",
                event.kind,
                event.path,
                event.chain_id,
                event.size
            );
        }
    });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    tracing::info!("shutting down");

    scryer.close().await;
    observer.abort();
    if let Err(e) = store.close().await {
        tracing::error!("failed to close store: {}", e);
    }
}
