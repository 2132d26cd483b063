//! Liquidata Server - listing, map and dashboard views over live
//! liquidation notices.

use liquidata_engine::{RemoteStore, RowSchema, Session};
use liquidata_server::config::Config;
use liquidata_server::db::{self, PgStore};
use liquidata_server::{build_router, feed, AppState, SharedSession};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "liquidata_server=debug,liquidata_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Liquidata Server on {}:{}", config.host, config.port);

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    // Bind the record cache to the table and follow its changes
    let store: Arc<dyn RemoteStore> = Arc::new(PgStore::new(
        pool,
        config.record_table.clone(),
        config.feed_channel.clone(),
    ));
    let schema = RowSchema {
        table: config.record_table.clone(),
        ..RowSchema::entreprise()
    };
    let session: SharedSession = Arc::new(Session::new(store).with_schema(schema));

    let state = AppState::new(session.clone(), config.clone());
    let _snapshots = state.broadcast_snapshots();

    let feed_task = feed::start(&session).await?;
    tracing::info!(
        records = session.snapshot().len(),
        "Record cache loaded"
    );
    tokio::spawn(feed::supervise(session, feed_task));

    let app = build_router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
