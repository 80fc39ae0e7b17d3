use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use agentdesk_gateway::agents::Coordinator;
use agentdesk_gateway::api::{self, AppState};
use agentdesk_gateway::config::{AppConfig, ServerConfig};
use agentdesk_gateway::domain::repositories::Stores;
use agentdesk_gateway::infrastructure::repositories::{in_memory_stores, postgres_stores};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = ServerConfig::from_env();
    let config = AppConfig::load(&server.config_dir);
    let stores = connect_stores(server.database_url.as_deref()).await?;

    let coordinator = Arc::new(Coordinator::new(stores));
    for definition in config.agents {
        let agent_id = definition.id.clone();
        if let Err(e) = coordinator.register_definition(definition, &config.models) {
            tracing::error!(agent_id = %agent_id, error = %e, "Failed to register agent");
        }
    }
    tracing::info!(agents = coordinator.agents().len(), "Agents registered");

    let poller = coordinator.start_polling(server.poll_interval);

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api::router(AppState::new(Arc::clone(&coordinator)))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], server.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    coordinator.stop_polling(poller).await;
    tracing::info!("Shut down cleanly");
    Ok(())
}

/// PostgreSQL when a URL is configured, otherwise process-local stores
async fn connect_stores(database_url: Option<&str>) -> anyhow::Result<Stores> {
    let Some(database_url) = database_url else {
        tracing::warn!("DATABASE_URL not set, using in-memory stores; tasks are lost on restart");
        return Ok(in_memory_stores());
    };

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    tracing::info!("Database connected successfully");
    Ok(postgres_stores(pool))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
