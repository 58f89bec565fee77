//! CHainGate Server
//!
//! Payment lifecycle engine for crypto checkouts: merchant API, blockchain
//! service callbacks, checkout websockets and merchant webhooks.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use chaingate_core::entities::{ApiKeyTypeName, ModeName};
use chaingate_core::framework::DatabaseProcessor;
use chaingate_core::vault::ApiKeyVault;
use chaingate_sdk::objects::{ApiKeyType, Mode};
use clap::{Parser, Subcommand};
use config::{ConfigLoader, LoadedConfig, get_database_url};
use server::{build_router, run_server};
use shutdown::shutdown_and_notify;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// CHainGate - crypto payment lifecycle engine
#[derive(Parser, Debug)]
#[command(name = "chaingate-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./chaingate-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Hex encoded 32-byte master key, overriding `[vault] master_key`
    #[arg(long, env = "CHAINGATE_MASTER_KEY", hide_env_values = true)]
    master_key: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Issue an API key for a merchant and print it once
    IssueKey {
        #[arg(long)]
        merchant: Uuid,
        /// `main` or `test`
        #[arg(long)]
        mode: Mode,
        /// `public` or `secret`
        #[arg(long = "type", default_value = "secret")]
        key_type: ApiKeyType,
    },

    /// Disable an API key
    DisableKey {
        #[arg(long)]
        merchant: Uuid,
        #[arg(long)]
        key: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting chaingate-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = ConfigLoader::new(&args.config, args.listen, args.master_key.clone());
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let db_pool = connect_database(args.migrate).await?;

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(db_pool.clone(), &loaded_config).await,
        Command::IssueKey {
            merchant,
            mode,
            key_type,
        } => {
            issue_key(db_pool.clone(), &loaded_config, merchant, mode, key_type)
                .await
        }
        Command::DisableKey { merchant, key } => {
            disable_key(db_pool.clone(), &loaded_config, merchant, key).await
        }
    };

    // Close database connections gracefully
    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Shutdown complete");

    result
}

async fn connect_database(migrate: bool) -> anyhow::Result<PgPool> {
    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    Ok(db_pool)
}

async fn serve(db_pool: PgPool, config: &LoadedConfig) -> anyhow::Result<()> {
    let state = AppState::new(db_pool, config)?;

    // Evict retired and idle hubs until shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let evictor = tokio::spawn(state.engine.hubs().clone().run_evictor(shutdown_rx));

    let router = build_router(state);

    tracing::info!("Starting HTTP server on {}", config.server.listen);
    let result = run_server(
        router,
        config.server.listen,
        shutdown_and_notify(shutdown_tx),
    )
    .await;

    if let Err(e) = evictor.await {
        tracing::warn!(error = %e, "Hub evictor did not stop cleanly");
    }
    result.map_err(Into::into)
}

fn build_vault(db_pool: PgPool, config: &LoadedConfig) -> anyhow::Result<ApiKeyVault> {
    let store = Arc::new(DatabaseProcessor { pool: db_pool });
    Ok(ApiKeyVault::new(&config.master_key, config.kdf, store)?)
}

async fn issue_key(
    db_pool: PgPool,
    config: &LoadedConfig,
    merchant_id: Uuid,
    mode: Mode,
    key_type: ApiKeyType,
) -> anyhow::Result<()> {
    let vault = build_vault(db_pool, config)?;
    let issued = vault
        .create_key(
            merchant_id,
            ModeName::from(mode),
            ApiKeyTypeName::from(key_type),
        )
        .await?;

    println!("key id:  {}", issued.record.id);
    println!("api key: {}", issued.api_key);
    if issued.record.key_type == ApiKeyTypeName::Secret {
        println!("secret:  {}", issued.secret);
        println!("Store both now; neither can be shown again.");
    }
    Ok(())
}

async fn disable_key(
    db_pool: PgPool,
    config: &LoadedConfig,
    merchant_id: Uuid,
    key_id: Uuid,
) -> anyhow::Result<()> {
    let vault = build_vault(db_pool, config)?;
    vault.disable_key(merchant_id, key_id).await?;
    println!("disabled {key_id}");
    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
