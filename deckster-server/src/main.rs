use std::sync::Arc;

use clap::Parser;
use deckster_core::config::StorageBackend;
use deckster_core::{
    DecksterConfig, FileRepository, GeminiConfig, GeminiProvider, MemoryRepository, PgRepository,
    RetrievalProvider, Storage,
};
use deckster_ingest::IngestSettings;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use deckster_server::router::AppContext;
use deckster_server::server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "deckster.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match DecksterConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let (storage, pool): (Arc<dyn Storage>, Option<PgPool>) = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            (Arc::new(MemoryRepository::new()), None)
        }
        StorageBackend::Postgres => {
            let pool = match deckster_core::db::create_pool(&config.database).await {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Failed to connect to database: {}", e);
                    std::process::exit(1);
                }
            };
            if config.database.run_migrations {
                deckster_core::db::migrate(&pool).await?;
            }
            (Arc::new(PgRepository::new(pool.clone())), Some(pool))
        }
    };

    if args.health {
        match &pool {
            Some(pool) => match deckster_core::db::health_check(pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            },
            None => println!("✅ In-memory storage"),
        }
        println!("✅ Deckster health check passed");
        return Ok(());
    }

    let provider: Arc<dyn RetrievalProvider> =
        match GeminiProvider::new(GeminiConfig::from_config(&config)) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                eprintln!("Failed to initialise Gemini provider (is GOOGLE_API_KEY set?): {}", e);
                std::process::exit(1);
            }
        };

    // Pending rows left behind by a previous process
    let stale_after = IngestSettings::from_config(&config.ingestion).stale_after();
    match storage.sweep_stale(stale_after).await {
        Ok(0) => {}
        Ok(n) => tracing::warn!(swept = n, "Marked abandoned pending files as failed"),
        Err(e) => tracing::error!("Stale file sweep failed: {}", e),
    }

    let ctx = Arc::new(AppContext::new(config.clone(), storage, provider, pool));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if config.http.enabled {
        let http_ctx = ctx.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = deckster_server::http::start_http_server(http_ctx, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.socket_path.clone();
    server::run_unix_server(&socket_path, ctx, tx.subscribe()).await?;

    Ok(())
}
