mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use itinera_core::ServiceConfig;
use itinera_db::{DbConfig, PgPlanStore, create_pool, ensure_database_exists, run_migrations};

use routes::{AppState, build_router};

#[derive(Parser)]
#[command(name = "itinera", about = "Travel plan reconciliation service")]
struct Cli {
    /// Database URL (overrides ITINERA_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database if needed and apply migrations
    DbInit,
    /// Run the HTTP API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Accept creates without title/data (local development only)
        #[arg(long)]
        permissive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db_config = DbConfig::from_env_or(cli.database_url);

    match cli.command {
        Commands::DbInit => {
            ensure_database_exists(&db_config).await?;
            let pool = create_pool(&db_config).await?;
            run_migrations(&pool).await?;
            pool.close().await;
            println!("database initialized");
        }
        Commands::Serve {
            bind,
            port,
            permissive,
        } => {
            let pool = create_pool(&db_config).await?;
            let state = AppState {
                store: Arc::new(PgPlanStore::new(pool)),
                config: ServiceConfig {
                    permissive_default_data: permissive,
                    ..ServiceConfig::default()
                },
            };
            run_serve(state, &bind, port).await?;
        }
    }

    Ok(())
}

async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("itinera serving on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("itinera shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}
