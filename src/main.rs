use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use changegate::infrastructure::AppState;
use changegate::{config, db, server};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "changegate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    // --profile overrides PROFILE
    let args: Vec<String> = std::env::args().collect();
    let config = match args.iter().position(|arg| arg == "--profile") {
        Some(pos) if pos + 1 < args.len() => {
            config::Config::from_env_with_profile(args[pos + 1].clone())
        }
        _ => config::Config::from_env(),
    };

    if let Err(e) = run(config).await {
        tracing::error!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run(config: config::Config) -> Result<(), String> {
    let db = db::init_db(&config.database_url)
        .await
        .map_err(|e| format!("Failed to initialize database: {}", e))?;

    let connector = server::connector_from_config(&config).map_err(|e| e.to_string())?;

    // Runs the restart recovery sweep before anything can enqueue
    let state = AppState::new(db, connector)
        .await
        .map_err(|e| format!("Failed to build application state: {}", e))?;

    server::spawn_queue_janitor(
        state.queue.clone(),
        config.queue_retention,
        config.queue_cleanup_interval,
    );

    let app = server::build_router(state, &config.cors_allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("changegate listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("Server error: {}", e))
}
