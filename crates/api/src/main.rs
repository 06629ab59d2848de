use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use easel_api::config::ServerConfig;
use easel_api::router::build_app_router;
use easel_api::state::AppState;
use easel_engine::{DispatchConfig, Dispatcher};
use easel_storage::{ResultRecorder, TaskStore, UserRegistry};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Dispatch engine ---
    let dispatcher = Dispatcher::start(DispatchConfig::from_env());
    tracing::info!("Dispatch engine started");

    // --- Storage ---
    let store = Arc::new(TaskStore::new());
    let users = Arc::new(UserRegistry::new());

    // Spawn result persistence (writes completed results to the store).
    let recorder = ResultRecorder::new(Arc::clone(&store));
    let recorder_handle = tokio::spawn(recorder.run(dispatcher.subscribe()));

    // --- App state ---
    let state = AppState {
        dispatcher: Arc::clone(&dispatcher),
        store,
        users,
        config: Arc::new(config.clone()),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Close every node connection and stop the signal loop.
    dispatcher.shutdown().await;
    tracing::info!("Dispatch engine shut down");

    recorder_handle.abort();
    tracing::info!("Result recorder stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Install the tracing subscriber.
///
/// `LOG_FORMAT=json` switches to JSON lines for log shippers; anything else
/// keeps the human-readable format.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "easel_api=debug,easel_engine=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server shuts
/// down cleanly whether stopped interactively or by a process manager
/// (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
