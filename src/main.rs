// HTTP print server driving a label printer through its command-line driver.

use actix_web::middleware::{self, TrailingSlash};
use actix_web::{web, App, HttpServer};
use tracing::{error, info};

use questhost_printserver::routes;
use questhost_printserver::{AppError, AppState, Config};

// ============================================================================
// Shutdown Handling
// ============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

fn startup_error(context: &str, err: AppError) -> std::io::Error {
    error!("{}: {}", context, err);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, err))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // ========================================
    // Phase 1: Basic Initialization
    // ========================================

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting print server");

    // ========================================
    // Phase 2: Configuration & State Setup
    // ========================================

    let config = Config::from_env()
        .map_err(|e| startup_error("Failed to load configuration", e.into()))?;
    let socket_addr = config
        .socket_addr()
        .map_err(|e| startup_error("Invalid bind address", e.into()))?;

    info!("Configuration loaded successfully");
    info!("Server will bind to: {}", socket_addr);

    let app_state = AppState::new(config)
        .map_err(|e| startup_error("Failed to initialize application", e))?;

    // ========================================
    // Phase 3: HTTP Server Setup
    // ========================================

    let app_state_for_server = app_state.clone();

    let server = HttpServer::new(move || {
        let state = app_state_for_server.clone();
        App::new()
            // Middleware
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::new(TrailingSlash::Always))
            // Application state
            .app_data(web::Data::new(state.config.clone()))
            .app_data(web::Data::new(state.templates.clone()))
            .app_data(web::Data::from(state.orchestrator.clone()))
            .app_data(web::Data::new(state.health.clone()))
            .app_data(web::JsonConfig::default().error_handler(routes::json_error_handler))
            // Routes
            .service(routes::health)
            .service(routes::print_ticket)
            .service(routes::upload_template)
    })
    .bind(socket_addr)?
    .shutdown_timeout(30)
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(async move { server.await });

    info!("Print server started on {}", socket_addr);

    // ========================================
    // Phase 4: Run Until Shutdown
    // ========================================

    shutdown_signal().await;

    info!("Initiating graceful shutdown...");

    // Running jobs keep the device until they reach a terminal state
    server_handle.stop(true).await;

    server_task.await.map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Server task error: {}", e),
        )
    })??;

    info!("Graceful shutdown complete");
    Ok(())
}
