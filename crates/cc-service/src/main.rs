//! Call Controller
//!
//! Real-time core of the internship app's video review calls: session
//! scheduling API, WebSocket signaling relay, and call lifecycle tracking.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment, then initialize tracing
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to PostgreSQL and run migrations
//! 4. Initialize actor system (`MembershipTable`)
//! 5. Build the relay, lifecycle synchronizer and router
//! 6. Serve until SIGINT/SIGTERM, then drain and shut the actors down

use cc_service::actors::{ActorMetrics, MembershipTable};
use cc_service::auth::JwtValidator;
use cc_service::config::{Config, LogFormat};
use cc_service::lifecycle::LifecycleSynchronizer;
use cc_service::observability::health::HealthState;
use cc_service::registry::{PgSessionRegistry, SessionRegistry};
use cc_service::routes::{self, init_metrics_recorder, AppState};
use cc_service::signaling::SignalingRelay;
use common::secret::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Per-statement timeout applied to every pooled connection.
const DB_STATEMENT_TIMEOUT_SECONDS: u32 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Config decides the log format, so load it before tracing
    let config = Config::from_env();
    init_tracing(
        config
            .as_ref()
            .map_or(LogFormat::Text, |config| config.log_format),
    );

    info!("Starting Call Controller");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        cc_id = %config.cc_id,
        bind_address = %config.bind_address,
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        ws_ping_interval_seconds = config.ws_ping_interval_seconds,
        ws_idle_timeout_seconds = config.ws_idle_timeout_seconds,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let jwt_validator = Arc::new(
        JwtValidator::new(
            &config.jwt_public_key,
            Duration::from_secs(config.jwt_clock_skew_seconds),
        )
        .map_err(|e| {
            error!("Invalid JWT public key: {}", e);
            e
        })?,
    );

    info!("Connecting to database...");
    let db_url_with_timeout = add_query_timeout(
        config.database_url.expose_secret(),
        DB_STATEMENT_TIMEOUT_SECONDS,
    );
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_url_with_timeout)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;
    info!("Database connection established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            e
        })?;
    info!("Database migrations applied");

    let registry: Arc<dyn SessionRegistry> = Arc::new(PgSessionRegistry::new(db_pool.clone()));

    let actor_metrics = ActorMetrics::new();
    let membership = MembershipTable::new(config.cc_id.clone(), Arc::clone(&actor_metrics));
    info!("Actor system initialized");

    let lifecycle = LifecycleSynchronizer::new(Arc::clone(&registry));
    let relay = SignalingRelay::new(Arc::clone(&registry), membership.clone(), lifecycle);

    let health = Arc::new(HealthState::new());
    let bind_address = config.bind_address.clone();
    let drain_seconds = config.drain_seconds;

    let state = Arc::new(AppState {
        registry,
        relay,
        config,
        health: Arc::clone(&health),
        pool: Some(db_pool),
        jwt_validator,
        actor_metrics,
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    health.set_ready();
    info!("Call Controller listening on {}", addr);

    let shutdown_health = Arc::clone(&health);
    let shutdown_membership = membership.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;

        // Mark as not ready immediately so load balancers stop routing here
        shutdown_health.set_not_ready();

        if drain_seconds > 0 {
            warn!("Draining connections for {} seconds...", drain_seconds);
            tokio::time::sleep(Duration::from_secs(drain_seconds)).await;
            info!("Drain period complete");
        }

        // Cancels every room and every open signaling connection
        if let Err(e) = shutdown_membership.shutdown().await {
            warn!(error = %e, "Actor system shutdown error");
        }
    })
    .await?;

    info!("Call Controller shutdown complete");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cc_service=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}options=-c%20statement_timeout%3D{timeout_secs}s")
}
