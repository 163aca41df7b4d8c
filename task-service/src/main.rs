use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use service_core::middleware::rate_limit::{create_attempt_rate_limiter, create_ip_rate_limiter};
use service_core::observability::logging::init_tracing;

use task_service::{
    AppState, build_router,
    config::TaskConfig,
    realtime::{ConnectionRegistry, EventRouter, HeartbeatConfig},
    services::{
        CredentialService, ExportService, JwtService, LogNotifier, Notifier, OtpService,
        SmtpNotifier, TenantService, TokenService,
    },
    store::{MemStore, PgStore, Store, create_pool, run_migrations},
};

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = TaskConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| service_core::error::AppError::ConfigError(anyhow::anyhow!(e)))?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting task service"
    );

    // Storage backend: Postgres when configured, in-memory otherwise
    let store: Arc<dyn Store> = match &config.database.url {
        Some(url) => {
            let pool = create_pool(url, &config.database)
                .await
                .map_err(service_core::error::AppError::from)?;
            run_migrations(&pool)
                .await
                .map_err(|e| service_core::error::AppError::DatabaseError(anyhow::anyhow!(e)))?;
            tracing::info!("Database initialized successfully");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            Arc::new(MemStore::new())
        }
    };

    // OTP delivery seam: SMTP when configured, log delivery otherwise
    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpNotifier::new(smtp)?),
        None => {
            tracing::warn!("SMTP not configured; OTP codes go to the log");
            Arc::new(LogNotifier)
        }
    };

    // Attempt counter keyed by (email, source); IP limiters on top
    let attempt_limiter = create_attempt_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );

    let jwt = JwtService::new(&config.jwt);
    let credentials = CredentialService::new(Arc::clone(&store), attempt_limiter);
    let otp = OtpService::new(Arc::clone(&store), notifier, config.otp.ttl_minutes);
    let tokens = TokenService::new(
        Arc::clone(&store),
        jwt,
        credentials,
        otp,
        config.jwt.refresh_token_expiry_days,
        Duration::from_millis(config.database.storage_timeout_ms),
    );
    let tenants = TenantService::new(Arc::clone(&store));
    let exports = ExportService::new(Arc::clone(&store), config.exports.dir.clone().into());

    // Connection registry with its heartbeat reaper
    let registry = Arc::new(ConnectionRegistry::new(HeartbeatConfig {
        interval: Duration::from_secs(config.heartbeat.interval_seconds),
        missed_threshold: config.heartbeat.missed_threshold,
    }));
    let _reaper = registry.spawn_reaper();
    let events = EventRouter::new(Arc::clone(&registry));
    tracing::info!(
        interval_seconds = config.heartbeat.interval_seconds,
        missed_threshold = config.heartbeat.missed_threshold,
        "Connection registry initialized"
    );

    let state = AppState {
        config: config.clone(),
        store,
        tokens,
        tenants,
        exports,
        registry,
        events,
        metrics,
        login_rate_limiter,
        ip_rate_limiter,
    };

    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
