pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{IpRateLimiter, ip_rate_limit_middleware},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};

use crate::config::TaskConfig;
use crate::realtime::{ConnectionRegistry, EventRouter};
use crate::services::{ExportService, TenantService, TokenService};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: TaskConfig,
    pub store: Arc<dyn Store>,
    pub tokens: TokenService,
    pub tenants: TenantService,
    pub exports: ExportService,
    pub registry: Arc<ConnectionRegistry>,
    pub events: EventRouter,
    pub metrics: PrometheusHandle,
    pub login_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    // Login-shaped routes get their own tighter IP limiter on top of the
    // per-(email, source) attempt counter inside the credential store.
    let login_limiter = state.login_rate_limiter.clone();
    let login_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/verify-otp", post(handlers::auth::verify_otp))
        .layer(from_fn_with_state(login_limiter, ip_rate_limit_middleware));

    // Org-scoped routes: authentication first, then tenant resolution; no
    // handler below runs without both.
    let tenant_routes = Router::new()
        .route(
            "/tasks",
            get(handlers::tasks::list_tasks).post(handlers::tasks::create_task),
        )
        .route(
            "/tasks/:task_id",
            get(handlers::tasks::get_task)
                .patch(handlers::tasks::update_task)
                .delete(handlers::tasks::delete_task),
        )
        .route("/exports", post(handlers::exports::create_export))
        .route("/exports/:job_id", get(handlers::exports::get_export))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::tenant_context_middleware,
        ))
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    let ip_limiter = state.ip_rate_limiter.clone();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/ws", get(realtime::ws_handler))
        .merge(login_routes)
        .merge(tenant_routes)
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .security
                        .allowed_origins
                        .iter()
                        .map(|origin| {
                            origin.parse::<axum::http::HeaderValue>().unwrap_or_else(|e| {
                                tracing::error!(
                                    "Invalid CORS origin '{}': {}. Using fallback.",
                                    origin,
                                    e
                                );
                                axum::http::HeaderValue::from_static("*")
                            })
                        })
                        .collect::<Vec<axum::http::HeaderValue>>(),
                )
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                ]),
        );

    Ok(app)
}

/// Service health check
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<axum::Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        e
    })?;

    Ok(axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
    })))
}
