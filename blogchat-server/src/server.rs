use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, Method, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::server::{Config, DatabaseConfig, LogFormat};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    db::migrate,
    middleware::{
        ip_guard::enforce_ip_guard,
        request_context::{RequestContextState, attach_request_context},
    },
    routes::{self, openapi::openapi_routes},
    services::clock::SystemClock,
    tracer,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide Prometheus handle. The first call installs the recorder; if
/// another recorder is already installed the handle still renders, just
/// without this crate's metrics.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(err) = metrics::set_global_recorder(recorder) {
                warn!(error = %err, "metrics recorder already installed");
            }
            handle
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        warn!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates a database connection pool from the given database URL.
///
/// # Arguments
/// * `db` - Database configuration settings.
///
/// # Errors
/// Returns an error if the database connection pool cannot be created.
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect(&db.url)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    Ok(pool)
}

/// Connects to, migrates and checks the database. An empty URL selects the
/// in-memory store and returns `None`.
///
/// # Errors
/// Returns an error if connecting, migrating or the readiness check fails.
pub async fn prepare_database(db: &DatabaseConfig) -> anyhow::Result<Option<sqlx::PgPool>> {
    if db.url.trim().is_empty() {
        warn!("no database configured; messages and bans live in memory only");
        return Ok(None);
    }

    let pool = create_database_pool(db)
        .await
        .context("failed to connect to the database")?;
    migrate::ensure_liveness(&pool)
        .await
        .context("database liveness check failed")?;
    migrate::run(&pool, db).await?;
    migrate::ensure_readiness(&pool)
        .await
        .context("database readiness check failed")?;
    Ok(Some(pool))
}

/// Creates the application state and starts its background work.
pub fn create_app_state(config: Arc<Config>, pool: Option<sqlx::PgPool>) -> Arc<AppState> {
    let state = AppState::new(config, pool, Arc::new(SystemClock));
    let _sweeper = state.ip_guard.clone().spawn_sweeper(state.shutdown.clone());
    Arc::new(state)
}

/// Creates the CORS layer for the application.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    let methods = vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::any())
        .allow_credentials(config.server.cors.allow_credentials)
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// Chat, blog and moderation routes, all behind the IP gate.
pub fn create_api_router(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(routes::chat::create_router_chat())
        .merge(routes::admin::create_router_admin())
        .layer(middleware::from_fn_with_state(
            state.ip_guard.clone(),
            enforce_ip_guard,
        ))
}

/// Creates the main application router with all middleware and routes.
///
/// # Arguments
/// * `state` - Application state to share across handlers.
/// * `metrics_handle` - Prometheus handle rendered at `/metrics`.
pub fn create_app_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let config = state.config.clone();
    let cors = create_cors_layer(&config);
    let context_state = RequestContextState::from_config(&config, state.tokens.clone());

    Router::new()
        .nest("/api", create_api_router(&state))
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .merge(openapi_routes())
        .layer(Extension(metrics_handle))
        .layer(cors)
        .layer(tracer::create_trace_layer())
        .layer(middleware::from_fn_with_state(
            context_state,
            attach_request_context,
        ))
        .with_state(state)
}

/// Resolves on Ctrl-C or when `token` is cancelled.
pub async fn create_shutdown_signal(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "failed to listen for Ctrl-C");
                token.cancelled().await;
            }
        }
        () = token.cancelled() => {}
    }
    info!("Shutting down...");
}

/// Serves `state` on an already bound listener until `shutdown` fires, then
/// stops the hub and the sweeper.
///
/// # Errors
/// Returns an error if the server loop fails.
pub async fn serve_with_listener(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = create_app_router(state.clone(), metrics_handle());
    let result = serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(create_shutdown_signal(shutdown))
    .await;

    state.shutdown().await;
    result
}

/// Starts the backend server and binds it to the configured host and port.
///
/// # Errors
/// Returns an error if the database or the listener cannot be set up.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!("Starting server...");

    let _ = metrics_handle();
    let config = Arc::new(config);
    let pool = prepare_database(&config.db).await?;
    let state = create_app_state(config.clone(), pool);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Listening");

    serve_with_listener(listener, state, CancellationToken::new()).await?;
    Ok(())
}
