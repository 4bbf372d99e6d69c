use std::{net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc};

use {
    anyhow::Context as _,
    axum::{
        Router,
        extract::{ConnectInfo, Query, State, WebSocketUpgrade},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::{delete, get, post},
    },
    serde::Deserialize,
    sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    tower_http::{
        cors::{Any, CorsLayer},
        services::ServeDir,
    },
    tracing::{info, warn},
    wabridge_common::SectorId,
    wabridge_config::{BlobBackend, WabridgeConfig},
    wabridge_media::{FfmpegAudio, blob},
    wabridge_notify::NotificationHub,
    wabridge_store::Stores,
    wabridge_whatsapp::{BridgeContext, ClientFactory, NoopClientFactory, SessionRegistry},
};

use crate::{api, state::GatewayState, ws::handle_connection};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
///
/// `media_dir` is served under `/media` when the local blob backend is used.
pub fn build_gateway_app(state: Arc<GatewayState>, media_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route("/api/sectors/{id}/status", get(api::status_handler))
        .route("/api/sectors/{id}/qrcode", get(api::qrcode_handler))
        .route("/api/sectors/{id}/messages", post(api::send_text_handler))
        .route("/api/sectors/{id}/images", post(api::send_image_handler))
        .route("/api/sectors/{id}/audios", post(api::send_audio_handler))
        .route("/api/sectors/{id}/documents", post(api::send_document_handler))
        .route("/api/sectors/{id}/typing", post(api::send_typing_handler))
        .route(
            "/api/sectors/{id}/contacts/{number}/viewed",
            post(api::mark_viewed_handler),
        )
        .route(
            "/api/sectors/{id}/contacts/viewed",
            get(api::viewed_status_handler),
        )
        .route("/api/sectors/{id}/session", delete(api::close_session_handler));

    let router = match media_dir {
        Some(dir) => router.nest_service("/media", ServeDir::new(dir)),
        None => router,
    };

    router.layer(cors).with_state(state)
}

/// Wire stores, hub, media pipeline and session registry from config.
/// Returns the gateway state plus the directory to serve under `/media`.
pub async fn bootstrap(
    config: &WabridgeConfig,
    factory: Arc<dyn ClientFactory>,
) -> anyhow::Result<(Arc<GatewayState>, Option<PathBuf>)> {
    let options = SqliteConnectOptions::from_str(&config.database.url)
        .with_context(|| format!("invalid database url {}", config.database.url))?
        .busy_timeout(config.database.busy_timeout());
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;
    wabridge_store::schema::init(&pool)
        .await
        .context("failed to initialize schema")?;

    let data_dir = wabridge_config::data_dir();
    let media_root = config
        .blob
        .local_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("media"));
    let blob = blob::from_config(&config.blob, media_root.clone())?;
    let media_dir = (config.blob.backend == BlobBackend::Local).then_some(media_root);

    let hub = Arc::new(NotificationHub::new());
    let sessions_dir = config
        .storage
        .data_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("sessions"));
    let ctx = BridgeContext::new(
        Stores::new(pool),
        hub,
        blob,
        Arc::new(FfmpegAudio::new(&config.media)),
        factory,
    )
    .with_sessions_config(config.sessions.clone())
    .with_storage(sessions_dir, config.storage.reset_on_start);

    let registry = Arc::new(SessionRegistry::new(Arc::new(ctx)));
    Ok((GatewayState::new(registry), media_dir))
}

/// Start the gateway with the transport linked into this build. Without
/// one this fails before opening the database or binding a port.
pub async fn start_gateway(config: WabridgeConfig) -> anyhow::Result<()> {
    start_gateway_with(config, Arc::new(NoopClientFactory)).await
}

fn ensure_transport(factory: &dyn ClientFactory) -> anyhow::Result<()> {
    if !factory.is_available() {
        anyhow::bail!(
            "no WhatsApp transport is linked into this build; embed the gateway with \
             start_gateway_with and a ClientFactory"
        );
    }
    Ok(())
}

/// Start the gateway HTTP + WebSocket server with a concrete protocol
/// transport. Returns after ctrl-c once every session has been closed.
pub async fn start_gateway_with(
    config: WabridgeConfig,
    factory: Arc<dyn ClientFactory>,
) -> anyhow::Result<()> {
    ensure_transport(factory.as_ref())?;
    let (state, media_dir) = bootstrap(&config, factory).await?;
    let app = build_gateway_app(Arc::clone(&state), media_dir.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let ctx = state.registry.context();
    let lines = [
        format!("wabridge gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("sessions: {}", ctx.data_dir().display()),
        match &media_dir {
            Some(dir) => format!("media: {} (served at /media)", dir.display()),
            None => "media: http object store".to_string(),
        },
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.registry.close_all().await;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    info!("shutdown requested");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "hostname": state.hostname,
        "sessions": state.registry.live_count().await,
        "subscribers": state.hub.total_subscribers(),
    }))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    sector_id: Option<String>,
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<WsParams>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let Some(raw) = params.sector_id else {
        return (StatusCode::BAD_REQUEST, "missing sector_id parameter").into_response();
    };
    let Ok(sector_id) = raw.trim().parse::<SectorId>() else {
        return (StatusCode::BAD_REQUEST, "invalid sector_id parameter").into_response();
    };
    info!(sector_id, remote = %addr, "subscriber upgrade");
    ws.on_upgrade(move |socket| handle_connection(socket, state, sector_id))
}
