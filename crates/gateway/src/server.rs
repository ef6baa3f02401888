use std::{net::SocketAddr, time::Duration};

use {
    axum::{
        Json, Router,
        extract::State,
        response::IntoResponse,
        routing::get,
    },
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use {
    mediafetch_config::{MediafetchConfig, Severity, validate},
    mediafetch_fetch::FetchService,
    mediafetch_media::cleanup::spawn_cleanup_task,
};

use crate::{routes, state::AppState};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the router (shared between production startup and tests).
pub fn build_gateway_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/fetch",
            get(routes::fetch_get).post(routes::fetch_post),
        )
        .route("/api/info", get(routes::info))
        .route("/api/downloads", get(routes::list_downloads))
        .route("/downloads/{filename}", get(routes::serve_download))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server and run until Ctrl-C.
pub async fn start_gateway(config: MediafetchConfig) -> anyhow::Result<()> {
    let checked = validate::check_config(&config);
    if checked.has_errors() {
        let problems: Vec<String> = checked
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| format!("{}: {}", d.path, d.message))
            .collect();
        anyhow::bail!("invalid configuration: {}", problems.join("; "));
    }

    let service = FetchService::from_config(&config)?;
    service.store().ensure_dir().await?;

    let downloader = match service.downloader().version().await {
        Ok(version) => format!("{} {version}", service.downloader().program()),
        Err(e) => {
            warn!(error = %e, "yt-dlp is not runnable; fetches will fail");
            format!("{} (unavailable)", service.downloader().program())
        },
    };

    let downloads = &config.downloads;
    let cleanup = (downloads.max_age_hours > 0 && downloads.cleanup_interval_minutes > 0).then(|| {
        spawn_cleanup_task(
            service.store().clone(),
            Duration::from_secs(downloads.max_age_hours.saturating_mul(3600)),
            Duration::from_secs(downloads.cleanup_interval_minutes.saturating_mul(60)),
        )
    });

    let listener =
        tokio::net::TcpListener::bind((config.server.bind.as_str(), config.server.port)).await?;
    let addr = listener.local_addr()?;

    let mut lines = vec![
        format!("mediafetch v{}", env!("CARGO_PKG_VERSION")),
        format!("listening on http://{addr}"),
        format!("downloads: {}", service.store().dir().display()),
        format!(
            "workers: {}, timeout: {}s",
            service.workers(),
            service.timeout().as_secs()
        ),
        format!("downloader: {downloader}"),
        format!("extractors: {}", service.extractor_names().join(", ")),
    ];
    if cleanup.is_some() {
        lines.push(format!(
            "cleanup: files older than {}h removed every {}m",
            downloads.max_age_hours, downloads.cleanup_interval_minutes
        ));
    } else {
        lines.push("cleanup: disabled".into());
    }
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let app = build_gateway_app(AppState::new(service));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(handle) = cleanup {
        handle.abort();
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "workers": state.service.workers(),
        "available_workers": state.service.available_workers(),
    }))
}
