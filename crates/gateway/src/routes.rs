//! Route handlers.
//!
//! Every JSON response carries `ok`; failures add an `error` message and a
//! status code derived from the error kind.

use {
    axum::{
        Json,
        body::Body,
        extract::{
            Path, Query, State,
            rejection::{JsonRejection, QueryRejection},
        },
        http::{StatusCode, header},
        response::{IntoResponse, Response},
    },
    serde::Deserialize,
    tokio_util::io::ReaderStream,
    tracing::{debug, warn},
};

use {
    mediafetch_fetch::{Error, FetchRequest},
    mediafetch_media::mime::mime_for_path,
};

use crate::state::AppState;

/// Query-string form of a fetch request.
#[derive(Debug, Default, Deserialize)]
pub struct FetchQuery {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default, alias = "audioOnly")]
    pub audio_only: Option<bool>,
    #[serde(default, alias = "audioFormat")]
    pub audio_format: Option<String>,
}

impl From<FetchQuery> for FetchRequest {
    fn from(q: FetchQuery) -> Self {
        Self {
            url: q.url.unwrap_or_default(),
            format: q.format,
            audio_only: q.audio_only.unwrap_or(false),
            audio_format: q.audio_format,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InfoQuery {
    #[serde(default)]
    pub url: Option<String>,
}

/// HTTP status for a fetch failure.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidUrl(_) => StatusCode::BAD_REQUEST,
        Error::Unsupported(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::AccessDenied(_)
        | Error::Http { .. }
        | Error::Process { .. }
        | Error::Spawn { .. } => StatusCode::BAD_GATEWAY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Storage(_) | Error::Message { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "ok": false, "error": message.into() })),
    )
        .into_response()
}

fn fetch_error(err: &Error) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        warn!(status = status.as_u16(), error = %err, "request failed");
    } else {
        debug!(status = status.as_u16(), error = %err, "request rejected");
    }
    error_response(status, err.to_string())
}

// ── Fetch ────────────────────────────────────────────────────────────────────

/// `POST /api/fetch` with a JSON body.
pub async fn fetch_post(
    State(state): State<AppState>,
    body: Result<Json<FetchRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => run_fetch(&state, request).await,
        Err(rejection) => error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    }
}

/// `GET /api/fetch?url=..&format=..&audio_only=..`
pub async fn fetch_get(
    State(state): State<AppState>,
    query: Result<Query<FetchQuery>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(q)) => run_fetch(&state, q.into()).await,
        Err(rejection) => error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    }
}

async fn run_fetch(state: &AppState, request: FetchRequest) -> Response {
    match state.service.fetch(&request).await {
        Ok(artifact) => Json(serde_json::json!({ "ok": true, "artifact": artifact })).into_response(),
        Err(e) => fetch_error(&e),
    }
}

// ── Info ─────────────────────────────────────────────────────────────────────

/// `GET /api/info?url=..`
pub async fn info(
    State(state): State<AppState>,
    query: Result<Query<InfoQuery>, QueryRejection>,
) -> Response {
    let url = match query {
        Ok(Query(q)) => q.url.unwrap_or_default(),
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    match state.service.info(&url).await {
        Ok(info) => Json(serde_json::json!({ "ok": true, "info": info })).into_response(),
        Err(e) => fetch_error(&e),
    }
}

// ── Downloads ────────────────────────────────────────────────────────────────

/// `GET /api/downloads`
pub async fn list_downloads(State(state): State<AppState>) -> Response {
    match state.service.store().list().await {
        Ok(artifacts) => {
            Json(serde_json::json!({ "ok": true, "artifacts": artifacts })).into_response()
        },
        Err(e) => {
            warn!(error = %e, "failed to list downloads");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        },
    }
}

/// `GET /downloads/{filename}`: stream a finished artifact.
pub async fn serve_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Response {
    let Ok(path) = state.service.store().resolve(&filename) else {
        return error_response(StatusCode::NOT_FOUND, "not found");
    };
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return error_response(StatusCode::NOT_FOUND, "not found");
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to open artifact");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to open file");
        },
    };
    let len = match file.metadata().await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return error_response(StatusCode::NOT_FOUND, "not found"),
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime_for_path(&path).to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}
