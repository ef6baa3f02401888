//! End-to-end tests against a real listener, with a shell script standing in
//! for `yt-dlp`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, os::unix::fs::PermissionsExt, path::Path, time::Duration};

use tokio::net::TcpListener;

use {
    mediafetch_fetch::{FetchService, extractors::Extractors, ytdlp::YtDlp},
    mediafetch_config::MediafetchConfig,
    mediafetch_gateway::{AppState, build_gateway_app, start_gateway},
    mediafetch_media::DownloadStore,
};

/// Writes `.mp4`, or the `--audio-format` extension when audio extraction is requested.
const FAKE_OK: &str = r#"#!/bin/sh
ext=mp4
while [ $# -gt 0 ]; do
  case "$1" in
    -o) shift; out="$1" ;;
    --audio-format) shift; ext="$1" ;;
    --dump-single-json) echo '{"title":"Clip","uploader":"Someone","duration":42}'; exit 0 ;;
  esac
  shift
done
path=$(printf '%s' "$out" | sed "s/%(ext)s/$ext/")
printf 'ID3fake-audio' > "$path"
echo "$path"
"#;

const FAKE_SLOW: &str = "#!/bin/sh\nsleep 10\n";

struct TestServer {
    addr: SocketAddr,
    _tmp: tempfile::TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

fn write_script(dir: &Path, body: &str) -> String {
    let path = dir.join("yt-dlp");
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

async fn start_server(script: &str, timeout: Duration) -> TestServer {
    let tmp = tempfile::tempdir().unwrap();
    let program = write_script(tmp.path(), script);
    let service = FetchService::new(
        DownloadStore::new(tmp.path().join("downloads")),
        YtDlp::new(program),
        reqwest::Client::new(),
        Extractors::new(),
        2,
        timeout,
    );
    let app = build_gateway_app(AppState::new(service));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    TestServer { addr, _tmp: tmp }
}

#[tokio::test]
async fn health_reports_workers() {
    let server = start_server(FAKE_OK, Duration::from_secs(5)).await;
    let body: serde_json::Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["workers"], 2);
    assert_eq!(body["available_workers"], 2);
}

#[tokio::test]
async fn post_fetch_then_download() {
    let server = start_server(FAKE_OK, Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/api/fetch"))
        .json(&serde_json::json!({ "url": "https://example.com/watch?v=1", "audioOnly": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
    let artifact = &body["artifact"];
    assert_eq!(artifact["contentType"], "audio/mpeg");
    let url = artifact["url"].as_str().unwrap();
    assert!(url.starts_with("/downloads/"));

    let file = client.get(server.url(url)).send().await.unwrap();
    assert_eq!(file.status(), 200);
    assert_eq!(file.headers()["content-type"], "audio/mpeg");
    assert_eq!(file.bytes().await.unwrap().as_ref(), b"ID3fake-audio");

    let listed: serde_json::Value = client
        .get(server.url("/api/downloads"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["artifacts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn post_fetch_accepts_snake_case_fields() {
    let server = start_server(FAKE_OK, Duration::from_secs(5)).await;
    let resp = reqwest::Client::new()
        .post(server.url("/api/fetch"))
        .json(&serde_json::json!({
            "url": "https://example.com/watch?v=2",
            "audio_only": true,
            "audio_format": "mp3",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["artifact"]["filename"].as_str().unwrap().ends_with(".mp3"));
}

#[tokio::test]
async fn get_fetch_with_query() {
    let server = start_server(FAKE_OK, Duration::from_secs(5)).await;
    let resp = reqwest::Client::new()
        .get(server.url("/api/fetch"))
        .query(&[("url", "https://example.com/a"), ("audio_only", "true")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["artifact"]["filename"].as_str().unwrap().ends_with(".mp3"));
}

#[tokio::test]
async fn invalid_url_is_bad_request() {
    let server = start_server(FAKE_OK, Duration::from_secs(5)).await;
    let resp = reqwest::Client::new()
        .post(server.url("/api/fetch"))
        .json(&serde_json::json!({ "url": "javascript:alert(1)" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().contains("invalid URL"));
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let server = start_server(FAKE_OK, Duration::from_secs(5)).await;
    let resp = reqwest::Client::new()
        .post(server.url("/api/fetch"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn slow_download_times_out() {
    let server = start_server(FAKE_SLOW, Duration::from_millis(500)).await;
    let resp = reqwest::Client::new()
        .post(server.url("/api/fetch"))
        .json(&serde_json::json!({ "url": "https://example.com/slow" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn info_returns_metadata() {
    let server = start_server(FAKE_OK, Duration::from_secs(5)).await;
    let body: serde_json::Value = reqwest::Client::new()
        .get(server.url("/api/info"))
        .query(&[("url", "https://example.com/v")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["info"]["title"], "Clip");
    assert_eq!(body["info"]["duration"], 42);
}

#[tokio::test]
async fn info_rejects_malformed_query_as_json() {
    let server = start_server(FAKE_OK, Duration::from_secs(5)).await;
    let resp = reqwest::get(server.url("/api/info?url=https://a.example&url=https://b.example"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn unknown_download_is_not_found() {
    let server = start_server(FAKE_OK, Duration::from_secs(5)).await;
    let client = reqwest::Client::new();
    let missing = client
        .get(server.url("/downloads/0123abcd.mp3"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let traversal = client
        .get(server.url("/downloads/..%2Fyt-dlp"))
        .send()
        .await
        .unwrap();
    assert_eq!(traversal.status(), 404);
}

#[tokio::test]
async fn startup_rejects_zero_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = MediafetchConfig::default();
    config.server.bind = "127.0.0.1".into();
    config.server.port = 0;
    config.downloads.dir = tmp.path().join("downloads");
    config.fetch.timeout_secs = 0;

    let err = tokio::time::timeout(Duration::from_secs(5), start_gateway(config))
        .await
        .expect("startup should fail instead of serving")
        .unwrap_err();
    assert!(err.to_string().contains("fetch.timeout_secs"));
}
