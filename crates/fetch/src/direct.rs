//! Streaming download of a direct media URL.

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use {
    futures::StreamExt,
    reqwest::{Client, StatusCode, header},
    serde::Serialize,
    tokio::{fs::File, io::AsyncWriteExt},
    tracing::{debug, info},
};

use mediafetch_media::{Allocation, mime::extension_for_content_type};

use crate::error::{Context, Error, Result};

pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Downloading,
    Finished,
}

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub status: ProgressStatus,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    /// 0..=100, when the total is known.
    pub percentage: Option<f64>,
    /// Bytes per second since the transfer started.
    pub speed: f64,
}

impl Progress {
    fn new(status: ProgressStatus, downloaded: u64, total: Option<u64>, started: Instant) -> Self {
        let elapsed = started.elapsed().as_secs_f64();
        Self {
            status,
            downloaded_bytes: downloaded,
            total_bytes: total,
            percentage: total
                .filter(|t| *t > 0)
                .map(|t| (downloaded as f64 / t as f64 * 100.0).min(100.0)),
            speed: if elapsed > 0.0 {
                downloaded as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

pub type ProgressFn<'a> = &'a mut (dyn FnMut(&Progress) + Send);

/// Bounds on one direct transfer.
#[derive(Debug, Clone, Copy)]
pub struct DirectLimits {
    /// Headers and body must arrive within this.
    pub timeout: Duration,
    /// Largest body accepted; 0 means no cap.
    pub max_bytes: u64,
}

/// Stream `url` into `allocation`, returning the written path.
pub async fn download_direct(
    client: &Client,
    url: &str,
    allocation: &Allocation,
    limits: DirectLimits,
    progress: ProgressFn<'_>,
) -> Result<PathBuf> {
    tokio::time::timeout(
        limits.timeout,
        transfer(client, url, allocation, limits.max_bytes, progress),
    )
    .await
    .map_err(|_| Error::Timeout(limits.timeout))?
}

fn too_large(max_bytes: u64) -> Error {
    Error::Http {
        status: None,
        message: format!("direct download exceeds the {max_bytes}-byte limit"),
    }
}

async fn transfer(
    client: &Client,
    url: &str,
    allocation: &Allocation,
    max_bytes: u64,
    progress: ProgressFn<'_>,
) -> Result<PathBuf> {
    let response = client
        .get(url)
        .header(header::USER_AGENT, BROWSER_USER_AGENT)
        .header(header::ACCEPT, "*/*")
        .send()
        .await
        .map_err(|e| Error::from_reqwest("direct download", e))?;

    match response.status() {
        StatusCode::OK => {},
        StatusCode::FORBIDDEN => {
            return Err(Error::AccessDenied(
                "Access denied. The track may be premium-only or not available in your region."
                    .into(),
            ));
        },
        StatusCode::NOT_FOUND => {
            return Err(Error::NotFound(
                "The audio file was not found. The track may have been removed.".into(),
            ));
        },
        status => {
            return Err(Error::Http {
                status: Some(status.as_u16()),
                message: format!("direct download failed with HTTP {}", status.as_u16()),
            });
        },
    }

    let ext = extension_for(url, response.headers().get(header::CONTENT_TYPE));
    let path = allocation.path_with_ext(&ext);
    let total = response.content_length();
    if max_bytes > 0 && total.is_some_and(|t| t > max_bytes) {
        return Err(too_large(max_bytes));
    }
    debug!(url, path = %path.display(), ?total, "direct download started");

    let mut file = File::create(&path)
        .await
        .with_context(|| format!("create {}", path.display()))?;
    let started = Instant::now();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::from_reqwest("direct download body", e))?;
        // Content-Length may be absent or wrong.
        if max_bytes > 0 && downloaded + chunk.len() as u64 > max_bytes {
            return Err(too_large(max_bytes));
        }
        file.write_all(&chunk)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        downloaded += chunk.len() as u64;
        progress(&Progress::new(
            ProgressStatus::Downloading,
            downloaded,
            total,
            started,
        ));
    }
    file.flush()
        .await
        .with_context(|| format!("flush {}", path.display()))?;

    let done = Progress::new(ProgressStatus::Finished, downloaded, total, started);
    progress(&done);
    info!(url, bytes = downloaded, speed = done.speed as u64, "direct download finished");
    Ok(path)
}

/// File extension from the URL path, else from the response content type.
fn extension_for(url: &str, content_type: Option<&header::HeaderValue>) -> String {
    let from_path = url::Url::parse(url).ok().and_then(|u| {
        Path::new(u.path())
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| (1..=5).contains(&e.len()) && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(str::to_ascii_lowercase)
    });
    from_path.unwrap_or_else(|| {
        content_type
            .and_then(|v| v.to_str().ok())
            .map_or("bin", extension_for_content_type)
            .to_string()
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, mediafetch_media::DownloadStore};

    fn limits(max_bytes: u64) -> DirectLimits {
        DirectLimits {
            timeout: Duration::from_secs(5),
            max_bytes,
        }
    }

    #[tokio::test]
    async fn streams_body_and_reports_progress() {
        let mut server = mockito::Server::new_async().await;
        let body = vec![7u8; 4096];
        let _m = server
            .mock("GET", "/track.mp3")
            .with_status(200)
            .with_header("content-type", "audio/mpeg")
            .with_body(&body)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let alloc = DownloadStore::new(dir.path()).allocate();
        let mut events = Vec::new();
        let mut record = |p: &Progress| events.push(p.clone());

        let path = download_direct(
            &Client::new(),
            &format!("{}/track.mp3", server.url()),
            &alloc,
            limits(0),
            &mut record,
        )
        .await
        .unwrap();

        assert_eq!(path, alloc.path_with_ext("mp3"));
        assert_eq!(std::fs::read(&path).unwrap(), body);
        let last = events.last().unwrap();
        assert_eq!(last.status, ProgressStatus::Finished);
        assert_eq!(last.downloaded_bytes, 4096);
        assert_eq!(last.percentage, Some(100.0));
    }

    #[tokio::test]
    async fn extension_falls_back_to_content_type() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/stream")
            .with_status(200)
            .with_header("content-type", "audio/mp4")
            .with_body("data")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let alloc = DownloadStore::new(dir.path()).allocate();
        let path = download_direct(
            &Client::new(),
            &format!("{}/stream", server.url()),
            &alloc,
            limits(0),
            &mut |_| {},
        )
        .await
        .unwrap();
        assert_eq!(path.extension().unwrap(), "m4a");
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let mut server = mockito::Server::new_async().await;
        let _forbidden = server
            .mock("GET", "/forbidden.mp3")
            .with_status(403)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/missing.mp3")
            .with_status(404)
            .create_async()
            .await;
        let _broken = server
            .mock("GET", "/broken.mp3")
            .with_status(500)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path());
        let client = Client::new();
        let fetch = |path: &'static str| {
            let url = format!("{}{path}", server.url());
            let alloc = store.allocate();
            let client = client.clone();
            async move {
                download_direct(&client, &url, &alloc, limits(0), &mut |_| {})
                    .await
                    .unwrap_err()
            }
        };

        assert!(matches!(fetch("/forbidden.mp3").await, Error::AccessDenied(_)));
        assert!(matches!(fetch("/missing.mp3").await, Error::NotFound(_)));
        assert!(matches!(
            fetch("/broken.mp3").await,
            Error::Http {
                status: Some(500),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        use std::io::Write as _;

        let mut server = mockito::Server::new_async().await;
        let _declared = server
            .mock("GET", "/big.mp3")
            .with_status(200)
            .with_body(vec![0u8; 2048])
            .create_async()
            .await;
        let _chunked = server
            .mock("GET", "/chunked.mp3")
            .with_status(200)
            .with_chunked_body(|w| w.write_all(&[0u8; 2048]))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path());
        let client = Client::new();
        for path in ["/big.mp3", "/chunked.mp3"] {
            let alloc = store.allocate();
            let err = download_direct(
                &client,
                &format!("{}{path}", server.url()),
                &alloc,
                limits(1024),
                &mut |_| {},
            )
            .await
            .unwrap_err();
            assert!(err.to_string().contains("1024-byte limit"), "{path}: {err}");
        }
    }

    #[test]
    fn extension_from_url_path() {
        assert_eq!(extension_for("https://cdn.example/a/b.MP3?sig=1", None), "mp3");
        assert_eq!(extension_for("https://cdn.example/a/b", None), "bin");
    }
}
