//! The fetch service: a fixed pool of workers, each running one download
//! under a hard deadline.

use std::{sync::Arc, time::Duration};

use {
    reqwest::Client,
    tokio::{
        sync::{OwnedSemaphorePermit, Semaphore},
        time::Instant,
    },
    tracing::{debug, info, warn},
    url::Url,
};

use {
    mediafetch_config::MediafetchConfig,
    mediafetch_media::{Allocation, ArtifactRef, DownloadStore},
};

use crate::{
    direct::{self, DirectLimits, Progress, ProgressStatus},
    error::{Error, Result},
    extractors::{AudiomackExtractor, Extractor, Extractors, Source, SpotifyExtractor},
    types::{FetchRequest, MediaInfo},
    ytdlp::YtDlp,
};

pub struct FetchService {
    store: DownloadStore,
    ytdlp: YtDlp,
    client: Client,
    extractors: Extractors,
    permits: Arc<Semaphore>,
    workers: usize,
    timeout: Duration,
    max_direct_bytes: u64,
}

impl FetchService {
    pub fn new(
        store: DownloadStore,
        ytdlp: YtDlp,
        client: Client,
        extractors: Extractors,
        workers: usize,
        timeout: Duration,
    ) -> Self {
        let workers = workers.max(1);
        Self {
            store,
            ytdlp,
            client,
            extractors,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            timeout,
            max_direct_bytes: 0,
        }
    }

    /// Cap direct downloads at `bytes` (0 means uncapped).
    #[must_use]
    pub fn with_max_direct_bytes(mut self, bytes: u64) -> Self {
        self.max_direct_bytes = bytes;
        self
    }

    /// Wire the service from configuration, registering the site extractors.
    pub fn from_config(config: &MediafetchConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::from_reqwest("build HTTP client", e))?;

        let mut extractors = Extractors::new();
        extractors.register(Box::new(AudiomackExtractor::new(client.clone())?));
        extractors.register(Box::new(SpotifyExtractor::new(
            client.clone(),
            config.spotify.clone(),
        )));

        Ok(Self::new(
            DownloadStore::new(&config.downloads.dir),
            YtDlp::from_config(&config.fetch),
            client,
            extractors,
            config.fetch.workers,
            Duration::from_secs(config.fetch.timeout_secs),
        )
        .with_max_direct_bytes(config.fetch.max_direct_bytes))
    }

    pub fn store(&self) -> &DownloadStore {
        &self.store
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn downloader(&self) -> &YtDlp {
        &self.ytdlp
    }

    pub fn extractor_names(&self) -> Vec<&'static str> {
        self.extractors.names()
    }

    /// Download `request.url` into the store and return the finished artifact.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<ArtifactRef> {
        let url = validate_url(&request.url)?;
        let _permit = self.acquire().await?;
        let started = Instant::now();
        let deadline = started + self.timeout;

        self.store.ensure_dir().await?;
        let allocation = self.store.allocate();
        let mut abandoned = AbandonGuard::new(&self.store, &allocation);
        info!(url = %url, id = %allocation.id, "fetch started");

        let result = match self.download(&url, request, &allocation, deadline).await {
            Ok(path) => self.store.artifact_ref(&path).await.map_err(Error::from),
            Err(e) => Err(e),
        };

        abandoned.disarm();
        match result {
            Ok(artifact) => {
                info!(
                    url = %url,
                    id = %artifact.id,
                    size = artifact.size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "fetch finished"
                );
                Ok(artifact)
            },
            Err(e) => {
                warn!(url = %url, id = %allocation.id, error = %e, "fetch failed");
                if let Err(cleanup) = self.store.discard(&allocation).await {
                    warn!(id = %allocation.id, error = %cleanup, "failed to discard partial download");
                }
                Err(e)
            },
        }
    }

    /// Metadata for `url` without downloading it.
    pub async fn info(&self, raw_url: &str) -> Result<MediaInfo> {
        let url = validate_url(raw_url)?;
        let _permit = self.acquire().await?;
        let deadline = Instant::now() + self.timeout;

        if let Some(extractor) = self.extractors.find(&url) {
            debug!(url = %url, extractor = extractor.name(), "extracting metadata");
            return self.extract(extractor, &url, deadline).await;
        }
        self.ytdlp
            .probe(url.as_str(), remaining(deadline))
            .await
            .map_err(|e| self.full_timeout(e))
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        match tokio::time::timeout(self.timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(Error::message("worker pool is shut down")),
            Err(_) => Err(Error::Busy(self.workers)),
        }
    }

    async fn download(
        &self,
        url: &Url,
        request: &FetchRequest,
        allocation: &Allocation,
        deadline: Instant,
    ) -> Result<std::path::PathBuf> {
        if let Some(extractor) = self.extractors.find(url) {
            let source = match self.extract(extractor, url, deadline).await {
                Ok(info) => extractor.source(url, &info),
                Err(e) => Err(e),
            };
            match source {
                Ok(Source::Direct(link)) => {
                    debug!(url = %url, link = %link, "downloading direct link");
                    return self.download_direct(&link, allocation, deadline).await;
                },
                Ok(Source::Downloader) => {},
                Err(e) if extractor.downloader_fallback() && !matches!(e, Error::Timeout(_)) => {
                    warn!(
                        url = %url,
                        extractor = extractor.name(),
                        error = %e,
                        "extractor failed, falling back to yt-dlp"
                    );
                },
                Err(e) => return Err(e),
            }
        }

        self.ytdlp
            .download(request, allocation, remaining(deadline))
            .await
            .map_err(|e| self.full_timeout(e))
    }

    async fn extract(&self, extractor: &dyn Extractor, url: &Url, deadline: Instant) -> Result<MediaInfo> {
        tokio::time::timeout_at(deadline, extractor.extract(url))
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }

    async fn download_direct(&self, link: &str, allocation: &Allocation, deadline: Instant) -> Result<std::path::PathBuf> {
        let mut last_decile = None;
        let mut log_progress = |p: &Progress| {
            let decile = p.percentage.map(|pct| (pct / 10.0) as u8);
            if p.status == ProgressStatus::Finished || decile != last_decile {
                last_decile = decile;
                debug!(
                    id = %allocation.id,
                    status = ?p.status,
                    downloaded = p.downloaded_bytes,
                    total = ?p.total_bytes,
                    percentage = ?p.percentage,
                    speed = p.speed as u64,
                    "direct download progress"
                );
            }
        };
        direct::download_direct(
            &self.client,
            link,
            allocation,
            DirectLimits {
                timeout: remaining(deadline),
                max_bytes: self.max_direct_bytes,
            },
            &mut log_progress,
        )
        .await
        .map_err(|e| self.full_timeout(e))
    }

    /// Report timeouts against the configured limit rather than what was left of it.
    fn full_timeout(&self, err: Error) -> Error {
        match err {
            Error::Timeout(_) => Error::Timeout(self.timeout),
            other => other,
        }
    }
}

/// Removes an allocation's files if `fetch` is dropped before it settles,
/// e.g. when the client disconnects.
struct AbandonGuard<'a> {
    store: &'a DownloadStore,
    allocation: &'a Allocation,
    armed: bool,
}

impl<'a> AbandonGuard<'a> {
    fn new(store: &'a DownloadStore, allocation: &'a Allocation) -> Self {
        Self {
            store,
            allocation,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(id = %self.allocation.id, "fetch abandoned, discarding partial download");
            self.store.discard_blocking(self.allocation);
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Accept only absolute `http`/`https` URLs with a host.
pub fn validate_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::InvalidUrl("url is required".into()));
    }
    let url = Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl(format!(
            "{raw}: only http and https are supported"
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidUrl(format!("{raw}: missing host")));
    }
    Ok(url)
}
