//! In-process metadata scrapers for sites `yt-dlp` handles poorly.

pub mod audiomack;
pub mod spotify;

use {async_trait::async_trait, url::Url};

use crate::{error::Result, types::MediaInfo};

pub use {audiomack::AudiomackExtractor, spotify::SpotifyExtractor};

/// What a fetch should download once an extractor has looked at the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Stream this URL straight to disk.
    Direct(String),
    /// Hand the original URL to `yt-dlp`.
    Downloader,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this extractor owns `url`.
    fn matches(&self, url: &Url) -> bool;

    async fn extract(&self, url: &Url) -> Result<MediaInfo>;

    /// Choose a download source from extracted metadata.
    fn source(&self, url: &Url, info: &MediaInfo) -> Result<Source>;

    /// Whether an extraction failure during fetch may fall back to `yt-dlp`.
    fn downloader_fallback(&self) -> bool {
        false
    }
}

/// Registered extractors, tried in order.
#[derive(Default)]
pub struct Extractors {
    inner: Vec<Box<dyn Extractor>>,
}

impl Extractors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extractor: Box<dyn Extractor>) {
        self.inner.push(extractor);
    }

    pub fn find(&self, url: &Url) -> Option<&dyn Extractor> {
        self.inner
            .iter()
            .find(|e| e.matches(url))
            .map(|e| e.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.inner.iter().map(|e| e.name()).collect()
    }
}

/// `true` when `url`'s host is `domain` or a subdomain of it.
pub(crate) fn host_is(url: &Url, domain: &str) -> bool {
    url.host_str().is_some_and(|host| {
        let host = host.to_ascii_lowercase();
        host == domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}
