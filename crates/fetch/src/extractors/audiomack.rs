use std::{collections::HashSet, time::Duration};

use {
    async_trait::async_trait,
    regex::Regex,
    reqwest::{Client, StatusCode, header},
    serde_json::Value,
    tracing::debug,
    url::Url,
};

use crate::{
    direct::BROWSER_USER_AGENT,
    error::{Error, Result},
    extractors::{Extractor, Source, host_is},
    types::{MediaFormat, MediaInfo},
};

const PAGE_TIMEOUT: Duration = Duration::from_secs(15);
const FALLBACK_TITLE: &str = "Audiomack Track";

/// Scrapes Audiomack track pages: JSON-LD first, then OpenGraph tags, plus
/// any direct audio links embedded in the HTML.
pub struct AudiomackExtractor {
    client: Client,
    json_ld: Regex,
    og_title: Regex,
    og_image: Regex,
    meta_author: Regex,
    audio_link: Regex,
    duration: Regex,
}

impl AudiomackExtractor {
    pub fn new(client: Client) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::message(format!("bad pattern {pattern}: {e}")))
        };
        Ok(Self {
            client,
            json_ld: compile(
                r#"(?is)<script[^>]+type=["']application/ld\+json["'][^>]*>(.*?)</script>"#,
            )?,
            og_title: compile(r#"(?i)<meta property="og:title" content="([^"]+)""#)?,
            og_image: compile(r#"(?i)<meta property="og:image" content="([^"]+)""#)?,
            meta_author: compile(r#"(?i)<meta name="author" content="([^"]+)""#)?,
            audio_link: compile(r#"https?://[\w\-/._?=&%]+\.(?:mp3|m3u8)(?:\?[^"'>\s]+)?"#)?,
            duration: compile(r#""duration"\s*:\s*"PT?(?:(\d+)M)?(?:(\d+)S)?""#)?,
        })
    }

    async fn page(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .header(header::USER_AGENT, BROWSER_USER_AGENT)
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .timeout(PAGE_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::from_reqwest("failed to access Audiomack track", e))?;

        match response.status() {
            StatusCode::OK => {},
            StatusCode::FORBIDDEN => {
                return Err(Error::AccessDenied(
                    "This track is not publicly accessible. It may be premium-only or \
                     region-restricted."
                        .into(),
                ));
            },
            StatusCode::NOT_FOUND => {
                return Err(Error::NotFound(
                    "Track not found. It may have been deleted or made private.".into(),
                ));
            },
            status => {
                return Err(Error::Http {
                    status: Some(status.as_u16()),
                    message: format!(
                        "Failed to access Audiomack track (HTTP {})",
                        status.as_u16()
                    ),
                });
            },
        }

        response
            .text()
            .await
            .map_err(|e| Error::from_reqwest("failed to read Audiomack page", e))
    }

    /// Parse a fetched page. Split from [`Extractor::extract`] for testing.
    pub fn parse_page(&self, url: &Url, html: &str) -> MediaInfo {
        let mut info = MediaInfo::default();

        if let Some(ld) = self.first_json_ld(html) {
            apply_json_ld(&mut info, &ld);
        }

        let capture = |re: &Regex| {
            re.captures(html)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        };
        if info.title.is_none() {
            info.title = capture(&self.og_title);
        }
        if info.thumbnail.is_none() {
            info.thumbnail = capture(&self.og_image);
        }
        if info.uploader.is_none() {
            info.uploader = capture(&self.meta_author);
        }

        for m in self.audio_link.find_iter(html) {
            let link = m.as_str();
            let lower = link.to_ascii_lowercase();
            let ext = if lower.ends_with(".mp3") {
                "mp3"
            } else if lower.contains(".m3u8") {
                "m3u8"
            } else {
                extension_of(link)
            };
            info.formats.push(MediaFormat::new(ext, ext, link));
        }

        let mut seen = HashSet::new();
        info.formats
            .retain(|f| f.url.as_ref().is_some_and(|u| seen.insert(u.clone())));

        if let Some(c) = self.duration.captures(html) {
            let part = |i: usize| {
                c.get(i)
                    .and_then(|m| m.as_str().parse::<u64>().ok())
                    .unwrap_or(0)
            };
            info.duration = Some(part(1) * 60 + part(2));
        }

        if info.title.is_none() {
            let segment = url
                .path()
                .trim_matches('/')
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or(FALLBACK_TITLE);
            info.title = Some(segment.to_string());
        }

        info
    }

    fn first_json_ld(&self, html: &str) -> Option<Value> {
        let raw = self.json_ld.captures(html)?.get(1)?.as_str().trim();
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => items.into_iter().find(Value::is_object),
            Ok(value) => Some(value),
            Err(e) => {
                debug!(error = %e, "ignoring malformed JSON-LD");
                None
            },
        }
    }
}

fn apply_json_ld(info: &mut MediaInfo, ld: &Value) {
    let text = |key: &str| ld.get(key).and_then(Value::as_str).map(str::to_string);

    info.title = text("name").or_else(|| text("headline"));
    info.thumbnail = match ld.get("image") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(list)) => list.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    };
    info.uploader = match ld.get("author") {
        Some(Value::Object(author)) => author
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };

    let content = ld.get("audio").and_then(|audio| {
        audio
            .get("contentUrl")
            .or_else(|| audio.get("url"))
            .and_then(Value::as_str)
    });
    if let Some(content) = content.filter(|c| !c.is_empty()) {
        let ext = if content.to_ascii_lowercase().ends_with(".mp3") {
            "mp3"
        } else {
            extension_of(content)
        };
        info.formats.push(MediaFormat::new("audio", ext, content));
    }
}

/// Text after the last `.`, query string dropped.
fn extension_of(link: &str) -> &str {
    link.rsplit('.')
        .next()
        .and_then(|tail| tail.split('?').next())
        .unwrap_or_default()
}

#[async_trait]
impl Extractor for AudiomackExtractor {
    fn name(&self) -> &'static str {
        "audiomack"
    }

    fn matches(&self, url: &Url) -> bool {
        host_is(url, "audiomack.com")
    }

    async fn extract(&self, url: &Url) -> Result<MediaInfo> {
        let html = self.page(url).await?;
        Ok(self.parse_page(url, &html))
    }

    /// First progressive link wins; HLS playlists go to the downloader.
    fn source(&self, _url: &Url, info: &MediaInfo) -> Result<Source> {
        let direct = info.formats.iter().find_map(|f| {
            f.url
                .as_deref()
                .filter(|u| f.ext != "m3u8" && !u.to_ascii_lowercase().contains(".m3u8"))
        });
        Ok(direct.map_or(Source::Downloader, |u| Source::Direct(u.to_string())))
    }

    fn downloader_fallback(&self) -> bool {
        true
    }
}
