//! Spotify Web API metadata, with an oEmbed fallback when no credentials work.
//!
//! Spotify audio is DRM-protected; the only downloadable media is the
//! 30-second `preview_url` some tracks carry.

use std::time::{Duration, Instant};

use {
    async_trait::async_trait,
    reqwest::{Client, StatusCode},
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    serde_json::Value,
    tokio::sync::Mutex,
    tracing::{debug, warn},
    url::Url,
};

use mediafetch_config::SpotifyConfig;

use crate::{
    error::{Error, Result},
    extractors::{Extractor, Source, host_is},
    types::{MediaFormat, MediaInfo},
};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";
const OEMBED_URL: &str = "https://open.spotify.com/oembed";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Refresh this long before the token actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Upstream endpoints; overridable so tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct SpotifyEndpoints {
    pub token_url: String,
    pub api_base: String,
    pub oembed_url: String,
}

impl Default for SpotifyEndpoints {
    fn default() -> Self {
        Self {
            token_url: TOKEN_URL.into(),
            api_base: API_BASE.into(),
            oembed_url: OEMBED_URL.into(),
        }
    }
}

/// Spotify resource kinds addressable by an `open.spotify.com` URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Track,
    Album,
    Playlist,
}

/// Split `/<type>/<id>` out of a Spotify URL.
pub fn parse_spotify_url(url: &Url) -> Result<(String, String)> {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if !host.contains("spotify") {
        return Err(Error::InvalidUrl("Invalid Spotify URL".into()));
    }
    let mut parts = url.path().trim_matches('/').split('/');
    match (parts.next(), parts.next()) {
        (Some(kind), Some(id)) if !kind.is_empty() && !id.is_empty() => {
            Ok((kind.to_string(), id.to_string()))
        },
        _ => Err(Error::InvalidUrl("Invalid Spotify URL".into())),
    }
}

fn resource_kind(kind: &str) -> Result<ResourceKind> {
    match kind {
        "track" => Ok(ResourceKind::Track),
        "album" => Ok(ResourceKind::Album),
        "playlist" => Ok(ResourceKind::Playlist),
        other => Err(Error::Unsupported(format!(
            "Unsupported Spotify resource type: {other}"
        ))),
    }
}

struct CachedToken {
    token: Secret<String>,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

pub struct SpotifyExtractor {
    client: Client,
    config: SpotifyConfig,
    endpoints: SpotifyEndpoints,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyExtractor {
    pub fn new(client: Client, config: SpotifyConfig) -> Self {
        Self::with_endpoints(client, config, SpotifyEndpoints::default())
    }

    pub fn with_endpoints(client: Client, config: SpotifyConfig, endpoints: SpotifyEndpoints) -> Self {
        Self {
            client,
            config,
            endpoints,
            token: Mutex::new(None),
        }
    }

    /// Bearer token for the Web API: the configured one, else a cached or
    /// freshly issued client-credentials token.
    async fn access_token(&self) -> Result<String> {
        if let Some(bearer) = self.config.bearer() {
            return Ok(bearer.to_string());
        }
        if !self.config.has_client_credentials() {
            return Err(Error::message("Spotify client credentials not configured"));
        }

        let mut cached = self.token.lock().await;
        if let Some(ref token) = *cached
            && token.expires_at > Instant::now()
        {
            return Ok(token.token.expose_secret().clone());
        }

        let client_id = self.config.client_id.as_deref().unwrap_or_default();
        let client_secret = self
            .config
            .client_secret
            .as_ref()
            .map(|s| s.expose_secret().as_str());
        let response = self
            .client
            .post(&self.endpoints.token_url)
            .basic_auth(client_id, client_secret)
            .form(&[("grant_type", "client_credentials")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::from_reqwest("Spotify token request", e))?;
        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: Some(status),
                message: format!("Failed to obtain Spotify token: {status} {body}"),
            });
        }
        let issued: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::from_reqwest("Spotify token response", e))?;

        let lifetime = Duration::from_secs(issued.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        debug!(expires_in = issued.expires_in, "issued Spotify access token");
        *cached = Some(CachedToken {
            token: Secret::new(issued.access_token.clone()),
            expires_at: Instant::now() + lifetime,
        });
        Ok(issued.access_token)
    }

    async fn api_get(&self, token: &str, path: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/{path}", self.endpoints.api_base))
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::from_reqwest("Spotify API request", e))?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Spotify API error: {} {body}", status.as_u16());
            return Err(match status {
                StatusCode::NOT_FOUND => Error::NotFound(message),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::AccessDenied(message),
                _ => Error::Http {
                    status: Some(status.as_u16()),
                    message,
                },
            });
        }
        response
            .json()
            .await
            .map_err(|e| Error::from_reqwest("Spotify API response", e))
    }

    /// Title, author and thumbnail from the public oEmbed endpoint.
    async fn oembed(&self, url: &Url) -> Result<MediaInfo> {
        let response = self
            .client
            .get(&self.endpoints.oembed_url)
            .query(&[("url", url.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::from_reqwest("Spotify oEmbed request", e))?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: Some(status.as_u16()),
                message: format!(
                    "Spotify credentials or bearer token are required for full metadata \
                     (preview URLs). Fallback oEmbed failed: {} {body}",
                    status.as_u16()
                ),
            });
        }
        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::from_reqwest("Spotify oEmbed response", e))?;
        Ok(MediaInfo {
            title: str_at(&data, "title"),
            uploader: str_at(&data, "author_name"),
            thumbnail: str_at(&data, "thumbnail_url"),
            duration: None,
            formats: Vec::new(),
        })
    }
}

fn str_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn first_image(images: Option<&Value>) -> Option<String> {
    images
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .and_then(|image| str_at(image, "url"))
}

/// One entry per track; `ext` says whether a preview exists.
fn track_format(track: &Value) -> MediaFormat {
    let preview = str_at(track, "preview_url");
    MediaFormat {
        format_id: str_at(track, "id"),
        ext: if preview.is_some() { "preview" } else { "none" }.into(),
        url: preview,
    }
}

fn track_info(data: &Value) -> MediaInfo {
    let artists: Vec<&str> = data
        .get("artists")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|a| a.get("name").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    let duration_ms = data.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);
    MediaInfo {
        title: str_at(data, "name"),
        uploader: (!artists.is_empty()).then(|| artists.join(", ")),
        thumbnail: first_image(data.get("album").and_then(|a| a.get("images"))),
        duration: Some(duration_ms / 1000),
        formats: str_at(data, "preview_url")
            .map(|url| vec![MediaFormat::new("preview", "mp3", url)])
            .unwrap_or_default(),
    }
}

fn album_info(data: &Value) -> MediaInfo {
    let tracks = data
        .pointer("/tracks/items")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(track_format).collect())
        .unwrap_or_default();
    MediaInfo {
        title: str_at(data, "name"),
        uploader: data.pointer("/artists/0/name").and_then(Value::as_str).map(str::to_string),
        thumbnail: first_image(data.get("images")),
        duration: None,
        formats: tracks,
    }
}

fn playlist_info(data: &Value) -> MediaInfo {
    let tracks = data
        .pointer("/tracks/items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| track_format(item.get("track").unwrap_or(&Value::Null)))
                .collect()
        })
        .unwrap_or_default();
    MediaInfo {
        title: str_at(data, "name"),
        uploader: data
            .pointer("/owner/display_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        thumbnail: first_image(data.get("images")),
        duration: None,
        formats: tracks,
    }
}

#[async_trait]
impl Extractor for SpotifyExtractor {
    fn name(&self) -> &'static str {
        "spotify"
    }

    fn matches(&self, url: &Url) -> bool {
        host_is(url, "spotify.com")
    }

    async fn extract(&self, url: &Url) -> Result<MediaInfo> {
        let (kind, id) = parse_spotify_url(url)?;

        let token = match self.access_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "no usable Spotify credentials, falling back to oEmbed");
                return self.oembed(url).await;
            },
        };

        match resource_kind(&kind)? {
            ResourceKind::Track => Ok(track_info(&self.api_get(&token, &format!("tracks/{id}")).await?)),
            ResourceKind::Album => Ok(album_info(&self.api_get(&token, &format!("albums/{id}")).await?)),
            ResourceKind::Playlist => Ok(playlist_info(
                &self.api_get(&token, &format!("playlists/{id}")).await?,
            )),
        }
    }

    fn source(&self, url: &Url, info: &MediaInfo) -> Result<Source> {
        let (kind, _) = parse_spotify_url(url)?;
        if resource_kind(&kind)? != ResourceKind::Track {
            return Err(Error::Unsupported(format!(
                "Spotify {kind} downloads are not supported; fetch individual tracks"
            )));
        }
        info.formats
            .iter()
            .find(|f| f.format_id.as_deref() == Some("preview"))
            .and_then(|f| f.url.clone())
            .map(Source::Direct)
            .ok_or_else(|| {
                Error::Unsupported(
                    "This Spotify track has no preview available (credentials are required \
                     to read preview URLs)"
                        .into(),
                )
            })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher, serde_json::json};

    fn endpoints(server: &mockito::ServerGuard) -> SpotifyEndpoints {
        SpotifyEndpoints {
            token_url: format!("{}/api/token", server.url()),
            api_base: format!("{}/v1", server.url()),
            oembed_url: format!("{}/oembed", server.url()),
        }
    }

    fn with_credentials() -> SpotifyConfig {
        SpotifyConfig {
            client_id: Some("id".into()),
            client_secret: Some(Secret::new("secret".into())),
            bearer_token: None,
        }
    }

    fn track_url() -> Url {
        Url::parse("https://open.spotify.com/track/abc123").unwrap()
    }

    #[test]
    fn parses_resource_from_url() {
        let (kind, id) = parse_spotify_url(&track_url()).unwrap();
        assert_eq!((kind.as_str(), id.as_str()), ("track", "abc123"));

        let bad = Url::parse("https://open.spotify.com/track").unwrap();
        assert!(matches!(parse_spotify_url(&bad), Err(Error::InvalidUrl(_))));
        let other = Url::parse("https://example.com/track/1").unwrap();
        assert!(parse_spotify_url(&other).is_err());
    }

    #[tokio::test]
    async fn track_via_client_credentials() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/api/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "client_credentials".into(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"tok","token_type":"Bearer","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let track = server
            .mock("GET", "/v1/tracks/abc123")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(
                json!({
                    "name": "Song",
                    "artists": [{"name": "A"}, {"name": "B"}],
                    "album": {"images": [{"url": "https://i/1.jpg"}, {"url": "https://i/2.jpg"}]},
                    "duration_ms": 215_999,
                    "preview_url": "https://p.scdn.co/mp3-preview/x"
                })
                .to_string(),
            )
            .expect(2)
            .create_async()
            .await;

        let ex = SpotifyExtractor::with_endpoints(Client::new(), with_credentials(), endpoints(&server));
        let info = ex.extract(&track_url()).await.unwrap();
        // Second call reuses the cached token.
        ex.extract(&track_url()).await.unwrap();
        token.assert_async().await;
        track.assert_async().await;

        assert_eq!(info.title.as_deref(), Some("Song"));
        assert_eq!(info.uploader.as_deref(), Some("A, B"));
        assert_eq!(info.thumbnail.as_deref(), Some("https://i/1.jpg"));
        assert_eq!(info.duration, Some(215));
        assert_eq!(
            ex.source(&track_url(), &info).unwrap(),
            Source::Direct("https://p.scdn.co/mp3-preview/x".into())
        );
    }

    #[tokio::test]
    async fn bearer_token_skips_token_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/api/token")
            .expect(0)
            .create_async()
            .await;
        let _album = server
            .mock("GET", "/v1/albums/alb")
            .match_header("authorization", "Bearer preissued")
            .with_status(200)
            .with_body(
                json!({
                    "name": "Record",
                    "artists": [{"name": "Band"}],
                    "images": [{"url": "https://i/cover.jpg"}],
                    "tracks": {"items": [
                        {"id": "t1", "preview_url": "https://p/1"},
                        {"id": "t2", "preview_url": null}
                    ]}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let config = SpotifyConfig {
            bearer_token: Some(Secret::new("preissued".into())),
            ..Default::default()
        };
        let ex = SpotifyExtractor::with_endpoints(Client::new(), config, endpoints(&server));
        let url = Url::parse("https://open.spotify.com/album/alb").unwrap();
        let info = ex.extract(&url).await.unwrap();
        token.assert_async().await;

        assert_eq!(info.uploader.as_deref(), Some("Band"));
        assert_eq!(info.formats, vec![
            MediaFormat::new("t1", "preview", "https://p/1"),
            MediaFormat {
                format_id: Some("t2".into()),
                ext: "none".into(),
                url: None,
            },
        ]);
        assert!(matches!(ex.source(&url, &info), Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn playlist_uses_owner_and_nested_tracks() {
        let mut server = mockito::Server::new_async().await;
        let _playlist = server
            .mock("GET", "/v1/playlists/pl")
            .with_status(200)
            .with_body(
                json!({
                    "name": "Mix",
                    "owner": {"display_name": "curator"},
                    "images": [],
                    "tracks": {"items": [{"track": {"id": "t9", "preview_url": "https://p/9"}}, {"track": null}]}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let config = SpotifyConfig {
            bearer_token: Some(Secret::new("b".into())),
            ..Default::default()
        };
        let ex = SpotifyExtractor::with_endpoints(Client::new(), config, endpoints(&server));
        let info = ex
            .extract(&Url::parse("https://open.spotify.com/playlist/pl").unwrap())
            .await
            .unwrap();
        assert_eq!(info.uploader.as_deref(), Some("curator"));
        assert_eq!(info.thumbnail, None);
        assert_eq!(info.formats.len(), 2);
        assert_eq!(info.formats[1].ext, "none");
    }

    #[tokio::test]
    async fn without_credentials_falls_back_to_oembed() {
        let mut server = mockito::Server::new_async().await;
        let _oembed = server
            .mock("GET", "/oembed")
            .match_query(Matcher::UrlEncoded(
                "url".into(),
                "https://open.spotify.com/track/abc123".into(),
            ))
            .with_status(200)
            .with_body(
                r#"{"title":"Public Song","author_name":"Artist","thumbnail_url":"https://i/t.jpg"}"#,
            )
            .create_async()
            .await;

        let ex = SpotifyExtractor::with_endpoints(Client::new(), SpotifyConfig::default(), endpoints(&server));
        let info = ex.extract(&track_url()).await.unwrap();
        assert_eq!(info.title.as_deref(), Some("Public Song"));
        assert_eq!(info.uploader.as_deref(), Some("Artist"));
        assert_eq!(info.duration, None);
        assert!(info.formats.is_empty());
        assert!(matches!(ex.source(&track_url(), &info), Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn unknown_resource_type_is_unsupported() {
        let server = mockito::Server::new_async().await;
        let config = SpotifyConfig {
            bearer_token: Some(Secret::new("b".into())),
            ..Default::default()
        };
        let ex = SpotifyExtractor::with_endpoints(Client::new(), config, endpoints(&server));
        let url = Url::parse("https://open.spotify.com/show/xyz").unwrap();
        assert!(matches!(ex.extract(&url).await, Err(Error::Unsupported(_))));
    }
}
