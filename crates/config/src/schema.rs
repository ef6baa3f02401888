/// Config schema types (server, fetch, downloads, spotify).
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Port used when neither `PORT`, the config file, nor the CLI name one.
pub const DEFAULT_PORT: u16 = 5000;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediafetchConfig {
    pub server: ServerConfig,
    pub fetch: FetchConfig,
    pub downloads: DownloadsConfig,
    pub spotify: SpotifyConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "0.0.0.0".
    pub bind: String,
    /// Port to listen on. Defaults to 5000.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_PORT,
        }
    }
}

/// External downloader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Path or name of the `yt-dlp` executable.
    pub ytdlp_path: String,
    /// Directory or binary path handed to `yt-dlp --ffmpeg-location`.
    pub ffmpeg_location: Option<String>,
    /// Number of downloads allowed to run at once.
    pub workers: usize,
    /// Hard ceiling on a single download, in seconds.
    pub timeout_secs: u64,
    /// Stderr kept from a failed downloader run.
    pub max_stderr_bytes: usize,
    /// Format selector used when the request names none.
    pub default_format: Option<String>,
    /// Largest file a direct (non-yt-dlp) download may write. 0 disables the cap.
    pub max_direct_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".into(),
            ffmpeg_location: None,
            workers: 4,
            timeout_secs: 300,
            max_stderr_bytes: 16 * 1024,
            default_format: None,
            max_direct_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Download directory and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    pub dir: PathBuf,
    /// Artifacts older than this are deleted. 0 disables cleanup.
    pub max_age_hours: u64,
    pub cleanup_interval_minutes: u64,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("downloads"),
            max_age_hours: 24,
            cleanup_interval_minutes: 30,
        }
    }
}

/// Spotify Web API credentials. All optional; without them only oEmbed
/// metadata is available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
    /// Pre-issued OAuth bearer token, preferred over client credentials.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub bearer_token: Option<Secret<String>>,
}

impl FetchConfig {
    /// `None` for an absent or blank ffmpeg location.
    pub fn ffmpeg_location(&self) -> Option<&str> {
        self.ffmpeg_location
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl SpotifyConfig {
    /// Whether client-credentials auth can be attempted.
    pub fn has_client_credentials(&self) -> bool {
        let id = self.client_id.as_deref().is_some_and(is_resolved);
        let secret = self
            .client_secret
            .as_ref()
            .is_some_and(|s| is_resolved(s.expose_secret()));
        id && secret
    }

    /// Bearer token if one is configured and not an unresolved placeholder.
    pub fn bearer(&self) -> Option<&str> {
        self.bearer_token
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .filter(|s| is_resolved(s))
    }
}

/// Blank values and `${VAR}` placeholders left by env substitution count as unset.
fn is_resolved(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !value.starts_with("${")
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
