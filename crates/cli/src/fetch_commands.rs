use std::time::Duration;

use {anyhow::Result, clap::Args, tracing::info};

use {
    mediafetch_config::MediafetchConfig,
    mediafetch_fetch::{FetchRequest, FetchService},
    mediafetch_media::{DownloadStore, cleanup::remove_older_than},
};

#[derive(Args)]
pub struct FetchArgs {
    /// Media page or file URL.
    pub url: String,
    /// yt-dlp format selector (e.g. `bestaudio`).
    #[arg(short, long)]
    pub format: Option<String>,
    /// Extract audio only (requires ffmpeg).
    #[arg(long)]
    pub audio_only: bool,
    /// Audio codec for `--audio-only` (default mp3).
    #[arg(long)]
    pub audio_format: Option<String>,
}

impl FetchArgs {
    pub fn into_request(self) -> FetchRequest {
        FetchRequest {
            url: self.url,
            format: self.format,
            audio_only: self.audio_only,
            audio_format: self.audio_format,
        }
    }
}

pub async fn fetch(config: &MediafetchConfig, args: FetchArgs) -> Result<()> {
    let service = FetchService::from_config(config)?;
    let artifact = service.fetch(&args.into_request()).await?;
    println!("{}", serde_json::to_string_pretty(&artifact)?);
    Ok(())
}

pub async fn info(config: &MediafetchConfig, url: &str) -> Result<()> {
    let service = FetchService::from_config(config)?;
    let info = service.info(url).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

pub async fn cleanup(config: &MediafetchConfig, max_age_hours: Option<u64>) -> Result<()> {
    let hours = max_age_hours.unwrap_or(config.downloads.max_age_hours);
    if hours == 0 {
        anyhow::bail!("cleanup is disabled (max_age_hours = 0); pass --max-age-hours");
    }
    let store = DownloadStore::new(&config.downloads.dir);
    let removed = remove_older_than(&store, Duration::from_secs(hours.saturating_mul(3600))).await?;
    info!(removed, dir = %store.dir().display(), "cleanup finished");
    println!("removed {removed} file(s) older than {hours}h");
    Ok(())
}
