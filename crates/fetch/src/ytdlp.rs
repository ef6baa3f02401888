//! Command-line contract with `yt-dlp`.

use std::{path::PathBuf, time::Duration};

use {serde::Deserialize, tracing::info};

use {mediafetch_config::FetchConfig, mediafetch_media::Allocation};

use crate::{
    error::{Error, Result},
    exec::{self, ExecOpts, ExecResult},
    types::{FetchRequest, MediaFormat, MediaInfo},
};

const DEFAULT_AUDIO_FORMAT: &str = "mp3";

/// Audio codecs `yt-dlp --audio-format` accepts.
const AUDIO_FORMATS: &[&str] = &[
    "best", "aac", "alac", "flac", "m4a", "mp3", "opus", "vorbis", "wav",
];

/// How to invoke the external downloader.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
    ffmpeg_location: Option<String>,
    default_format: Option<String>,
    max_stderr_bytes: usize,
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ffmpeg_location: None,
            default_format: None,
            max_stderr_bytes: 16 * 1024,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            program: config.ytdlp_path.clone(),
            ffmpeg_location: config.ffmpeg_location().map(str::to_string),
            default_format: config
                .default_format
                .clone()
                .filter(|f| !f.trim().is_empty()),
            max_stderr_bytes: config.max_stderr_bytes,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for downloading `request` into `allocation`.
    ///
    /// The final path (after any ffmpeg post-processing) is printed on stdout.
    pub fn download_args(&self, request: &FetchRequest, allocation: &Allocation) -> Result<Vec<String>> {
        let mut args: Vec<String> = [
            "--no-playlist",
            "--no-progress",
            "--no-warnings",
            "--no-mtime",
            "--restrict-filenames",
            "--print",
            "after_move:filepath",
            "-o",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(allocation.output_template().display().to_string());

        let format = request
            .format
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .or(self.default_format.as_deref());
        if let Some(format) = format {
            args.push("-f".into());
            args.push(format.to_string());
        }

        if request.audio_only {
            let codec = request
                .audio_format
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .unwrap_or(DEFAULT_AUDIO_FORMAT);
            if !AUDIO_FORMATS.contains(&codec) {
                return Err(Error::Unsupported(format!(
                    "unsupported audio format: {codec}"
                )));
            }
            args.extend(["-x".into(), "--audio-format".into(), codec.to_string()]);
        }

        if let Some(ref location) = self.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(location.clone());
        }

        // End of options; the URL can never be read as a flag.
        args.push("--".into());
        args.push(request.url.clone());
        Ok(args)
    }

    /// Download and return the path `yt-dlp` reports for the finished file.
    pub async fn download(
        &self,
        request: &FetchRequest,
        allocation: &Allocation,
        timeout: Duration,
    ) -> Result<PathBuf> {
        let args = self.download_args(request, allocation)?;
        let result = exec::run(&self.program, &args, &self.opts(timeout)).await?;
        let result = check(result)?;

        let path = result
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| Error::message("downloader reported no output file"))?;
        info!(url = %request.url, path = %path.display(), "yt-dlp download finished");
        Ok(path)
    }

    /// Metadata via `--dump-single-json`, without downloading.
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<MediaInfo> {
        let args: Vec<String> = [
            "--dump-single-json",
            "--no-playlist",
            "--no-warnings",
            "--skip-download",
            "--",
            url,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let result = check(exec::run(&self.program, &args, &self.opts(timeout)).await?)?;
        parse_info_json(&result.stdout)
    }

    /// `yt-dlp --version`, used to report the downloader at startup.
    pub async fn version(&self) -> Result<String> {
        let args = vec!["--version".to_string()];
        let result = check(exec::run(&self.program, &args, &self.opts(Duration::from_secs(15))).await?)?;
        Ok(result.stdout.trim().to_string())
    }

    fn opts(&self, timeout: Duration) -> ExecOpts {
        ExecOpts {
            timeout,
            // `--dump-single-json` output for long videos runs to megabytes.
            max_output_bytes: 32 * 1024 * 1024,
            max_stderr_bytes: self.max_stderr_bytes,
            ..Default::default()
        }
    }
}

/// Turn a non-zero exit into a classified error.
fn check(result: ExecResult) -> Result<ExecResult> {
    if result.success() {
        return Ok(result);
    }
    Err(classify_failure(result.exit_code, &result.stderr))
}

fn classify_failure(exit_code: i32, stderr: &str) -> Error {
    let message = error_summary(stderr);
    let lower = message.to_lowercase();
    if lower.contains("unsupported url") {
        Error::Unsupported(message)
    } else if lower.contains("http error 404") || lower.contains("video unavailable") {
        Error::NotFound(message)
    } else if lower.contains("http error 403")
        || lower.contains("private video")
        || lower.contains("sign in to confirm")
    {
        Error::AccessDenied(message)
    } else {
        Error::Process { exit_code, message }
    }
}

/// The most useful line of downloader stderr: the last `ERROR:` line,
/// else the last non-empty one.
fn error_summary(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or(lines.last())
        .map(|l| l.trim_start_matches("ERROR:").trim().to_string())
        .unwrap_or_else(|| "no error output".to_string())
}

#[derive(Deserialize)]
struct RawInfo {
    title: Option<String>,
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<RawFormat>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    format_id: Option<String>,
}

#[derive(Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    url: Option<String>,
}

fn parse_info_json(stdout: &str) -> Result<MediaInfo> {
    let raw: RawInfo = serde_json::from_str(stdout.trim())
        .map_err(|e| Error::message(format!("unreadable downloader metadata: {e}")))?;

    let mut formats: Vec<MediaFormat> = raw
        .formats
        .into_iter()
        .map(|f| MediaFormat {
            format_id: f.format_id,
            ext: f.ext.unwrap_or_else(|| "unknown".into()),
            url: f.url,
        })
        .collect();
    // Single-format extractors put the media URL at the top level.
    if formats.is_empty()
        && let Some(url) = raw.url
    {
        formats.push(MediaFormat {
            format_id: raw.format_id,
            ext: raw.ext.unwrap_or_else(|| "unknown".into()),
            url: Some(url),
        });
    }

    Ok(MediaInfo {
        title: raw.title,
        uploader: raw.uploader.or(raw.channel),
        thumbnail: raw.thumbnail,
        duration: raw.duration.filter(|d| *d >= 0.0).map(|d| d.round() as u64),
        formats,
    })
}
