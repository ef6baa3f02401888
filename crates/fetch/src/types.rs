use serde::{Deserialize, Serialize};

/// One download request. Lives for the duration of the HTTP call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub url: String,
    /// `yt-dlp -f` selector, e.g. `bestaudio` or `bv*+ba/b`.
    #[serde(default)]
    pub format: Option<String>,
    /// Extract audio only (needs ffmpeg).
    #[serde(default, alias = "audio_only")]
    pub audio_only: bool,
    /// Target codec for audio extraction; defaults to `mp3`.
    #[serde(default, alias = "audio_format")]
    pub audio_format: Option<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Metadata for a remote resource, shaped like a trimmed `yt-dlp` info dict.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
    /// Seconds.
    pub duration: Option<u64>,
    pub formats: Vec<MediaFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaFormat {
    pub format_id: Option<String>,
    pub ext: String,
    pub url: Option<String>,
}

impl MediaFormat {
    pub fn new(format_id: impl Into<String>, ext: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            format_id: Some(format_id.into()),
            ext: ext.into(),
            url: Some(url.into()),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case(r#"{"url":"https://example.com/v","audioOnly":true,"audioFormat":"opus"}"#)]
    #[case(r#"{"url":"https://example.com/v","audio_only":true,"audio_format":"opus"}"#)]
    fn request_accepts_both_field_spellings(#[case] body: &str) {
        let request: FetchRequest = serde_json::from_str(body).unwrap();
        assert!(request.audio_only);
        assert_eq!(request.audio_format.as_deref(), Some("opus"));
    }
}
