use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use {serde::Serialize, tokio::fs, tracing::debug};

use crate::{
    error::{Context, Error, Result},
    mime::mime_for_path,
};

/// Public URL prefix artifacts are served under.
pub const DOWNLOADS_URL_PREFIX: &str = "/downloads";

/// Reference to a finished download, returned to callers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    /// Generated identifier; the filename stem.
    pub id: String,
    pub filename: String,
    /// Absolute path on the service host.
    pub path: String,
    /// Relative URL the gateway serves the file at.
    pub url: String,
    pub size: u64,
    pub content_type: String,
    /// Last modification time, seconds since the Unix epoch.
    pub modified: u64,
}

/// A reserved artifact name for one download.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub id: String,
    pub dir: PathBuf,
}

impl Allocation {
    /// `yt-dlp` output template: `<dir>/<id>.%(ext)s`.
    pub fn output_template(&self) -> PathBuf {
        self.dir.join(format!("{}.%(ext)s", self.id))
    }

    /// Concrete path once the extension is known.
    pub fn path_with_ext(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{ext}", self.id))
    }
}

/// Files under the shared download directory.
///
/// Every download gets a fresh UUID stem, so concurrent fetches of the same
/// URL never write to the same file.
#[derive(Debug, Clone)]
pub struct DownloadStore {
    dir: PathBuf,
}

impl DownloadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the download directory if needed.
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))
    }

    /// Reserve a new artifact name.
    pub fn allocate(&self) -> Allocation {
        Allocation {
            id: uuid::Uuid::new_v4().simple().to_string(),
            dir: self.dir.clone(),
        }
    }

    /// Map a client-supplied filename to a path inside the directory.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.dir.join(filename))
    }

    /// Build a reference for a file the downloader reported.
    ///
    /// Rejects paths outside the download directory and empty files.
    pub async fn artifact_ref(&self, path: &Path) -> Result<ArtifactRef> {
        let root = fs::canonicalize(&self.dir)
            .await
            .with_context(|| format!("download dir {}", self.dir.display()))?;
        let canonical = fs::canonicalize(path)
            .await
            .map_err(|_| Error::not_found(path.display().to_string()))?;
        if !canonical.starts_with(&root) {
            return Err(Error::invalid_input(format!(
                "{} is outside the download directory",
                canonical.display()
            )));
        }

        let meta = fs::metadata(&canonical)
            .await
            .with_context(|| format!("stat {}", canonical.display()))?;
        if !meta.is_file() {
            return Err(Error::invalid_input(format!(
                "{} is not a file",
                canonical.display()
            )));
        }
        if meta.len() == 0 {
            return Err(Error::invalid_input(format!(
                "{} is empty",
                canonical.display()
            )));
        }

        let filename = canonical
            .file_name()
            .and_then(|n| n.to_str())
            .context("artifact filename is not valid UTF-8")?
            .to_string();
        let id = filename
            .split_once('.')
            .map_or(filename.as_str(), |(stem, _)| stem)
            .to_string();

        Ok(ArtifactRef {
            id,
            url: format!("{DOWNLOADS_URL_PREFIX}/{filename}"),
            content_type: mime_for_path(&canonical).to_string(),
            path: canonical.display().to_string(),
            size: meta.len(),
            modified: modified_secs(&meta),
            filename,
        })
    }

    /// Finished artifacts, newest first. Partial downloads are skipped.
    pub async fn list(&self) -> Result<Vec<ArtifactRef>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::external("read download dir", e)),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("read download dir entry")?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_partial(name) || validate_filename(name).is_err() {
                continue;
            }
            if let Ok(artifact) = self.artifact_ref(&entry.path()).await {
                out.push(artifact);
            }
        }
        out.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(out)
    }

    /// Delete every file belonging to an allocation (finished or partial).
    /// Used after a failed or timed-out download.
    pub async fn discard(&self, allocation: &Allocation) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::external("read download dir", e)),
        };
        let prefix = format!("{}.", allocation.id);
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("read download dir entry")?
        {
            let belongs = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(&prefix));
            if belongs && fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(id = %allocation.id, removed, "discarded partial artifact files");
        }
        Ok(removed)
    }

    /// Blocking form of [`DownloadStore::discard`], for `Drop` impls.
    pub fn discard_blocking(&self, allocation: &Allocation) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        let prefix = format!("{}.", allocation.id);
        let removed = entries
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with(&prefix))
            })
            .filter(|entry| std::fs::remove_file(entry.path()).is_ok())
            .count();
        if removed > 0 {
            debug!(id = %allocation.id, removed, "discarded abandoned artifact files");
        }
        removed
    }
}

/// Leftovers `yt-dlp` writes while a download is in flight.
pub(crate) fn is_partial(name: &str) -> bool {
    name.ends_with(".part") || name.ends_with(".ytdl") || name.contains(".part-Frag")
}

fn validate_filename(name: &str) -> Result<()> {
    let ok_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if name.is_empty() || name.starts_with('.') || name.contains("..") || !ok_chars {
        return Err(Error::invalid_input(format!("invalid artifact name: {name}")));
    }
    Ok(())
}

fn modified_secs(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

pub(crate) fn age_of(meta: &std::fs::Metadata, now: SystemTime) -> std::time::Duration {
    meta.modified()
        .ok()
        .and_then(|m| now.duration_since(m).ok())
        .unwrap_or_default()
}
