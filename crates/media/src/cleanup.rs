//! Age-based cleanup of the download directory.

use std::time::{Duration, SystemTime};

use {
    tokio::{fs, task::JoinHandle},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Context, Error, Result},
    store::{DownloadStore, age_of},
};

/// Delete files (finished or partial) last modified more than `max_age` ago.
/// Returns the number of files removed.
pub async fn remove_older_than(store: &DownloadStore, max_age: Duration) -> Result<usize> {
    let mut entries = match fs::read_dir(store.dir()).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::external("read download dir", e)),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .context("read download dir entry")?
    {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() || age_of(&meta, now) < max_age {
            continue;
        }
        let path = entry.path();
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed expired artifact");
                removed += 1;
            },
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove expired artifact"),
        }
    }
    Ok(removed)
}

/// Run [`remove_older_than`] every `interval` until the task is aborted.
pub fn spawn_cleanup_task(
    store: DownloadStore,
    max_age: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match remove_older_than(&store, max_age).await {
                Ok(0) => {},
                Ok(removed) => info!(removed, "download cleanup"),
                Err(e) => warn!(error = %e, "download cleanup failed"),
            }
        }
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_age_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path());
        let a = store.allocate();
        fs::write(a.path_with_ext("mp3"), b"x").await.unwrap();
        fs::write(a.path_with_ext("mp4.part"), b"x")
            .await
            .unwrap();

        let removed = remove_older_than(&store, Duration::ZERO).await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fresh_files_survive() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path());
        let a = store.allocate();
        fs::write(a.path_with_ext("mp3"), b"x").await.unwrap();

        let removed = remove_older_than(&store, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_dir_is_a_noop() {
        let store = DownloadStore::new("/nonexistent/mediafetch/cleanup");
        assert_eq!(remove_older_than(&store, Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn task_sweeps_on_first_tick() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path());
        let path = store.allocate().path_with_ext("webm");
        fs::write(&path, b"x").await.unwrap();

        let handle = spawn_cleanup_task(store, Duration::ZERO, Duration::from_secs(3600));
        for _ in 0..50 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert!(!path.exists());
    }
}
