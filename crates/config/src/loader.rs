use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::MediafetchConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "mediafetch.toml",
    "mediafetch.yaml",
    "mediafetch.yml",
    "mediafetch.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<MediafetchConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./mediafetch.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/mediafetch/mediafetch.{toml,yaml,yml,json}` (user-global)
///
/// Returns `MediafetchConfig::default()` if no config file is found.
pub fn discover_and_load() -> MediafetchConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    MediafetchConfig::default()
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/mediafetch/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "mediafetch").map(|d| d.config_dir().to_path_buf())
}

/// Apply environment overrides from the process environment.
///
/// `PORT` wins over the config file.
pub fn apply_env_overrides(config: &mut MediafetchConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

/// Same as [`apply_env_overrides`] with a custom lookup, for tests.
pub fn apply_env_overrides_with(
    config: &mut MediafetchConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(raw) = non_empty("PORT") {
        match raw.trim().parse::<u16>() {
            Ok(port) => config.server.port = port,
            Err(_) => warn!(value = %raw, "ignoring invalid PORT"),
        }
    }
    if let Some(dir) = non_empty("MEDIAFETCH_DOWNLOAD_DIR") {
        config.downloads.dir = PathBuf::from(dir);
    }
    if let Some(id) = non_empty("SPOTIFY_CLIENT_ID") {
        config.spotify.client_id = Some(id);
    }
    if let Some(secret) = non_empty("SPOTIFY_CLIENT_SECRET") {
        config.spotify.client_secret = Some(Secret::new(secret));
    }
    if let Some(token) = non_empty("SPOTIFY_BEARER_TOKEN") {
        config.spotify.bearer_token = Some(Secret::new(token));
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<MediafetchConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_env_overrides_config() {
        let mut cfg = MediafetchConfig::default();
        apply_env_overrides_with(&mut cfg, |name| {
            (name == "PORT").then(|| "8080".to_string())
        });
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn missing_port_env_keeps_default() {
        let mut cfg = MediafetchConfig::default();
        apply_env_overrides_with(&mut cfg, |_| None);
        assert_eq!(cfg.server.port, 5000);
    }

    #[test]
    fn invalid_port_env_is_ignored() {
        let mut cfg = MediafetchConfig::default();
        cfg.server.port = 6000;
        apply_env_overrides_with(&mut cfg, |name| {
            (name == "PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(cfg.server.port, 6000);
    }

    #[test]
    fn spotify_env_overrides() {
        let mut cfg = MediafetchConfig::default();
        apply_env_overrides_with(&mut cfg, |name| match name {
            "SPOTIFY_CLIENT_ID" => Some("id".into()),
            "SPOTIFY_CLIENT_SECRET" => Some("secret".into()),
            "MEDIAFETCH_DOWNLOAD_DIR" => Some("/srv/downloads".into()),
            _ => None,
        });
        assert!(cfg.spotify.has_client_credentials());
        assert_eq!(cfg.downloads.dir, PathBuf::from("/srv/downloads"));
    }

    #[test]
    fn loads_each_format() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("mediafetch.toml");
        std::fs::write(&toml_path, "[server]\nport = 7000\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().server.port, 7000);

        let yaml_path = dir.path().join("mediafetch.yaml");
        std::fs::write(&yaml_path, "fetch:\n  workers: 9\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().fetch.workers, 9);

        let json_path = dir.path().join("mediafetch.json");
        std::fs::write(&json_path, r#"{"downloads": {"max_age_hours": 0}}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().downloads.max_age_hours, 0);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mediafetch.ini");
        std::fs::write(&path, "port=1").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }
}
