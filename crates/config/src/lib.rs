//! Configuration loading, validation and env substitution.
//!
//! Config files: `mediafetch.toml`, `mediafetch.yaml`, or `mediafetch.json`
//! Searched in `./` then `~/.config/mediafetch/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values. `PORT` and a few
//! other variables override file values (see [`apply_env_overrides`]).

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, apply_env_overrides_with, config_dir, discover_and_load, load_config},
    schema::{
        DEFAULT_PORT, DownloadsConfig, FetchConfig, MediafetchConfig, ServerConfig, SpotifyConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
