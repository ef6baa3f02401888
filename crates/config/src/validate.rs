//! Configuration validation.
//!
//! Flags unknown (usually misspelled) keys and values the service cannot run
//! with, such as a zero-sized worker pool.

use std::{collections::HashMap, path::Path};

use crate::schema::MediafetchConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "value"
    pub category: &'static str,
    /// Dotted path, e.g. "fetch.workers"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Known keys per section, mirroring `schema.rs`.
fn known_sections() -> HashMap<&'static str, &'static [&'static str]> {
    HashMap::from([
        ("server", &["bind", "port"][..]),
        (
            "fetch",
            &[
                "ytdlp_path",
                "ffmpeg_location",
                "workers",
                "timeout_secs",
                "max_stderr_bytes",
                "default_format",
                "max_direct_bytes",
            ][..],
        ),
        (
            "downloads",
            &["dir", "max_age_hours", "cleanup_interval_minutes"][..],
        ),
        ("spotify", &["client_id", "client_secret", "bearer_token"][..]),
    ])
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

fn unknown_field(path: String, key: &str, candidates: &[&str]) -> Diagnostic {
    let message = match suggest(key, candidates, 3) {
        Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
        None => "unknown field".into(),
    };
    Diagnostic {
        severity: Severity::Error,
        category: "unknown-field",
        path,
        message,
    }
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered one if `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "syntax",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    let is_toml = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|e| e == "toml");

    match std::fs::read_to_string(actual_path) {
        Ok(content) if is_toml => {
            let mut result = validate_toml_str(&content);
            result.config_path = Some(actual_path.clone());
            result
        },
        Ok(_) => {
            let mut diagnostics = Vec::new();
            match crate::loader::load_config(actual_path) {
                Ok(cfg) => check_values(&cfg, &mut diagnostics),
                Err(e) => diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "type-error",
                    path: String::new(),
                    message: e.to_string(),
                }),
            }
            ValidationResult {
                diagnostics,
                config_path: Some(actual_path.clone()),
            }
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate a TOML string without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    if let Some(table) = value.as_table() {
        check_unknown_fields(table, &mut diagnostics);
    }

    match toml::from_str::<MediafetchConfig>(toml_str) {
        Ok(config) => check_values(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Value checks on an already-loaded config (file plus overrides).
#[must_use]
pub fn check_config(config: &MediafetchConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_values(config, &mut diagnostics);
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    table: &toml::map::Map<String, toml::Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let sections = known_sections();
    let section_names: Vec<&str> = sections.keys().copied().collect();

    for (section, body) in table {
        let Some(fields) = sections.get(section.as_str()) else {
            diagnostics.push(unknown_field(section.clone(), section, &section_names));
            continue;
        };
        let Some(body) = body.as_table() else {
            continue;
        };
        for key in body.keys() {
            if !fields.contains(&key.as_str()) {
                diagnostics.push(unknown_field(format!("{section}.{key}"), key, fields));
            }
        }
    }
}

fn check_values(config: &MediafetchConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut error = |path: &str, message: &str| {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "value",
            path: path.into(),
            message: message.into(),
        });
    };

    if config.fetch.workers == 0 {
        error("fetch.workers", "must be at least 1");
    }
    if config.fetch.timeout_secs == 0 {
        error("fetch.timeout_secs", "must be at least 1");
    }
    if config.fetch.ytdlp_path.trim().is_empty() {
        error("fetch.ytdlp_path", "must name the yt-dlp executable");
    }
    if config.downloads.dir.as_os_str().is_empty() {
        error("downloads.dir", "must not be empty");
    }

    if config.downloads.max_age_hours > 0 && config.downloads.cleanup_interval_minutes == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "value",
            path: "downloads.cleanup_interval_minutes".into(),
            message: "0 disables the cleanup task even though max_age_hours is set".into(),
        });
    }
    if config.spotify.client_id.is_some() && config.spotify.client_secret.is_none() {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "value",
            path: "spotify.client_secret".into(),
            message: "client_id without client_secret; only oEmbed metadata will be used".into(),
        });
    }
}
