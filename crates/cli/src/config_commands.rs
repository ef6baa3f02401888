use std::path::Path;

use {anyhow::Result, clap::Subcommand, secrecy::Secret};

use mediafetch_config::{
    MediafetchConfig, Severity,
    validate::{self, ValidationResult},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration (file + environment) as TOML.
    Show,
    /// Print where config files are searched for.
    Path,
}

pub fn handle_config(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(path, verbose),
        ConfigAction::Show => show(path),
        ConfigAction::Path => {
            println!("./mediafetch.{{toml,yaml,yml,json}}");
            if let Some(dir) = mediafetch_config::config_dir() {
                println!("{}/mediafetch.{{toml,yaml,yml,json}}", dir.display());
            }
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let shown = print_diagnostics(&result, verbose);
    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_diagnostics(result: &ValidationResult, verbose: bool) -> usize {
    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }
        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
        };
        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message);
        } else {
            eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
        }
        shown += 1;
    }
    shown
}

fn show(path: Option<&Path>) -> Result<()> {
    let mut config: MediafetchConfig = match path {
        Some(p) => mediafetch_config::load_config(p)?,
        None => mediafetch_config::discover_and_load(),
    };
    mediafetch_config::apply_env_overrides(&mut config);
    // Secrets serialize in clear text; mask them before printing.
    if config.spotify.client_secret.is_some() {
        config.spotify.client_secret = Some(Secret::new("********".to_string()));
    }
    if config.spotify.bearer_token.is_some() {
        config.spotify.bearer_token = Some(Secret::new("********".to_string()));
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
