mod config_commands;
mod fetch_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use mediafetch_config::MediafetchConfig;

#[derive(Parser)]
#[command(name = "mediafetch", about = "mediafetch: fetch media over HTTP with yt-dlp")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (default: discover mediafetch.{toml,yaml,json}).
    #[arg(long, global = true, env = "MEDIAFETCH_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides `PORT` and the config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Download directory (overrides config value).
    #[arg(long, global = true)]
    download_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default when no subcommand is provided).
    Serve,
    /// Download one URL and print the artifact as JSON.
    Fetch(fetch_commands::FetchArgs),
    /// Print metadata for a URL as JSON.
    Info {
        url: String,
    },
    /// Delete downloads older than the configured (or given) age.
    Cleanup {
        /// Override `downloads.max_age_hours`.
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // One-shot commands print JSON on stdout; keep logs on stderr.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// File, then environment, then command-line flags.
fn resolve_config(cli: &Cli) -> anyhow::Result<MediafetchConfig> {
    let mut config = match cli.config {
        Some(ref path) => mediafetch_config::load_config(path)?,
        None => mediafetch_config::discover_and_load(),
    };
    mediafetch_config::apply_env_overrides(&mut config);
    apply_cli_overrides(cli, &mut config);
    Ok(config)
}

fn apply_cli_overrides(cli: &Cli, config: &mut MediafetchConfig) {
    if let Some(ref bind) = cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref dir) = cli.download_dir {
        config.downloads.dir = dir.clone();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(Commands::Config { action }) = cli.command {
        return config_commands::handle_config(action, cli.config.as_deref());
    }

    let config = resolve_config(&cli)?;
    match cli.command {
        // Default: start the server when no subcommand is provided.
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "mediafetch starting");
            mediafetch_gateway::start_gateway(config).await
        },
        Some(Commands::Fetch(args)) => fetch_commands::fetch(&config, args).await,
        Some(Commands::Info { url }) => fetch_commands::info(&config, &url).await,
        Some(Commands::Cleanup { max_age_hours }) => {
            fetch_commands::cleanup(&config, max_age_hours).await
        },
        Some(Commands::Config { .. }) => Ok(()),
    }
}
