//! ghost agent entry point.
//!
//! ```text
//! ghost-agent                   Run in the foreground
//! ghost-agent --config <path>   Load a custom config TOML
//! ghost-agent --port <port>     Override the listen port
//! ghost-agent --gen-config      Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ghost_agent::config::{AgentConfig, ConfigSource};
use ghost_agent::service::AgentService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ghost-agent", about = "Screen and system-audio mirroring agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "ghost-agent.toml")]
    config: PathBuf,

    /// Listen port (overrides the config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&AgentConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let (mut config, source) = AgentConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match source {
        ConfigSource::File => info!("config: {}", cli.config.display()),
        ConfigSource::Missing => info!("no config at {}; using defaults", cli.config.display()),
        ConfigSource::Invalid(e) => {
            warn!("invalid config {}: {e}; using defaults", cli.config.display())
        }
    }

    info!("ghost-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("listen: {}", config.bind_addr());
    info!("initial fps: {}", config.video.initial_fps);
    info!("monitor: {}", config.video.monitor_index);
    info!("audio: {}", if config.audio.enabled { "on" } else { "off" });

    AgentService::new(config).run().await
}
