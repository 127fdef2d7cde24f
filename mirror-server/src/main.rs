//! mirror-server entry point.
//!
//! ```text
//! mirror-server                  Run one session in the foreground
//! mirror-server --config <path>  Load a custom config TOML
//! mirror-server --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mirror_server::config::ServerConfig;
use mirror_server::service::MirrorService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mirror-server", about = "Device-side screen mirroring server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "mirror-server.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = ServerConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("mirror-server v{}", env!("CARGO_PKG_VERSION"));
    let mode = if config.connection.tunnel_forward { "forward" } else { "reverse" };
    info!("sockets: {} ({mode})", config.connection.socket_dir.display());
    info!("video: {} ({:?}, {} bps)", config.video.enabled, config.video.codec, config.video.bit_rate);
    info!("audio: {} ({:?}, {} bps)", config.audio.enabled, config.audio.codec, config.audio.bit_rate);
    info!("control: {}", config.control.enabled);

    let service = MirrorService::new(&config)?;
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;

    Ok(())
}
