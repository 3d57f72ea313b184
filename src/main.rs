use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use timeline_compositor::{
    audio::AudioLoader,
    config::Config,
    ops::Operations,
    video::MediaLoader,
};

#[derive(Parser)]
#[command(
    name = "timeline-compositor",
    version,
    about = "Compose clips, images and audio into a rendered timeline",
    long_about = "Timeline-Compositor joins video segments and still images with transitions and effects, stretches video to match an audio track, and renders the result through ffmpeg. Operations are described as JSON requests and answered with JSON results on stdout."
)]
struct Cli {
    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a JSON request `{"operation": ..., "params": {...}}` from a file or `-` for stdin
    Run {
        request: PathBuf,
    },

    /// Print media metadata as JSON
    Probe {
        path: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Timeline-Compositor v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => {
            debug!("Using default configuration");
            Config::default()
        }
    };

    match cli.command {
        Command::Run { request } => {
            let json = if request.as_os_str() == "-" {
                let mut text = String::new();
                tokio::io::stdin().read_to_string(&mut text).await?;
                text
            } else {
                tokio::fs::read_to_string(&request)
                    .await
                    .with_context(|| format!("reading request {}", request.display()))?
            };

            let result = Operations::new(config).run_json(&json).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                std::process::exit(1);
            }
        }
        Command::Probe { path } => {
            let loader = MediaLoader::new(&config.render);
            let value = if MediaLoader::is_supported(&path) {
                serde_json::to_value(loader.probe(&path)?)?
            } else {
                serde_json::to_value(AudioLoader::probe(&path)?)?
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Config => {
            config.validate()?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
