use std::path::PathBuf;

use clap::Parser;
use motion_pipeline::display::open_display;
use motion_pipeline::{CancellationToken, Pipeline};
use motion_pipeline_common::config::Config;
use motion_pipeline_source::open_provider;
use tracing::{error, info, warn};

/// Detect and annotate motion in a video source.
#[derive(Debug, Parser)]
#[command(name = "motion-pipeline", version)]
struct Cli {
    /// Video file, image directory, http(s) MJPEG URL or any ffmpeg input.
    #[arg(short = 'v', long = "video")]
    video: String,

    /// Blur the regions where motion was detected.
    #[arg(short = 'b', long = "blur")]
    blur: bool,

    /// Optional TOML configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    config.source.locator = cli.video;
    if cli.blur {
        config.render.blur = true;
    }
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        locator = config.source.locator,
        kind = ?config.source.kind,
        blur = config.render.blur,
        display = ?config.render.display,
        "starting motion pipeline"
    );

    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if handler_token.set() {
            info!("interrupt received, stopping pipeline");
        }
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let provider = match open_provider(&config.source) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to open frame source");
            std::process::exit(1);
        }
    };

    let sink = match open_display(&config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open display");
            std::process::exit(1);
        }
    };

    let report = match Pipeline::from_config(&config).run(provider, sink, token) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "pipeline failed to start");
            std::process::exit(1);
        }
    };

    println!("{report}");
    // Abandoned stage threads end with the process.
    std::process::exit(if report.is_success() { 0 } else { 1 });
}
