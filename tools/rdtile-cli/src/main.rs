//! rdtile CLI: record a screen region through the recording workflow.
//!
//! Usage:
//!   rdtile record --region X,Y,W,H [OPTIONS]   Record a region (p/r/s/d/c on stdin)
//!   rdtile check [--install]                   Report (or install) the encoder
//!   rdtile config [--init]                     Show or create the config file

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rdtile_common::config::{config_file_path, AppConfig};
use rdtile_platform_core::Rect;

mod commands;

#[derive(Parser)]
#[command(
    name = "rdtile",
    about = "Record remote-desktop sessions with privacy masks",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a screen region until stopped
    Record {
        /// Capture region in screen pixels: x,y,width,height
        #[arg(long, value_parser = parse_rect)]
        region: Rect,

        /// Virtual desktop bounds: x,y,width,height
        #[arg(long, value_parser = parse_rect, default_value = "0,0,1920,1080")]
        desktop: Rect,

        /// Mask relative to the region (repeatable): x,y,width,height
        #[arg(long = "mask", value_parser = parse_rect)]
        masks: Vec<Rect>,

        /// Output folder (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target FPS (overrides config)
        #[arg(long)]
        fps: Option<u32>,

        /// Do not draw the cursor
        #[arg(long)]
        no_cursor: bool,

        /// Encoder executable (overrides config)
        #[arg(long)]
        encoder: Option<PathBuf>,
    },

    /// Check encoder availability
    Check {
        /// Download and install the encoder if none is found
        #[arg(long)]
        install: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

/// Parse `x,y,width,height`.
fn parse_rect(value: &str) -> Result<Rect, String> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid number in '{value}': {e}"))?;
    match parts.as_slice() {
        [x, y, w, h] if *w > 0 && *h > 0 => Ok(Rect::new(*x, *y, *w, *h)),
        [_, _, _, _] => Err(format!("'{value}' must have a positive width and height")),
        _ => Err(format!("expected x,y,width,height, got '{value}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config_file_path);
    let mut config = AppConfig::load_from(&config_path);
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    rdtile_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Record {
            region,
            desktop,
            masks,
            output,
            fps,
            no_cursor,
            encoder,
        } => {
            let mut settings = config.recording;
            if let Some(output) = output {
                settings.output_folder = output;
            }
            if let Some(fps) = fps {
                settings.fps = fps;
            }
            if no_cursor {
                settings.include_cursor = false;
            }
            if encoder.is_some() {
                settings.encoder_path = encoder;
            }
            commands::record::run(settings, region, desktop, masks).await
        }
        Commands::Check { install } => commands::check::run(&config, &config_path, install).await,
        Commands::Config { init } => commands::config::run(&config, &config_path, init),
    }
}
