//! Check command: report what the recorder needs and whether it is present.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

use rdtile_capture_engine::encoder_args::CaptureSource;
use rdtile_capture_engine::locator::{EncoderLocator, InstallProgressCallback, InstallStage};
use rdtile_common::config::AppConfig;

pub async fn run(config: &AppConfig, config_path: &Path, install: bool) -> anyhow::Result<()> {
    println!("rdtile System Check");
    println!("{}", "=".repeat(50));
    println!();

    if config_path.exists() {
        println!("[OK] Config: {}", config_path.display());
    } else {
        println!("[--] Config: {} (defaults in use)", config_path.display());
    }

    let locator = EncoderLocator::from_settings(&config.recording);
    match locator.locate().await {
        Some((path, source)) => println!("[OK] Encoder: {} ({source:?})", path.display()),
        None if install => {
            println!("[..] Encoder not found, installing");
            let last_decile = AtomicU8::new(u8::MAX);
            let progress: InstallProgressCallback = Box::new(move |p| match p.stage {
                InstallStage::Downloading => {
                    if let Some(percent) = p.percent() {
                        if last_decile.swap(percent / 10, Ordering::Relaxed) != percent / 10 {
                            println!("     downloading {percent}%");
                        }
                    }
                }
                InstallStage::Extracting => println!("     extracting"),
                InstallStage::Complete => {}
            });
            match locator.resolve(Some(&progress)).await {
                Ok((path, source)) => println!("[OK] Encoder: {} ({source:?})", path.display()),
                Err(e) => println!("[FAIL] {e}"),
            }
        }
        None => {
            println!("[WARN] Encoder: not found");
            println!("       Install ffmpeg on PATH or set \"recording.encoder_path\"");
            println!("       `rdtile check --install` downloads it when a URL is configured");
        }
    }

    println!("[OK] Screen grab input: {:?}", CaptureSource::platform_default());

    let output = &config.recording.output_folder;
    if output.is_dir() {
        println!("[OK] Output folder: {}", output.display());
    } else {
        println!("[--] Output folder: {} (created on first recording)", output.display());
    }

    println!();
    println!(
        "Capture rate: {} fps, cursor {}",
        config.recording.fps,
        if config.recording.include_cursor { "on" } else { "off" }
    );
    Ok(())
}
