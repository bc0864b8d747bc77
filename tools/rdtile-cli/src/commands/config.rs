//! Config command: show or create the configuration file.

use std::path::Path;

use rdtile_common::config::AppConfig;

pub fn run(config: &AppConfig, path: &Path, init: bool) -> anyhow::Result<()> {
    if init {
        if path.exists() {
            println!("Config already exists: {}", path.display());
        } else {
            AppConfig::default().save_to(path)?;
            println!("Wrote default config: {}", path.display());
        }
    }

    println!("Config file: {}", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
