//! Show the effective monitor configuration

use anyhow::Result;
use famwatch::MonitorConfig;
use famwatch_cli::settings;
use owo_colors::OwoColorize;
use std::path::Path;

/// Print every setting with its effective value
pub async fn run_show(explicit: Option<&Path>) -> Result<()> {
    let config = settings::load(explicit)?;

    println!("{}", "Monitor Configuration".bold());
    match settings::config_path(explicit) {
        Some(path) => println!("{}: {}\n", "Location".dimmed(), path.display().dimmed()),
        None => println!("{}\n", "(built-in defaults)".dimmed()),
    }

    for (key, value) in settings::entries(&config) {
        println!("  {} = {}", key.cyan(), value);
    }
    Ok(())
}

/// Print the default configuration as TOML
pub async fn run_example() -> Result<()> {
    print!("{}", MonitorConfig::default().to_toml_string()?);
    Ok(())
}
