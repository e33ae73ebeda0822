//! Configuration display command.

use console::style;

use crate::config::{Config, Settings};

/// Print the effective settings as a TOML config file.
pub fn cmd_config_show(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let source = config
        .source_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults (no config file found)".to_string());
    eprintln!("{} Loaded from: {}", style("→").dim(), source);

    if let Err(e) = settings.validate() {
        eprintln!("{} {}", style("!").yellow(), e);
    }

    print!("{}", toml::to_string_pretty(&settings.to_config())?);
    Ok(())
}
