//! Config commands

use std::path::Path;

use anyhow::{Context, Result, bail};
use index_relay::config::Config;

/// Load a config file, or the defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<Config> {
  match path {
    Some(path) => Config::load(path).with_context(|| format!("Failed to load config from {}", path.display())),
    None => Ok(Config::default()),
  }
}

pub fn cmd_config_show(path: Option<&Path>) -> Result<()> {
  let config = load_config(path)?;
  print!("{}", config.to_toml().context("Failed to render config")?);
  Ok(())
}

pub fn cmd_config_init(path: &Path, force: bool) -> Result<()> {
  if path.exists() && !force {
    bail!("{} already exists (use --force to overwrite)", path.display());
  }

  let template = Config::template().context("Failed to render config")?;
  std::fs::write(path, template).with_context(|| format!("Failed to write {}", path.display()))?;
  println!("Wrote {}", path.display());
  Ok(())
}
