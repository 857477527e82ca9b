//! `forgepilot config`: inspect or initialize the configuration.

use std::path::Path;

use anyhow::{Context, bail};
use forgepilot_config::AppConfig;

pub fn show(config_path: Option<&Path>) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;
    if config.backend.api_key.is_some() {
        config.backend.api_key = Some("***".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    println!("{}", super::config_file(config_path).display());
}

pub fn print_default() {
    println!("{}", AppConfig::default_toml());
}

/// Write the default configuration, refusing to clobber an existing file
/// unless `force` is set.
pub fn init(config_path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = super::config_file(config_path);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_default(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn write_default(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_a_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        init(Some(path.as_path()), false).unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.max_iterations, AppConfig::default().agent.max_iterations);
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nport = 9000\n").unwrap();
        assert!(init(Some(path.as_path()), false).is_err());
        init(Some(path.as_path()), true).unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.gateway.port, AppConfig::default().gateway.port);
    }

    #[test]
    fn explicit_path_wins() {
        let path = Path::new("/tmp/forgepilot-test.toml");
        assert_eq!(super::super::config_file(Some(path)), path);
        assert!(
            super::super::config_file(None)
                .to_string_lossy()
                .ends_with("config.toml")
        );
    }
}
