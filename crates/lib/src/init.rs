//! Initialize the configuration directory: create ~/.larkops and a default
//! config file the user can fill in with credentials.

use crate::config::Config;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Create the config directory and a default config file if they do not exist.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }
    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_parseable_default_config() {
        let dir = std::env::temp_dir().join(format!("larkops-init-test-{}", uuid::Uuid::new_v4()));
        let config_path = dir.join("config.json");
        init_config_dir(&config_path).expect("init");
        let s = std::fs::read_to_string(&config_path).expect("read config");
        let config: Config = serde_json::from_str(&s).expect("parse config");
        assert_eq!(config.communications.lark.port, 9090);
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn init_does_not_overwrite_existing_config() {
        let dir = std::env::temp_dir().join(format!("larkops-init-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create dir");
        let config_path = dir.join("config.json");
        std::fs::write(&config_path, "{\"settings\":{\"clusterName\":\"keep\"}}").expect("seed");
        init_config_dir(&config_path).expect("init");
        let s = std::fs::read_to_string(&config_path).expect("read config");
        assert!(s.contains("keep"));
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
