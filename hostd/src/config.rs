//! Configuration loading for the host daemon
//!
//! Loads `hostd.toml` from the configuration directory. A missing file is
//! not an error: the daemon runs with built-in defaults, which suit a
//! freshly installed host. A present-but-broken file is fatal, since
//! silently ignoring an operator's configuration would be worse than
//! refusing to start.

use anyhow::{Context, Result};
use shared::config::HostdConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Name of the daemon configuration file inside the config directory.
const CONFIG_FILE: &str = "hostd.toml";

/// Loads and holds the daemon configuration.
pub struct ConfigManager {
    config_dir: PathBuf,
    pub config: Option<HostdConfig>,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        if !config_dir.exists() {
            anyhow::bail!(
                "Configuration directory does not exist: {}",
                config_dir.display()
            );
        }
        Ok(Self {
            config_dir,
            config: None,
        })
    }

    /// Load (or reload) hostd.toml.
    pub fn load_config(&mut self) -> Result<&HostdConfig> {
        let config_path = self.config_dir.join(CONFIG_FILE);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let config = HostdConfig::from_toml(&content)
                .with_context(|| format!("Invalid configuration: {}", config_path.display()))?;
            info!(path = %config_path.display(), "Configuration loaded");
            config
        } else {
            warn!(
                path = %config_path.display(),
                "No configuration file found, using defaults"
            );
            let config = HostdConfig::default();
            config.validate()?;
            config
        };

        self.config = Some(config);
        Ok(self.config.as_ref().unwrap())
    }
}
