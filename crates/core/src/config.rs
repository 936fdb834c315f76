//! duosync configuration file parsing (duosync.toml)

use std::path::Path;
use std::time::Duration;

use crate::hash::Version;

/// Config file name inside the data directory
pub const CONFIG_FILE: &str = "duosync.toml";

/// duosync configuration
#[derive(Debug, serde::Deserialize)]
#[serde(default)]
pub struct DuosyncConfig {
    /// Session version for new staging coordinators (selects the digest)
    pub version: Version,

    /// Installed agent versions unused for longer than this are removed
    pub agent_idle_days: u64,
}

impl Default for DuosyncConfig {
    fn default() -> Self {
        Self {
            version: Version::default(),
            agent_idle_days: 30,
        }
    }
}

impl DuosyncConfig {
    /// Load config from the data directory.
    ///
    /// Returns default config if duosync.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(data_dir: &Path) -> color_eyre::Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Maximum idle period for installed agents
    #[must_use]
    pub fn agent_idle_period(&self) -> Duration {
        Duration::from_secs(self.agent_idle_days.saturating_mul(24 * 60 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r"
version = 1
agent_idle_days = 7
";

        let config: DuosyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.version, Version::Version1);
        assert_eq!(config.agent_idle_days, 7);
        assert_eq!(config.agent_idle_period(), Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn test_parse_empty_config() {
        let config: DuosyncConfig = toml::from_str("").unwrap();
        assert_eq!(config.version, Version::Version2);
        assert_eq!(config.agent_idle_days, 30);
    }

    #[test]
    fn test_reject_unknown_version() {
        assert!(toml::from_str::<DuosyncConfig>("version = 9").is_err());
    }

    #[test]
    fn test_load_missing_and_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = DuosyncConfig::load(dir.path()).unwrap();
        assert_eq!(config.agent_idle_days, 30);

        std::fs::write(dir.path().join(CONFIG_FILE), "agent_idle_days = 1\n").unwrap();
        let config = DuosyncConfig::load(dir.path()).unwrap();
        assert_eq!(config.agent_idle_days, 1);

        std::fs::write(dir.path().join(CONFIG_FILE), "agent_idle_days = \"x\"\n").unwrap();
        assert!(DuosyncConfig::load(dir.path()).is_err());
    }
}
