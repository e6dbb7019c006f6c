use crate::controller::ControllerSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};

const CONFIG_DIR: &str = "hidcontrollers";
const CONFIG_FILE: &str = "config.toml";
const SNAPSHOT_FILE: &str = "devices.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Unknown log level '{0}'")]
    LogLevel(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct AppConfig {
    pub controller: ControllerSettings,
    pub logging: LoggingConfig,
    pub transport: TransportConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<Level, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::LogLevel(self.level.clone()))
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct TransportConfig {
    /// Device list for the snapshot transport; defaults next to the config file
    pub snapshot_path: Option<PathBuf>,
}

impl TransportConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_path
            .clone()
            .unwrap_or_else(|| config_dir().join(SNAPSHOT_FILE))
    }
}

/// Platform config directory for this application
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
}

pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

impl AppConfig {
    /// Loads the configuration file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&default_config_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::load(&dir.path().join("config.toml")).expect("load");
        assert_eq!(config.controller.load_timeout_ms, 5000);
        assert_eq!(config.logging.level().expect("level"), Level::INFO);
        assert!(config.transport.snapshot_path.is_none());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[controller]\npoll_interval_ms = 500\n\n[logging]\nlevel = \"debug\"\n\n[transport]\nsnapshot_path = \"/tmp/devices.toml\"\n",
        )
        .expect("write");

        let config = AppConfig::load(&path).expect("load");
        assert_eq!(config.controller.poll_interval_ms, Some(500));
        assert_eq!(config.controller.value_channel_capacity, 64);
        assert_eq!(config.logging.level().expect("level"), Level::DEBUG);
        assert_eq!(
            config.transport.snapshot_path(),
            PathBuf::from("/tmp/devices.toml")
        );
    }

    #[test]
    fn invalid_values_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[controller]\nload_timeout_ms = \"soon\"\n").expect("write");
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse { .. })));

        let logging = LoggingConfig {
            level: "loud".to_string(),
        };
        assert!(matches!(logging.level(), Err(ConfigError::LogLevel(_))));
    }
}
