use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;
use super::window::DEFAULT_DELIMITER;

/// Largest request width (character slots, terminator included) the server
/// accepts. Titles must also fit in this many slots.
pub const DEFAULT_MAX_WIDTH: usize = 256;

/// Visible characters a client asks for when no width is given.
pub const DEFAULT_CLIENT_WIDTH: usize = 24;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub scroll: ScrollConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Overridden by `MPD_HOST` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Overridden by `MPD_PORT` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrollConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_max_width")]
    pub max_width: usize,
    #[serde(default = "default_client_width")]
    pub default_width: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Defaults to `$XDG_RUNTIME_DIR/mpd-scroller` or `/tmp/mpd-scroller-<user>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<PathBuf>,
    /// How long a connected client may take to send its width.
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            max_width: default_max_width(),
            default_width: default_client_width(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            runtime_dir: None,
            client_timeout_ms: default_client_timeout_ms(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}

fn default_max_width() -> usize {
    DEFAULT_MAX_WIDTH
}

fn default_client_width() -> usize {
    DEFAULT_CLIENT_WIDTH
}

fn default_client_timeout_ms() -> u64 {
    2000
}

impl PlayerConfig {
    /// Resolve the MPD endpoint: environment first, then this file, then
    /// the built-in `localhost:6600`.
    pub fn endpoint(&self) -> anyhow::Result<(String, u16)> {
        Ok(self.endpoint_with(platform::mpd_env_host(), platform::mpd_env_port()?))
    }

    fn endpoint_with(&self, env_host: Option<String>, env_port: Option<u16>) -> (String, u16) {
        let host = env_host
            .or_else(|| self.host.clone())
            .unwrap_or_else(|| platform::MPD_DEFAULT_HOST.to_string());
        let port = env_port
            .or(self.port)
            .unwrap_or(platform::MPD_DEFAULT_PORT);
        (host, port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DaemonConfig {
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir.clone().unwrap_or_else(platform::runtime_dir)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scroll.max_width < 2 {
            anyhow::bail!("scroll.max_width must be at least 2");
        }
        if self.scroll.default_width == 0 || self.scroll.default_width >= self.scroll.max_width {
            anyhow::bail!(
                "scroll.default_width must be between 1 and {}",
                self.scroll.max_width - 1
            );
        }
        if self.player.timeout_secs == 0 {
            anyhow::bail!("player.timeout_secs must be positive");
        }
        Ok(())
    }
}
