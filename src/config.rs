use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level client config, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Process names watched during discovery and disconnect classification.
    pub processes: ProcessNames,
    /// Interval between presence and readiness polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Keep reconnecting after a session ends. When false the run ends with
    /// the first session.
    pub reconnect: bool,
    pub http: HttpConfig,
    pub websocket: WebsocketConfig,
    /// Event subscriptions used by the `watch` command.
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// Executable names of the client process family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessNames {
    /// The process exposing the API; credentials are read from its command line.
    pub target: String,
    /// Launcher UI shown after logging out of the target.
    pub launcher: String,
    /// Background service that outlives both UIs while the stack is up.
    pub services: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsocketConfig {
    /// How long to wait for the peer's close echo on a graceful stop.
    pub close_grace_ms: u64,
}

/// A single `(path, verb)` subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub uri: String,
    pub event_type: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            processes: ProcessNames::default(),
            poll_interval_ms: 1000,
            reconnect: true,
            http: HttpConfig::default(),
            websocket: WebsocketConfig::default(),
            subscriptions: Vec::new(),
        }
    }
}

impl Default for ProcessNames {
    fn default() -> Self {
        Self {
            target: "LeagueClientUx.exe".to_string(),
            launcher: "RiotClientUx.exe".to_string(),
            services: "RiotClientServices.exe".to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self { close_grace_ms: 1000 }
    }
}

impl ClientConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.websocket.close_grace_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be greater than zero".into()));
        }
        for (field, name) in [
            ("processes.target", &self.processes.target),
            ("processes.launcher", &self.processes.launcher),
            ("processes.services", &self.processes.services),
        ] {
            if name.is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }
}

/// Default config location: `<config dir>/lcu-link/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lcu-link").join("config.toml"))
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::Invalid(reason) => write!(f, "Invalid config: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Warn if the config file is world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Config file {} is world-readable (mode {:o}); consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

#[cfg(unix)]
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
