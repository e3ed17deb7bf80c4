// Engine timing and local configuration files.
//
// Global config: `~/.copresence/config.toml`

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default period between unconditional re-announcements of local state.
pub const DEFAULT_RESEND_INTERVAL_MS: u64 = 15_000;
/// Default period of the stale-participant sweep.
pub const DEFAULT_PURGE_INTERVAL_MS: u64 = 2_000;
/// Default quiet period before subscribers see a new snapshot.
pub const DEFAULT_NOTIFY_DEBOUNCE_MS: u64 = 250;

pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 99);
pub const DEFAULT_MULTICAST_PORT: u16 = 42424;

/// Root directory for copresence global state: `~/.copresence/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".copresence"))
}

/// Path to the global config file: `~/.copresence/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

// ── Engine timing ──────────────────────────────────────────────────

/// Timers driving one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How often the local state is re-sent, changed or not.
    pub resend_interval: Duration,
    /// How often the state table is swept for stale participants.
    pub purge_interval: Duration,
    /// Quiet period that coalesces table mutations into one notification.
    pub notify_debounce: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resend_interval: Duration::from_millis(DEFAULT_RESEND_INTERVAL_MS),
            purge_interval: Duration::from_millis(DEFAULT_PURGE_INTERVAL_MS),
            notify_debounce: Duration::from_millis(DEFAULT_NOTIFY_DEBOUNCE_MS),
        }
    }
}

impl EngineConfig {
    /// A participant is stale once it has missed two consecutive re-announcements.
    pub fn stale_threshold(&self) -> Duration {
        self.resend_interval * 2
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resend_interval.is_zero()
            || self.purge_interval.is_zero()
            || self.notify_debounce.is_zero()
        {
            return Err(ConfigError::Invalid("engine intervals must be non-zero".into()));
        }
        if self.purge_interval >= self.stale_threshold() {
            return Err(ConfigError::Invalid(format!(
                "purge interval ({:?}) must be shorter than the stale threshold ({:?})",
                self.purge_interval,
                self.stale_threshold()
            )));
        }
        Ok(())
    }
}

// ── Global config ──────────────────────────────────────────────────

/// Global configuration at `~/.copresence/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PresenceConfig {
    /// Default actor identity announced by this machine.
    pub identity: Option<String>,
    pub presence: TimingConfig,
    pub transport: MulticastConfig,
}

impl PresenceConfig {
    /// Load from `~/.copresence/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Timer settings in milliseconds, as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub resend_interval_ms: u64,
    pub purge_interval_ms: u64,
    pub notify_debounce_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            resend_interval_ms: DEFAULT_RESEND_INTERVAL_MS,
            purge_interval_ms: DEFAULT_PURGE_INTERVAL_MS,
            notify_debounce_ms: DEFAULT_NOTIFY_DEBOUNCE_MS,
        }
    }
}

impl TimingConfig {
    /// Convert to a validated `EngineConfig`.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let config = EngineConfig {
            resend_interval: Duration::from_millis(self.resend_interval_ms),
            purge_interval: Duration::from_millis(self.purge_interval_ms),
            notify_debounce: Duration::from_millis(self.notify_debounce_ms),
        };
        config.validate()?;
        Ok(config)
    }
}

/// UDP multicast group used by the LAN transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MulticastConfig {
    pub multicast_group: Ipv4Addr,
    pub port: u16,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self { multicast_group: DEFAULT_MULTICAST_GROUP, port: DEFAULT_MULTICAST_PORT }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
            Self::Invalid(reason) => write!(f, "invalid config: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ── EngineConfig ───────────────────────────────────────────────

    #[test]
    fn engine_config_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.resend_interval, Duration::from_secs(15));
        assert_eq!(cfg.purge_interval, Duration::from_secs(2));
        assert_eq!(cfg.notify_debounce, Duration::from_millis(250));
        assert_eq!(cfg.stale_threshold(), Duration::from_secs(30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn engine_config_rejects_zero_intervals() {
        let cfg = EngineConfig { notify_debounce: Duration::ZERO, ..EngineConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn engine_config_rejects_purge_slower_than_staleness() {
        let cfg = EngineConfig {
            resend_interval: Duration::from_secs(1),
            purge_interval: Duration::from_secs(2),
            ..EngineConfig::default()
        };
        let error = cfg.validate().unwrap_err();
        assert!(error.to_string().contains("must be shorter than the stale threshold"));
    }

    // ── PresenceConfig ─────────────────────────────────────────────

    #[test]
    fn presence_config_defaults() {
        let cfg = PresenceConfig::default();
        assert!(cfg.identity.is_none());
        assert_eq!(cfg.presence.engine_config().unwrap(), EngineConfig::default());
        assert_eq!(cfg.transport.multicast_group, Ipv4Addr::new(239, 255, 42, 99));
        assert_eq!(cfg.transport.port, 42424);
    }

    #[test]
    fn presence_config_parse_from_toml() {
        let toml_str = r#"
identity = "u1"

[presence]
resend_interval_ms = 5000
purge_interval_ms = 1000
notify_debounce_ms = 100

[transport]
multicast_group = "239.1.2.3"
port = 5000
"#;
        let cfg: PresenceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.identity.as_deref(), Some("u1"));
        let engine = cfg.presence.engine_config().unwrap();
        assert_eq!(engine.resend_interval, Duration::from_secs(5));
        assert_eq!(engine.stale_threshold(), Duration::from_secs(10));
        assert_eq!(cfg.transport.multicast_group, Ipv4Addr::new(239, 1, 2, 3));
        assert_eq!(cfg.transport.port, 5000);
    }

    #[test]
    fn presence_config_partial_toml_uses_defaults() {
        let toml_str = r#"
[presence]
notify_debounce_ms = 50
"#;
        let cfg: PresenceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.presence.notify_debounce_ms, 50);
        assert_eq!(cfg.presence.resend_interval_ms, DEFAULT_RESEND_INTERVAL_MS);
        assert_eq!(cfg.transport, MulticastConfig::default());
    }

    #[test]
    fn presence_config_invalid_timing_is_reported() {
        let timing = TimingConfig {
            resend_interval_ms: 1000,
            purge_interval_ms: 5000,
            notify_debounce_ms: 10,
        };
        assert!(timing.engine_config().is_err());
    }

    #[test]
    fn presence_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let cfg = PresenceConfig {
            identity: Some("alice".into()),
            presence: TimingConfig {
                resend_interval_ms: 10_000,
                purge_interval_ms: 1_000,
                notify_debounce_ms: 200,
            },
            transport: MulticastConfig { multicast_group: Ipv4Addr::new(239, 0, 0, 7), port: 6000 },
        };
        cfg.save_to(&path).unwrap();
        let loaded = PresenceConfig::load_from(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn presence_config_load_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let result = PresenceConfig::load_from(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn global_dir_is_under_home() {
        let dir = global_dir().unwrap();
        assert!(dir.ends_with(".copresence"));
    }
}
