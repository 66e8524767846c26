use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::state::keys::DEFAULT_NAMESPACE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration, loaded from switchboard.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub redis: RedisSection,
    pub state: StateSection,
    pub routing: RoutingSection,
    pub prefix: PrefixConfig,
    pub upstream: UpstreamSection,
    pub errors: ErrorsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSection {
    pub url: String,
    /// Leading segment of every key.
    pub namespace: String,
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            namespace: DEFAULT_NAMESPACE.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateSection {
    /// Recent messages kept per channel. 0 keeps none.
    pub max_channel_messages: usize,
    /// TTL for entity records. 0 means records never expire.
    pub expire_seconds: u64,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            max_channel_messages: 50,
            expire_seconds: 0,
        }
    }
}

impl StateSection {
    pub fn expire(&self) -> Option<Duration> {
        (self.expire_seconds > 0).then(|| Duration::from_secs(self.expire_seconds))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    /// Routing document, JSON or `.toml`.
    pub path: String,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            path: "routing.json".into(),
        }
    }
}

/// Custom prefixes for one guild. Replaces the default prefix there.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrefixRule {
    pub guild_id: String,
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefixConfig {
    pub default_prefix: String,
    pub guilds: Vec<PrefixRule>,
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self {
            default_prefix: "/".into(),
            guilds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    pub api_base: String,
    /// Bot token for REST calls. Ban backfill is disabled when empty.
    pub token: String,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            api_base: "https://discord.com/api/v10".into(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorsSection {
    /// Error reports per second across the process.
    pub global_per_second: f64,
    /// Error notices per second per channel.
    pub channel_per_second: f64,
}

impl Default for ErrorsSection {
    fn default() -> Self {
        Self {
            global_per_second: 1.0,
            channel_per_second: 0.2,
        }
    }
}

impl SwitchboardConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
            Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_string(),
                source,
            })?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rates = [
            ("errors.global_per_second", self.errors.global_per_second),
            ("errors.channel_per_second", self.errors.channel_per_second),
        ];
        for (field, rate) in rates {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("rate must be a positive number, got {rate}"),
                });
            }
        }
        Ok(())
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply overrides from `lookup` (the process environment in `load`).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("REDIS_URL") {
            self.redis.url = v;
        }
        if let Some(v) = lookup("STATE_NAMESPACE") {
            self.redis.namespace = v;
        }
        if let Some(v) = lookup("ROUTING_PATH") {
            self.routing.path = v;
        }
        if let Some(v) = lookup("UPSTREAM_API") {
            self.upstream.api_base = v;
        }
        if let Some(v) = lookup("UPSTREAM_TOKEN") {
            self.upstream.token = v;
        }
        if let Some(v) = lookup("MAX_CHANNEL_MESSAGES")
            && let Ok(max) = v.parse()
        {
            self.state.max_channel_messages = max;
        }
        if let Some(v) = lookup("DEFAULT_PREFIX") {
            self.prefix.default_prefix = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SwitchboardConfig::default();
        assert_eq!(config.redis.namespace, "project-d");
        assert_eq!(config.prefix.default_prefix, "/");
        assert_eq!(config.state.max_channel_messages, 50);
        assert!(config.state.expire().is_none());
        assert!(config.upstream.token.is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SwitchboardConfig::from_toml(
            r#"
            [redis]
            namespace = "staging"

            [[prefix.guilds]]
            guild_id = "435420687906111498"
            prefixes = ["!"]

            [state]
            expire_seconds = 3600
            "#,
        )
        .unwrap();
        assert_eq!(config.redis.namespace, "staging");
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
        assert_eq!(config.prefix.guilds[0].prefixes, vec!["!"]);
        assert_eq!(config.prefix.default_prefix, "/");
        assert_eq!(config.state.expire(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_overrides() {
        let mut config = SwitchboardConfig::default();
        config.apply_overrides(|name| match name {
            "REDIS_URL" => Some("redis://cache:6379".into()),
            "MAX_CHANNEL_MESSAGES" => Some("10".into()),
            "DEFAULT_PREFIX" => Some("!".into()),
            _ => None,
        });
        assert_eq!(config.redis.url, "redis://cache:6379");
        assert_eq!(config.state.max_channel_messages, 10);
        assert_eq!(config.prefix.default_prefix, "!");
        assert_eq!(config.routing.path, "routing.json");
    }

    #[test]
    fn test_unparsable_override_is_ignored() {
        let mut config = SwitchboardConfig::default();
        config.apply_overrides(|name| (name == "MAX_CHANNEL_MESSAGES").then(|| "lots".into()));
        assert_eq!(config.state.max_channel_messages, 50);
    }

    #[test]
    fn test_non_positive_error_rate_is_rejected() {
        assert!(SwitchboardConfig::default().validate().is_ok());

        let config = SwitchboardConfig::from_toml("[errors]\nglobal_per_second = 0.0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "errors.global_per_second",
                ..
            }
        ));

        let config =
            SwitchboardConfig::from_toml("[errors]\nchannel_per_second = -1.0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = SwitchboardConfig::load("/nonexistent/switchboard.toml").unwrap();
        assert_eq!(config.redis.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = std::env::temp_dir().join(format!("switchboard-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "[redis\nurl = ").unwrap();
        let err = SwitchboardConfig::load(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }
}
