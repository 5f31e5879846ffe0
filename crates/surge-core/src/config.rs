//! Node configuration.
//!
//! Configuration can be loaded from:
//! - A TOML configuration file
//! - Built programmatically and passed to the node
//!
//! A config is validated when the node is constructed and on every reload.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// Config file could not be parsed.
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    /// Config failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Human-readable node label, shown in cluster info.
    #[serde(default)]
    pub name: String,

    /// Node version string, shown in cluster info.
    #[serde(default)]
    pub version: String,

    /// Prefix marking a channel as private.
    #[serde(default = "default_private_prefix")]
    pub channel_private_prefix: String,

    /// Separator between a namespace name and the rest of the channel.
    #[serde(default = "default_namespace_boundary")]
    pub channel_namespace_boundary: String,

    /// Separator before a channel's user allow-list.
    #[serde(default = "default_user_boundary")]
    pub channel_user_boundary: String,

    /// Separator between user ids inside a user allow-list.
    #[serde(default = "default_user_separator")]
    pub channel_user_separator: String,

    /// Separator before a channel's client allow-list.
    #[serde(default = "default_client_boundary")]
    pub channel_client_boundary: String,

    /// Presence entry TTL in milliseconds.
    #[serde(default = "default_presence_expire_ms")]
    pub client_presence_expire_ms: u64,

    /// Options for channels outside any configured namespace.
    #[serde(default)]
    pub channel_options: ChannelOptions,

    /// Configured namespaces.
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
}

/// Per-namespace channel behavior.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    /// Whether clients may publish into channels directly.
    pub publish: bool,

    /// Whether anonymous (empty user id) connections may subscribe.
    pub anonymous: bool,

    /// Whether presence information is maintained.
    pub presence: bool,

    /// Whether join/leave events are broadcast to subscribers.
    pub join_leave: bool,

    /// Number of publications retained in history. Zero disables history.
    pub history_size: u32,

    /// History retention in milliseconds. Zero disables history.
    pub history_lifetime_ms: u64,
}

/// A named group of channels sharing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace name, matched against the channel prefix.
    pub name: String,

    /// Channel options for this namespace.
    #[serde(flatten)]
    pub options: ChannelOptions,
}

fn default_private_prefix() -> String {
    "$".to_string()
}

fn default_namespace_boundary() -> String {
    ":".to_string()
}

fn default_user_boundary() -> String {
    "#".to_string()
}

fn default_user_separator() -> String {
    ",".to_string()
}

fn default_client_boundary() -> String {
    "&".to_string()
}

fn default_presence_expire_ms() -> u64 {
    60_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            channel_private_prefix: default_private_prefix(),
            channel_namespace_boundary: default_namespace_boundary(),
            channel_user_boundary: default_user_boundary(),
            channel_user_separator: default_user_separator(),
            channel_client_boundary: default_client_boundary(),
            client_presence_expire_ms: default_presence_expire_ms(),
            channel_options: ChannelOptions::default(),
            namespaces: Vec::new(),
        }
    }
}

fn valid_namespace_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl Config {
    /// Load configuration from well-known paths, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed or is
    /// invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let config_paths = [
            "surge.toml",
            "/etc/surge/surge.toml",
            "~/.config/surge/surge.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate delimiters and namespace definitions.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let delimiters = [
            ("channel_private_prefix", &self.channel_private_prefix),
            ("channel_namespace_boundary", &self.channel_namespace_boundary),
            ("channel_user_boundary", &self.channel_user_boundary),
            ("channel_user_separator", &self.channel_user_separator),
            ("channel_client_boundary", &self.channel_client_boundary),
        ];
        for (field, value) in delimiters {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must not be empty")));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for ns in &self.namespaces {
            if !valid_namespace_name(&ns.name) {
                return Err(ConfigError::Invalid(format!(
                    "invalid namespace name: {:?}",
                    ns.name
                )));
            }
            if !seen.insert(ns.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate namespace name: {:?}",
                    ns.name
                )));
            }
        }

        Ok(())
    }

    /// Resolve channel options by namespace name.
    ///
    /// The empty name resolves to the root options; an unknown name resolves
    /// to `None`.
    #[must_use]
    pub fn channel_opts(&self, namespace: &str) -> Option<ChannelOptions> {
        if namespace.is_empty() {
            return Some(self.channel_options.clone());
        }
        self.namespaces
            .iter()
            .find(|ns| ns.name == namespace)
            .map(|ns| ns.options.clone())
    }

    /// Presence entry TTL.
    #[must_use]
    pub fn presence_expire(&self) -> Duration {
        Duration::from_millis(self.client_presence_expire_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.channel_private_prefix, "$");
        assert_eq!(config.channel_namespace_boundary, ":");
        assert_eq!(config.channel_user_boundary, "#");
        assert_eq!(config.channel_user_separator, ",");
        assert_eq!(config.channel_client_boundary, "&");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_channel_opts_resolution() {
        let config = Config {
            namespaces: vec![Namespace {
                name: "chat".into(),
                options: ChannelOptions {
                    presence: true,
                    join_leave: true,
                    history_size: 10,
                    ..ChannelOptions::default()
                },
            }],
            ..Config::default()
        };

        let root = config.channel_opts("").unwrap();
        assert!(!root.presence);

        let chat = config.channel_opts("chat").unwrap();
        assert!(chat.presence);
        assert_eq!(chat.history_size, 10);

        assert!(config.channel_opts("missing").is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            name = "east-1"
            version = "0.1.0"

            [channel_options]
            publish = true

            [[namespaces]]
            name = "chat"
            presence = true
            history_size = 20
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.name, "east-1");
        assert!(config.channel_options.publish);
        assert_eq!(config.namespaces.len(), 1);
        assert!(config.channel_opts("chat").unwrap().presence);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_namespace() {
        let mut config = Config::default();
        config.namespaces.push(Namespace {
            name: "has space".into(),
            options: ChannelOptions::default(),
        });
        assert!(config.validate().is_err());

        config.namespaces[0].name = "chat".into();
        config.namespaces.push(Namespace {
            name: "chat".into(),
            options: ChannelOptions::default(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_delimiter() {
        let config = Config {
            channel_namespace_boundary: String::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
