//! Server configuration.
//!
//! Read from a TOML file whose keys are upper case (`SERVER_PORT = 17001`).
//! Each key can be overridden by an environment variable named `COG_<KEY>`;
//! command-line flags in the binary override both.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Prefix of the environment variables that override file values.
pub const ENV_PREFIX: &str = "COG_";

/// Typed server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct ServerConfig {
    /// Console listener port. 0 binds an ephemeral port.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Target wall time of one cycle, in milliseconds.
    #[serde(default = "default_cycle_duration")]
    pub server_cycle_duration: u64,
    /// Script run immediately before the first cycle.
    #[serde(default)]
    pub bootstrap_script: Option<PathBuf>,
    /// Modules loaded at startup, in order.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_port() -> u16 {
    17001
}
fn default_cycle_duration() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            server_cycle_duration: default_cycle_duration(),
            bootstrap_script: None,
            modules: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Parse a config from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse a config from TOML text. `origin` names the source in errors.
    pub fn parse(content: &str, origin: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Apply `COG_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `COG_*` overrides using `lookup` to read variables.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        let var = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));

        if let Some(v) = var("SERVER_PORT") {
            self.server_port = parse_number("SERVER_PORT", &v)?;
        }
        if let Some(v) = var("SERVER_CYCLE_DURATION") {
            self.server_cycle_duration = parse_number("SERVER_CYCLE_DURATION", &v)?;
        }
        if let Some(v) = var("BOOTSTRAP_SCRIPT") {
            self.bootstrap_script = if v.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
        if let Some(v) = var("MODULES") {
            self.modules = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn resolve(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: format!("{key} must be a non-negative integer"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.server_port, 17001);
        assert_eq!(config.server_cycle_duration, 100);
        assert!(config.bootstrap_script.is_none());
        assert!(config.modules.is_empty());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn partial_file_takes_defaults() {
        let config = ServerConfig::parse("SERVER_PORT = 18000\n", "inline").unwrap();
        assert_eq!(config.server_port, 18000);
        assert_eq!(config.server_cycle_duration, 100);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cogserver.toml");
        std::fs::write(
            &path,
            r#"
SERVER_PORT = 0
SERVER_CYCLE_DURATION = 50
BOOTSTRAP_SCRIPT = "boot.cog"
MODULES = ["libhello.so"]
LOG_LEVEL = "debug"
"#,
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.server_port, 0);
        assert_eq!(config.server_cycle_duration, 50);
        assert_eq!(config.bootstrap_script, Some(PathBuf::from("boot.cog")));
        assert_eq!(config.modules, vec!["libhello.so".to_string()]);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = ServerConfig::load(Path::new("/nonexistent/cogserver.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let err = ServerConfig::parse("SERVER_PORT = \"abc\"", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        let err = ServerConfig::parse("NO_SUCH_KEY = 1", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = ServerConfig::parse("SERVER_PORT = 18000", "inline").unwrap();
        config
            .apply_env_from(env(&[
                ("COG_SERVER_PORT", "19000"),
                ("COG_MODULES", "a.so, b.so,"),
                ("COG_BOOTSTRAP_SCRIPT", "init.cog"),
            ]))
            .unwrap();
        assert_eq!(config.server_port, 19000);
        assert_eq!(config.modules, vec!["a.so".to_string(), "b.so".to_string()]);
        assert_eq!(config.bootstrap_script, Some(PathBuf::from("init.cog")));
        assert_eq!(config.server_cycle_duration, 100);
    }

    #[test]
    fn invalid_env_value_rejected() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_env_from(env(&[("COG_SERVER_CYCLE_DURATION", "fast")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SERVER_CYCLE_DURATION"));
        assert_eq!(config.server_cycle_duration, 100);
    }
}
