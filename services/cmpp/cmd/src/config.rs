//! Configuration handling for the probe.
//!
//! Values come from the shared YAML config file first, then from `CMPP_*`
//! environment variables. Command-line flags are applied last by `main`.

use anyhow::Result;
use cmpp_wire::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Probe configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// ISMG address, host:port
    pub addr: String,
    /// Source address used as the login account
    pub user: String,
    /// Shared secret for the authenticator
    pub secret: String,
    /// Protocol version to speak
    pub version: Version,
    /// Dial timeout
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7891".to_string(),
            user: String::new(),
            secret: String::new(),
            version: Version::V30,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    cmpp: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    config: Option<HashMap<String, String>>,
}

impl ProbeConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root) => {
                    config.apply_root_config(root);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_overrides(|key| std::env::var(key).ok());

        info!(
            "Final probe configuration: addr={}, user={}, version={}, timeout={:?}",
            config.addr, config.user, config.version, config.timeout
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root: RootConfig) {
        let values = root
            .services
            .and_then(|services| services.cmpp)
            .and_then(|service| service.config);

        for (key, value) in values.into_iter().flatten() {
            match key.as_str() {
                "services.cmpp.addr" => self.addr = value,
                "services.cmpp.user" => self.user = value,
                "services.cmpp.secret" => self.secret = value,
                "services.cmpp.version" => self.set_version(&value, &key),
                "services.cmpp.timeout" => self.set_timeout(&value, &key),
                _ => {
                    // Ignore unknown configuration keys
                }
            }
        }
    }

    /// Apply `CMPP_*` overrides looked up through `lookup`
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("CMPP_ADDR") {
            info!("Address overridden by environment: {}", addr);
            self.addr = addr;
        }

        if let Some(user) = lookup("CMPP_USER") {
            info!("User overridden by environment: {}", user);
            self.user = user;
        }

        if let Some(secret) = lookup("CMPP_SECRET") {
            info!("Secret overridden by environment");
            self.secret = secret;
        }

        if let Some(version) = lookup("CMPP_VERSION") {
            self.set_version(&version, "CMPP_VERSION");
        }

        if let Some(timeout) = lookup("CMPP_TIMEOUT") {
            self.set_timeout(&timeout, "CMPP_TIMEOUT");
        }
    }

    fn set_version(&mut self, value: &str, source: &str) {
        match value.parse::<Version>() {
            Ok(version) => self.version = version,
            Err(e) => warn!("Ignoring {}: {}", source, e),
        }
    }

    fn set_timeout(&mut self, value: &str, source: &str) {
        match humantime::parse_duration(value) {
            Ok(timeout) => self.timeout = timeout,
            Err(e) => warn!("Ignoring {}={:?}: {}", source, value, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ProbeConfig::default();
        assert_eq!(config.addr, "127.0.0.1:7891");
        assert_eq!(config.version, Version::V30);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
services:
  cmpp:
    enabled: true
    config:
      services.cmpp.addr: "10.0.0.8:7890"
      services.cmpp.user: "900001"
      services.cmpp.secret: "888888"
      services.cmpp.version: "2.1"
      services.cmpp.timeout: "1500ms"
      services.cmpp.unknown: "ignored"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ProbeConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.addr, "10.0.0.8:7890");
        assert_eq!(config.user, "900001");
        assert_eq!(config.secret, "888888");
        assert_eq!(config.version, Version::V21);
        assert_eq!(config.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let yaml_content = r#"
services:
  cmpp:
    config:
      services.cmpp.version: "9.9"
      services.cmpp.timeout: "soon"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ProbeConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.version, Version::V30);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_unparsable_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"services: [not, a, map").unwrap();

        let config = ProbeConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.addr, ProbeConfig::default().addr);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("CMPP_ADDR", "192.168.1.1:7891"),
            ("CMPP_USER", "123456"),
            ("CMPP_VERSION", "V20"),
            ("CMPP_TIMEOUT", "2s"),
        ]
        .into_iter()
        .collect();

        let mut config = ProbeConfig::default();
        config.secret = "from-file".to_string();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.addr, "192.168.1.1:7891");
        assert_eq!(config.user, "123456");
        assert_eq!(config.secret, "from-file");
        assert_eq!(config.version, Version::V20);
        assert_eq!(config.timeout, Duration::from_secs(2));
    }
}
