//! Configuration management
//!
//! This module handles loading, validation, and management of the plugd configuration.
//! Configuration is stored in TOML format at ~/.plugd/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, host base URL, host version
//! - **paths**: Core, bundled and external plugin roots
//! - **security**: Development mode, unsigned allow-list, trusted signing keys
//! - **supervisor**: Backend process timing and extra environment
//!
//! Every section is optional; a missing file yields the default configuration.
//!
//! # Path Expansion
//!
//! Plugin roots may start with `~`, which is expanded to the user's home
//! directory. Roots are not required to exist: discovery logs and skips
//! missing roots.
//!
//! # Examples
//!
//! ```no_run
//! use plugd_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_default()?;
//!
//! println!("Log level: {}", config.core.log_level);
//! println!("Scan roots: {:?}", config.scan_roots());
//! # Ok(())
//! # }
//! ```

use crate::loader::PluginRoots;
use crate::process::{ProcessSettings, SupervisorSettings};
use crate::signature::{SignaturePolicy, TrustedKeys};
use sdk::errors::HostError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core host settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Plugin root directories
    #[serde(default)]
    pub paths: PathsConfig,

    /// Signature policy and trusted keys
    #[serde(default)]
    pub security: SecurityConfig,

    /// Backend process supervision
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Core host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Base URL the host is served from, matched against private signature root URLs
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// Host version checked against each plugin's `grafanaDependency`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_version: Option<String>,
}

/// Plugin root directories (support ~ expansion)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Plugins shipped with the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core: Option<PathBuf>,

    /// Plugins pre-installed by the distribution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundled: Option<PathBuf>,

    /// Operator-installed plugins
    #[serde(default = "default_external_paths")]
    pub external: Vec<PathBuf>,
}

/// Security configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Load unsigned plugins without an allow-list entry
    #[serde(default)]
    pub dev_mode: bool,

    /// Plugin IDs allowed to load unsigned
    #[serde(default)]
    pub allow_unsigned: Vec<String>,

    /// Additional signing keys, on top of the key embedded at build time
    #[serde(default)]
    pub trusted_keys: Vec<TrustedKeyConfig>,
}

/// A signing key trusted for `MANIFEST.txt` verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedKeyConfig {
    /// Key ID referenced by the manifest's `keyId`
    pub id: String,

    /// Hex-encoded Ed25519 public key (32 bytes)
    pub public_key: String,
}

/// Process supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Interval between liveness checks (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Time allowed for a backend to print its handshake line (seconds)
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Time allowed for a backend to exit after SIGTERM (seconds)
    #[serde(default = "default_stop_grace_period_secs")]
    pub stop_grace_period_secs: u64,

    /// Extra environment passed to every backend process
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            app_url: default_app_url(),
            host_version: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            core: None,
            bundled: None,
            external: default_external_paths(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            stop_grace_period_secs: default_stop_grace_period_secs(),
            env: BTreeMap::new(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_app_url() -> String {
    "http://localhost:3000/".to_string()
}

fn default_external_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("~/.plugd/plugins")]
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_stop_grace_period_secs() -> u64 {
    5
}

impl Config {
    /// Load configuration from the default location (~/.plugd/config.toml)
    ///
    /// A missing file is not an error: the default configuration is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub fn load_or_default() -> Result<Self, HostError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            tracing::debug!("No config at {}, using defaults", config_path.display());
            let mut config = Self::default();
            config.validate_and_process()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_from_path(path: &Path) -> Result<Self, HostError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| HostError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, HostError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| HostError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.plugd/config.toml)
    pub fn default_config_path() -> Result<PathBuf, HostError> {
        let home = dirs::home_dir()
            .ok_or_else(|| HostError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".plugd").join("config.toml"))
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level
    /// - Validates the host base URL and host version
    /// - Validates trusted key material
    /// - Expands ~ in plugin roots
    fn validate_and_process(&mut self) -> Result<(), HostError> {
        // Validate log level
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(HostError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        Url::parse(&self.core.app_url).map_err(|e| {
            HostError::Config(format!("Invalid app_url '{}': {}", self.core.app_url, e))
        })?;

        if let Some(version) = &self.core.host_version {
            semver::Version::parse(version.trim()).map_err(|e| {
                HostError::Config(format!("Invalid host_version '{}': {}", version, e))
            })?;
        }

        // Fail early on bad key material instead of at first verification
        self.trusted_keys()?;

        if self.supervisor.poll_interval_ms == 0 {
            return Err(HostError::Config(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.supervisor.handshake_timeout_secs == 0 {
            return Err(HostError::Config(
                "handshake_timeout_secs must be greater than 0".to_string(),
            ));
        }

        // Expand plugin roots
        if let Some(core) = &self.paths.core {
            self.paths.core = Some(expand_path(core)?);
        }
        if let Some(bundled) = &self.paths.bundled {
            self.paths.bundled = Some(expand_path(bundled)?);
        }
        self.paths.external = self
            .paths
            .external
            .iter()
            .map(|p| expand_path(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(())
    }

    /// Roots used for class assignment
    pub fn plugin_roots(&self) -> PluginRoots {
        PluginRoots::new(
            self.paths.core.clone(),
            self.paths.bundled.clone(),
            self.paths.external.clone(),
        )
    }

    /// Directories to scan, in core, bundled, external order
    pub fn scan_roots(&self) -> Vec<PathBuf> {
        self.paths
            .core
            .iter()
            .chain(self.paths.bundled.iter())
            .chain(self.paths.external.iter())
            .cloned()
            .collect()
    }

    pub fn signature_policy(&self) -> SignaturePolicy {
        SignaturePolicy::new(
            self.security.dev_mode,
            self.security.allow_unsigned.iter().cloned(),
        )
    }

    /// Embedded signing key plus every configured key
    ///
    /// # Errors
    ///
    /// Returns `HostError::Config` if a configured key is not 32 bytes of hex
    /// or is not a valid Ed25519 point.
    pub fn trusted_keys(&self) -> Result<TrustedKeys, HostError> {
        let mut keys = TrustedKeys::with_embedded();
        for key in &self.security.trusted_keys {
            keys.insert_hex(&key.id, &key.public_key)?;
        }
        Ok(keys)
    }

    /// Parsed host base URL
    pub fn app_url(&self) -> Option<Url> {
        Url::parse(&self.core.app_url).ok()
    }

    /// Parsed host version, when configured
    pub fn host_version(&self) -> Option<semver::Version> {
        self.core
            .host_version
            .as_deref()
            .and_then(|v| semver::Version::parse(v.trim()).ok())
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            poll_interval: Duration::from_millis(self.supervisor.poll_interval_ms),
        }
    }

    pub fn process_settings(&self) -> ProcessSettings {
        ProcessSettings {
            handshake_timeout: Duration::from_secs(self.supervisor.handshake_timeout_secs),
            stop_grace_period: Duration::from_secs(self.supervisor.stop_grace_period_secs),
            env: self.supervisor.env.clone(),
        }
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, HostError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| HostError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| HostError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| HostError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.core.app_url, "http://localhost:3000/");
        assert!(!config.security.dev_mode);
        assert_eq!(config.supervisor.poll_interval_ms, 1000);
        assert_eq!(config.supervisor.handshake_timeout_secs, 10);
        assert_eq!(config.supervisor.stop_grace_period_secs, 5);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        let home = dirs::home_dir().unwrap();
        assert_eq!(config.paths.external, vec![home.join(".plugd/plugins")]);
        assert!(config.paths.core.is_none());
    }

    #[test]
    fn test_scan_roots_order() {
        let config = Config::from_toml_str(
            r#"
            [paths]
            core = "/opt/core"
            bundled = "/opt/bundled"
            external = ["/srv/a", "/srv/b"]
            "#,
        )
        .unwrap();

        assert_eq!(
            config.scan_roots(),
            vec![
                PathBuf::from("/opt/core"),
                PathBuf::from("/opt/bundled"),
                PathBuf::from("/srv/a"),
                PathBuf::from("/srv/b"),
            ]
        );
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let err = Config::from_toml_str("[core]\nlog_level = \"loud\"").unwrap_err();
        assert!(matches!(err, HostError::Config(_)));
    }

    #[test]
    fn test_invalid_app_url_rejected() {
        let err = Config::from_toml_str("[core]\napp_url = \"not a url\"").unwrap_err();
        assert!(matches!(err, HostError::Config(_)));
    }

    #[test]
    fn test_invalid_trusted_key_rejected() {
        let toml = r#"
            [[security.trusted_keys]]
            id = "k1"
            public_key = "abcd"
        "#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, HostError::Config(_)));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.paths.external, deserialized.paths.external);
    }
}
