//! Plugin descriptor types parsed from `plugin.json`
//!
//! A descriptor is the immutable, validated view of a plugin's own manifest.
//! Decoding goes through a permissive raw shape first so that a missing `id`
//! or an unrecognized `type` surface as precise validation errors instead of
//! generic JSON errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;
use thiserror::Error;

/// File name of a plugin's own manifest
pub const PLUGIN_MANIFEST_FILENAME: &str = "plugin.json";

/// Kind of extension a plugin provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    #[serde(rename = "datasource")]
    DataSource,
    Panel,
    App,
    Renderer,
    #[serde(rename = "secretsmanager")]
    SecretsManager,
}

impl PluginType {
    pub const ALL: [PluginType; 5] = [
        PluginType::DataSource,
        PluginType::Panel,
        PluginType::App,
        PluginType::Renderer,
        PluginType::SecretsManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataSource => "datasource",
            Self::Panel => "panel",
            Self::App => "app",
            Self::Renderer => "renderer",
            Self::SecretsManager => "secretsmanager",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DescriptorError::UnknownType(s.to_string()))
    }
}

/// Organization role required to see an included page or dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Viewer,
    Editor,
    Admin,
    /// Members without a basic role
    #[serde(rename = "None")]
    NoBasicRole,
}

/// Link with a display name, used for the author field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoLink {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Human-facing metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: InfoLink,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub updated: String,
}

/// A plugin this plugin depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDependency {
    pub id: String,
    #[serde(rename = "type", default)]
    pub dependency_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Host and plugin dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependencies {
    /// Semver requirement on the host version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana_dependency: Option<String>,
    /// Legacy, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana_version: Option<String>,
    #[serde(default)]
    pub plugins: Vec<PluginDependency>,
}

/// A page, dashboard or nested panel shipped by the plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Include {
    #[serde(rename = "type", default)]
    pub include_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub add_to_nav: bool,
    #[serde(default)]
    pub default_nav: bool,
}

/// Validated contents of a `plugin.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub name: String,
    pub info: Info,
    pub dependencies: Dependencies,
    pub includes: Vec<Include>,
    pub backend: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
}

/// Errors produced while decoding or validating a descriptor
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("missing required field 'id'")]
    MissingId,

    #[error("plugin id '{0}' contains characters outside [a-zA-Z0-9._-]")]
    InvalidId(String),

    #[error("missing required field 'type'")]
    MissingType,

    #[error("unknown plugin type '{0}'")]
    UnknownType(String),

    #[error("backend plugin must declare an 'executable'")]
    MissingExecutable,

    #[error("executable '{0}' must be a relative path inside the plugin directory")]
    InvalidExecutable(String),
}

#[derive(Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    plugin_type: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    info: Info,
    #[serde(default)]
    dependencies: Dependencies,
    #[serde(default)]
    includes: Vec<Include>,
    #[serde(default)]
    backend: bool,
    #[serde(default)]
    executable: Option<String>,
}

impl PluginDescriptor {
    /// Decode and validate a descriptor from JSON text
    pub fn from_json(json: &str) -> Result<Self, DescriptorError> {
        let raw: RawDescriptor =
            serde_json::from_str(json).map_err(|e| DescriptorError::Malformed(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Decode and validate a descriptor from raw bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let raw: RawDescriptor =
            serde_json::from_slice(bytes).map_err(|e| DescriptorError::Malformed(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawDescriptor) -> Result<Self, DescriptorError> {
        let id = raw
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(DescriptorError::MissingId)?;

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(DescriptorError::InvalidId(id));
        }

        let plugin_type: PluginType = raw
            .plugin_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(DescriptorError::MissingType)?
            .parse()?;

        let executable = raw
            .executable
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());

        if raw.backend && executable.is_none() {
            return Err(DescriptorError::MissingExecutable);
        }
        if let Some(executable) = executable.as_deref() {
            if !is_plain_relative(executable) {
                return Err(DescriptorError::InvalidExecutable(executable.to_string()));
            }
        }

        Ok(Self {
            id,
            plugin_type,
            name: raw.name,
            info: raw.info,
            dependencies: raw.dependencies,
            includes: raw.includes,
            backend: raw.backend,
            executable,
        })
    }

    /// Declared version, empty when the manifest omits it
    pub fn version(&self) -> &str {
        &self.info.version
    }

    /// Whether the host must run an external process for this plugin
    pub fn is_backend(&self) -> bool {
        self.backend && self.executable.is_some()
    }
}

/// True when `path` names something below the directory it is joined to
pub fn is_plain_relative(path: &str) -> bool {
    let mut components = Path::new(path).components().peekable();
    components.peek().is_some()
        && components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
