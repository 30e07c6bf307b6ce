//! Error types and handling
//!
//! Two error families are used throughout plugd:
//!
//! - [`PluginError`]: a failure isolated to a single plugin (bad manifest,
//!   incompatible host version, signature rejection). These are collected
//!   into per-plugin maps and never abort loading of other plugins, so they
//!   are `Clone` and carry only owned, printable data.
//! - [`HostError`]: operational failures of the host itself (configuration,
//!   I/O, process spawn and handshake, registry misuse).
//!
//! Both implement [`PlugdErrorExt`], which provides user-facing hints that are
//! safe to show to operators without exposing internal detail.

use crate::signature::SignatureStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Trait for plugd error extensions
pub trait PlugdErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is a static string: it never echoes paths, IDs or other data
    /// taken from the error payload.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors may clear on their own (a retry, a restart of the
    /// backend process). Non-recoverable errors need operator action such as
    /// reinstalling or re-signing a plugin.
    fn is_recoverable(&self) -> bool;
}

/// A failure scoped to exactly one plugin
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("failed to read plugin manifest {path:?}: {reason}")]
    ManifestRead { path: PathBuf, reason: String },

    #[error("invalid plugin manifest {path:?}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("plugin {plugin_id} requires host version {constraint}, host is {host_version}")]
    IncompatibleHostVersion {
        plugin_id: String,
        constraint: String,
        host_version: String,
    },

    #[error("plugin {plugin_id}: signature {status}")]
    Signature {
        plugin_id: String,
        status: SignatureStatus,
    },
}

impl PluginError {
    /// Stable, machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::ManifestRead { .. } => "manifestUnreadable",
            Self::ManifestInvalid { .. } => "manifestInvalid",
            Self::IncompatibleHostVersion { .. } => "hostVersionIncompatible",
            Self::Signature { status, .. } => match status {
                SignatureStatus::Unsigned => "signatureMissing",
                SignatureStatus::Modified => "signatureModified",
                SignatureStatus::Invalid => "signatureInvalid",
                SignatureStatus::Valid | SignatureStatus::Internal => "signatureUnrecognized",
            },
        }
    }

    /// Signature status carried by a signature rejection
    pub fn signature_status(&self) -> Option<SignatureStatus> {
        match self {
            Self::Signature { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Plugin ID, when the failure happened after the ID was known
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::IncompatibleHostVersion { plugin_id, .. } | Self::Signature { plugin_id, .. } => {
                Some(plugin_id)
            }
            Self::ManifestRead { .. } | Self::ManifestInvalid { .. } => None,
        }
    }
}

impl PlugdErrorExt for PluginError {
    fn user_hint(&self) -> &str {
        match self {
            Self::ManifestRead { .. } => "Plugin manifest could not be read. Check file permissions",
            Self::ManifestInvalid { .. } => "Plugin manifest is malformed. Reinstall the plugin",
            Self::IncompatibleHostVersion { .. } => {
                "Plugin does not support this host version. Install a compatible release"
            }
            Self::Signature { status, .. } => match status {
                SignatureStatus::Unsigned => {
                    "Plugin is unsigned. Allow-list it or enable development mode to load it"
                }
                SignatureStatus::Modified => {
                    "Plugin files differ from its signature. Reinstall the plugin"
                }
                SignatureStatus::Invalid => "Plugin signature is invalid. Reinstall the plugin",
                SignatureStatus::Valid | SignatureStatus::Internal => {
                    "Plugin signature state is not recognized"
                }
            },
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::ManifestRead { .. } => true,
            Self::Signature { status, .. } => *status == SignatureStatus::Unsigned,
            Self::ManifestInvalid { .. } | Self::IncompatibleHostVersion { .. } => false,
        }
    }
}

/// Main host error type
#[derive(Debug, Error)]
pub enum HostError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Registry errors
    #[error("Plugin not registered: {0}")]
    PluginNotRegistered(String),

    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    // Per-plugin failures surfaced through host operations
    #[error(transparent)]
    Plugin(#[from] PluginError),

    // Process supervision errors
    #[error("Failed to spawn backend for plugin {plugin_id}: {reason}")]
    ProcessSpawn { plugin_id: String, reason: String },

    #[error("Handshake with backend for plugin {plugin_id} failed: {reason}")]
    Handshake { plugin_id: String, reason: String },

    #[error("Failed to stop backend for plugin {plugin_id}: {reason}")]
    ProcessStop { plugin_id: String, reason: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlugdErrorExt for HostError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::PluginNotRegistered(_) => "The requested plugin is not loaded",
            Self::DuplicatePlugin(_) => "A plugin with the same ID is already loaded",
            Self::Plugin(e) => e.user_hint(),
            Self::ProcessSpawn { .. } => "Plugin backend could not be started. Check plugin logs",
            Self::Handshake { .. } => "Plugin backend did not complete its handshake",
            Self::ProcessStop { .. } => "Plugin backend did not stop cleanly",
            Self::Cancelled(_) => "Host is shutting down",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::DuplicatePlugin(_) | Self::Cancelled(_) => false,
            Self::Plugin(e) => e.is_recoverable(),
            _ => true,
        }
    }
}
