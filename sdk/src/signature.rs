//! Trust vocabulary shared between the engine and its consumers
//!
//! A plugin's trust is described by two independent facts:
//!
//! - its [`Class`], derived once from the root directory it was installed under
//! - its [`Signature`], computed once from the detached signature manifest
//!
//! Both are closed enumerations so that every policy decision over them can be
//! an exhaustive `match`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Origin tier of a plugin, determined by which configured root contains it
///
/// Precedence when roots overlap is `Core > Bundled > External`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Class {
    /// Shipped with the host itself
    Core,
    /// Pre-installed by the host distribution
    Bundled,
    /// Installed by an operator or the installer
    External,
    /// Found outside every configured root
    Unknown,
}

impl Class {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Bundled => "bundled",
            Self::External => "external",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of the signature calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureStatus {
    /// Core plugin, never computed from a manifest
    Internal,
    /// Manifest verified and every listed file matches
    Valid,
    /// Manifest unreadable, unverifiable or bound to another host
    Invalid,
    /// Manifest verified but the plugin content differs from it
    Modified,
    /// No signature manifest present
    Unsigned,
}

impl SignatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Modified => "modified",
            Self::Unsigned => "unsigned",
        }
    }

    /// Whether this status lets a plugin load without any further policy check
    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Internal | Self::Valid)
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a valid signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureType {
    /// Signed by the upstream publisher for public distribution
    Grafana,
    /// Signed for a specific set of host installations (root URLs)
    Private,
}

impl SignatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grafana => "grafana",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grafana" => Ok(Self::Grafana),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown signature type '{}'", other)),
        }
    }
}

/// Resolved signature of a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub status: SignatureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_type: Option<SignatureType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
}

impl Signature {
    pub fn internal() -> Self {
        Self::with_status(SignatureStatus::Internal)
    }

    pub fn unsigned() -> Self {
        Self::with_status(SignatureStatus::Unsigned)
    }

    pub fn invalid() -> Self {
        Self::with_status(SignatureStatus::Invalid)
    }

    pub fn modified() -> Self {
        Self::with_status(SignatureStatus::Modified)
    }

    pub fn valid(signature_type: SignatureType, org: impl Into<String>) -> Self {
        Self {
            status: SignatureStatus::Valid,
            signature_type: Some(signature_type),
            org: Some(org.into()),
        }
    }

    fn with_status(status: SignatureStatus) -> Self {
        Self {
            status,
            signature_type: None,
            org: None,
        }
    }
}
