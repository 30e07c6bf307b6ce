//! Signature validation
//!
//! Turns a computed signature into an allow/deny decision. Two pure steps:
//!
//! 1. [`resolve`]: a nested plugin inherits its parent's signature unless it
//!    is trusted on its own or the parent is a core plugin.
//! 2. [`SignatureValidator::validate`]: decides on the resolved signature,
//!    the plugin's class and the host policy.

use sdk::errors::PluginError;
use sdk::signature::{Class, Signature, SignatureStatus};
use std::collections::HashSet;

/// Host policy for plugins that are not trusted by signature
#[derive(Debug, Clone, Default)]
pub struct SignaturePolicy {
    dev_mode: bool,
    allow_unsigned: HashSet<String>,
}

impl SignaturePolicy {
    pub fn new(dev_mode: bool, allow_unsigned: impl IntoIterator<Item = String>) -> Self {
        Self {
            dev_mode,
            allow_unsigned: allow_unsigned.into_iter().collect(),
        }
    }

    /// Reject every unsigned plugin
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn is_dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Whether an unsigned plugin with this ID may load
    pub fn allows_unsigned(&self, plugin_id: &str) -> bool {
        self.dev_mode || self.allow_unsigned.contains(plugin_id)
    }
}

/// What a child plugin may inherit from its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentTrust {
    pub class: Class,
    /// The parent's already resolved signature
    pub signature: Signature,
}

/// Resolve a plugin's effective signature from its own and its parent's
pub fn resolve(own: &Signature, parent: Option<&ParentTrust>) -> Signature {
    if own.status.is_trusted() {
        return own.clone();
    }

    match parent {
        Some(parent)
            if parent.class != Class::Core
                && parent.signature.status != SignatureStatus::Internal =>
        {
            parent.signature.clone()
        }
        _ => own.clone(),
    }
}

/// Applies a [`SignaturePolicy`] to resolved signatures
#[derive(Debug, Clone, Default)]
pub struct SignatureValidator {
    policy: SignaturePolicy,
}

impl SignatureValidator {
    pub fn new(policy: SignaturePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SignaturePolicy {
        &self.policy
    }

    /// Decide whether a plugin may load
    ///
    /// # Errors
    ///
    /// `PluginError::Signature` carrying the status that caused the rejection.
    /// Invalid and modified signatures are rejected regardless of policy.
    pub fn validate(
        &self,
        plugin_id: &str,
        class: Class,
        signature: &Signature,
    ) -> Result<(), PluginError> {
        let reject = |status| PluginError::Signature {
            plugin_id: plugin_id.to_string(),
            status,
        };

        match signature.status {
            SignatureStatus::Valid | SignatureStatus::Internal => Ok(()),
            status if matches!(class, Class::Core | Class::Bundled) => {
                tracing::debug!(plugin_id, %class, %status, "Allowing operator-installed plugin");
                Ok(())
            }
            SignatureStatus::Unsigned => {
                if self.policy.allows_unsigned(plugin_id) {
                    tracing::warn!(
                        plugin_id,
                        dev_mode = self.policy.is_dev_mode(),
                        "Loading unsigned plugin"
                    );
                    Ok(())
                } else {
                    tracing::warn!(plugin_id, "Rejecting unsigned plugin");
                    Err(reject(SignatureStatus::Unsigned))
                }
            }
            status @ (SignatureStatus::Invalid | SignatureStatus::Modified) => {
                tracing::warn!(plugin_id, %status, "Rejecting plugin with untrusted signature");
                Err(reject(status))
            }
        }
    }
}
