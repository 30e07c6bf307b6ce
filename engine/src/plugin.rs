//! Runtime plugin
//!
//! A [`Plugin`] is created once by the loader and owned by the registry
//! through an `Arc`. Everything except the lifecycle flags is immutable after
//! construction. Parent and children are referenced by ID, never by pointer.

use crate::process::ManagedClient;
use sdk::descriptor::{PluginDescriptor, PluginType};
use sdk::errors::PluginError;
use sdk::signature::{Class, Signature};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Lifecycle {
    decommissioned: bool,
    supervised: bool,
    restarts: u32,
}

pub struct Plugin {
    descriptor: PluginDescriptor,
    dir: PathBuf,
    class: Class,
    signature: Signature,
    signature_error: Option<PluginError>,
    parent: Option<String>,
    children: Vec<String>,
    client: Option<Arc<dyn ManagedClient>>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.descriptor.id)
            .field("dir", &self.dir)
            .field("class", &self.class)
            .field("signature", &self.signature)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("backend", &self.client.is_some())
            .finish()
    }
}

impl Plugin {
    pub fn new(descriptor: PluginDescriptor, dir: impl Into<PathBuf>, class: Class, signature: Signature) -> Self {
        Self {
            descriptor,
            dir: dir.into(),
            class,
            signature,
            signature_error: None,
            parent: None,
            children: Vec::new(),
            client: None,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_children(mut self, children: Vec<String>) -> Self {
        self.children = children;
        self
    }

    pub fn with_client(mut self, client: Option<Arc<dyn ManagedClient>>) -> Self {
        self.client = client;
        self
    }

    /// Mark the plugin as rejected by signature validation
    pub fn with_signature_error(mut self, error: Option<PluginError>) -> Self {
        self.signature_error = error;
        self
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn plugin_type(&self) -> PluginType {
        self.descriptor.plugin_type
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn class(&self) -> Class {
        self.class
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn signature_error(&self) -> Option<&PluginError> {
        self.signature_error.as_ref()
    }

    /// Rejected plugins may be listed but never executed
    pub fn is_rejected(&self) -> bool {
        self.signature_error.is_some()
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn client(&self) -> Option<&Arc<dyn ManagedClient>> {
        self.client.as_ref()
    }

    /// Whether the plugin has a backend process the host manages
    pub fn is_managed(&self) -> bool {
        self.client.is_some()
    }

    /// Whether a started backend has exited
    pub fn exited(&self) -> bool {
        self.client.as_ref().map(|c| c.exited()).unwrap_or(false)
    }

    pub fn is_decommissioned(&self) -> bool {
        self.lifecycle().decommissioned
    }

    /// Irreversibly decommission; returns false if it already was
    pub fn decommission(&self) -> bool {
        let mut lifecycle = self.lifecycle();
        !std::mem::replace(&mut lifecycle.decommissioned, true)
    }

    /// Claim the single supervisory loop of this plugin
    pub(crate) fn claim_supervision(&self) -> bool {
        let mut lifecycle = self.lifecycle();
        !std::mem::replace(&mut lifecycle.supervised, true)
    }

    pub(crate) fn record_restart(&self) -> u32 {
        let mut lifecycle = self.lifecycle();
        lifecycle.restarts += 1;
        lifecycle.restarts
    }

    pub fn restart_count(&self) -> u32 {
        self.lifecycle().restarts
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializable snapshot for listings
    pub fn summary(&self) -> PluginSummary {
        PluginSummary {
            id: self.descriptor.id.clone(),
            plugin_type: self.descriptor.plugin_type,
            name: self.descriptor.name.clone(),
            version: self.descriptor.version().to_string(),
            dir: self.dir.clone(),
            class: self.class,
            signature: self.signature.clone(),
            error: self.signature_error.as_ref().map(|e| e.code()),
            parent: self.parent.clone(),
            children: self.children.clone(),
            backend: self.is_managed(),
            decommissioned: self.is_decommissioned(),
        }
    }
}

/// Serializable view of a [`Plugin`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub name: String,
    pub version: String,
    pub dir: PathBuf,
    pub class: Class,
    pub signature: Signature,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    pub backend: bool,
    pub decommissioned: bool,
}
