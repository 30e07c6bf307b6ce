//! Attaching managed clients to backend plugins

use super::client::{ManagedClient, ProcessClient, ProcessSettings};
use sdk::descriptor::{is_plain_relative, PluginDescriptor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Creates the managed client of a backend plugin at registration time
pub trait BackendProvider: Send + Sync {
    /// `None` when the plugin has no backend
    fn client_for(&self, descriptor: &PluginDescriptor, dir: &Path) -> Option<Arc<dyn ManagedClient>>;
}

/// Provides [`ProcessClient`]s running the plugin's declared executable
#[derive(Debug, Clone, Default)]
pub struct ProcessProvider {
    settings: ProcessSettings,
}

impl ProcessProvider {
    pub fn new(settings: ProcessSettings) -> Self {
        Self { settings }
    }
}

impl BackendProvider for ProcessProvider {
    fn client_for(&self, descriptor: &PluginDescriptor, dir: &Path) -> Option<Arc<dyn ManagedClient>> {
        if !descriptor.is_backend() {
            return None;
        }
        let name = descriptor.executable.as_deref()?;
        let Some(executable) = resolve_executable(dir, name) else {
            tracing::warn!(
                plugin_id = %descriptor.id,
                executable = name,
                "Backend executable is outside the plugin directory, not attaching a client"
            );
            return None;
        };
        tracing::debug!(
            plugin_id = %descriptor.id,
            executable = %executable.display(),
            "Resolved backend executable"
        );

        Some(Arc::new(ProcessClient::new(
            descriptor.id.clone(),
            executable,
            dir,
            self.settings.clone(),
        )))
    }
}

/// Platform-specific executable path: `<name>_<os>_<arch>[.exe]`, else `<name>`
///
/// `None` when `name` is absolute or climbs out of `dir`.
pub fn resolve_executable(dir: &Path, name: &str) -> Option<PathBuf> {
    if !is_plain_relative(name) {
        return None;
    }

    let mut file_name = format!("{}_{}_{}", name, os_name(), arch_name());
    if cfg!(windows) {
        file_name.push_str(".exe");
    }

    let suffixed = dir.join(file_name);
    if suffixed.is_file() {
        Some(suffixed)
    } else {
        Some(dir.join(name))
    }
}

fn os_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

fn arch_name() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}
