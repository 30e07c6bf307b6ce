//! Backend process supervision
//!
//! Each started backend plugin gets exactly one supervisory loop. The loop
//! ticks every `poll_interval` and restarts the backend when its client
//! reports that it exited. It exits for good when the plugin is
//! decommissioned or the host shuts down.
//!
//! ```text
//! NotStarted --start--> Running --exit--> Exited --tick--> Running
//!                          |                 |
//!                          +------stop-------+--> Decommissioned
//! ```
//!
//! Host shutdown is broadcast over a `watch` channel; it aborts in-flight
//! starts and wakes every loop.

use super::client::ManagedClient;
use crate::plugin::Plugin;
use crate::registry::Registry;
use futures::future::join_all;
use sdk::errors::HostError;
use sdk::signature::Class;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Supervision timing
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct Supervisor {
    registry: Arc<Registry>,
    settings: SupervisorSettings,
    shutdown_tx: watch::Sender<bool>,
    loops: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(registry: Arc<Registry>, settings: SupervisorSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            settings,
            shutdown_tx,
            loops: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Start a plugin's backend and put it under supervision
    ///
    /// A no-op for plugins without a managed backend, core plugins, rejected
    /// plugins and decommissioned plugins. A plugin decommissioned while its
    /// start is in flight has its backend stopped again.
    ///
    /// # Errors
    ///
    /// The first start's failure is returned to the caller. Later restarts
    /// are retried by the supervisory loop and only logged.
    pub async fn start(&self, plugin: &Arc<Plugin>) -> Result<(), HostError> {
        let Some(client) = plugin.client() else {
            return Ok(());
        };
        if plugin.class() == Class::Core || plugin.is_rejected() || plugin.is_decommissioned() {
            tracing::debug!(plugin_id = plugin.id(), "Plugin backend is not eligible to start");
            return Ok(());
        }

        start_client(plugin.id(), client, self.shutdown_tx.subscribe()).await?;

        // stop() may have run while the start was in flight
        if plugin.is_decommissioned() {
            tracing::debug!(plugin_id = plugin.id(), "Plugin decommissioned during start");
            return client.stop().await;
        }

        if plugin.claim_supervision() {
            let handle = tokio::spawn(supervise(
                Arc::clone(plugin),
                self.settings.clone(),
                self.shutdown_tx.subscribe(),
            ));
            self.loops
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(plugin.id().to_string(), handle);
        }

        Ok(())
    }

    /// Start every live backend plugin in the registry
    ///
    /// Returns the plugins that failed to start; the others keep running.
    pub async fn start_all(&self) -> Vec<(String, HostError)> {
        let plugins = self.registry.plugins(&[]);
        let results = join_all(plugins.iter().map(|p| self.start(p))).await;

        plugins
            .iter()
            .zip(results)
            .filter_map(|(plugin, result)| {
                result.err().map(|e| {
                    tracing::error!(plugin_id = plugin.id(), "Failed to start plugin backend: {}", e);
                    (plugin.id().to_string(), e)
                })
            })
            .collect()
    }

    /// Decommission a plugin and stop its backend
    ///
    /// # Errors
    ///
    /// `HostError::PluginNotRegistered` for unknown IDs, or the client's stop
    /// failure.
    pub async fn stop(&self, id: &str) -> Result<(), HostError> {
        let plugin = self
            .registry
            .record(id)
            .ok_or_else(|| HostError::PluginNotRegistered(id.to_string()))?;

        plugin.decommission();

        let handle = self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(handle) = handle {
            handle.abort();
        }

        if let Some(client) = plugin.client() {
            client.stop().await?;
        }
        tracing::info!(plugin_id = id, "Plugin stopped");
        Ok(())
    }

    /// Broadcast host shutdown without waiting for anything
    pub fn cancel(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop every managed backend concurrently and wait for all loops
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down plugin backends");
        self.cancel();

        let plugins: Vec<Arc<Plugin>> = self
            .registry
            .records()
            .into_iter()
            .filter(|p| p.is_managed())
            .collect();

        join_all(plugins.iter().map(|plugin| async move {
            if let Some(client) = plugin.client() {
                if let Err(e) = client.stop().await {
                    tracing::warn!(plugin_id = plugin.id(), "Failed to stop plugin backend: {}", e);
                }
            }
        }))
        .await;

        let handles: Vec<JoinHandle<()>> = self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        join_all(handles).await;

        tracing::info!("All plugin backends stopped");
    }

    /// Restarts performed by the supervisory loop, `None` for unknown IDs
    pub fn restart_count(&self, id: &str) -> Option<u32> {
        self.registry.record(id).map(|p| p.restart_count())
    }
}

async fn start_client(
    plugin_id: &str,
    client: &Arc<dyn ManagedClient>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), HostError> {
    let cancelled = || HostError::Cancelled(format!("start of plugin {}", plugin_id));

    if *shutdown.borrow() {
        return Err(cancelled());
    }

    tokio::select! {
        result = client.start() => result,
        _ = shutdown_signalled(&mut shutdown) => Err(cancelled()),
    }
}

/// Resolves once shutdown is broadcast or the supervisor is gone
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn supervise(plugin: Arc<Plugin>, settings: SupervisorSettings, mut shutdown: watch::Receiver<bool>) {
    let Some(client) = plugin.client().cloned() else {
        return;
    };

    let mut interval = tokio::time::interval(settings.poll_interval);
    // First tick fires immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        if *shutdown.borrow() {
            return;
        }
        if plugin.is_decommissioned() {
            tracing::debug!(plugin_id = plugin.id(), "Plugin decommissioned, ending supervision");
            return;
        }
        if !client.exited() {
            continue;
        }

        tracing::warn!(plugin_id = plugin.id(), "Plugin backend exited, restarting");
        match start_client(plugin.id(), &client, shutdown.clone()).await {
            Ok(()) => {
                let restarts = plugin.record_restart();
                tracing::info!(plugin_id = plugin.id(), restarts, "Plugin backend restarted");

                // stop() may have run while the restart was in flight
                if plugin.is_decommissioned() {
                    if let Err(e) = client.stop().await {
                        tracing::warn!(plugin_id = plugin.id(), "Failed to stop plugin backend: {}", e);
                    }
                    return;
                }
            }
            Err(HostError::Cancelled(_)) => return,
            Err(e) => {
                tracing::error!(plugin_id = plugin.id(), "Failed to restart plugin backend: {}", e);
            }
        }
    }
}
