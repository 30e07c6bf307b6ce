//! Command handlers for CLI operations
//!
//! - scan: load plugins once and report what was accepted or rejected
//! - verify: compute the signature of one plugin directory
//! - run: load plugins and supervise their backends until a signal arrives

use anyhow::{Context, Result};
use sdk::{PlugdErrorExt, PluginError, PLUGIN_MANIFEST_FILENAME};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::loader::{read_descriptor, LoadReport, Loader};
use crate::plugin::Plugin;
use crate::process::Supervisor;
use crate::registry::Registry;
use crate::signature::{SignatureCalculator, SignatureValidator};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Load plugins from `paths`, or the configured roots when empty
pub async fn handle_scan(paths: Vec<PathBuf>, config: &Config, format: OutputFormat) -> Result<()> {
    let registry = Arc::new(Registry::new());
    let report = load(&paths, config, Arc::clone(&registry)).await?;

    print_plugins(&registry.records(), &report.errors, format)
}

/// Compute and validate the signature of the plugin in `dir`
pub async fn handle_verify(dir: PathBuf, config: &Config, format: OutputFormat) -> Result<()> {
    let descriptor = read_descriptor(&dir.join(PLUGIN_MANIFEST_FILENAME))?;
    let class = config.plugin_roots().classify(&dir);
    let calculator = SignatureCalculator::new(config.trusted_keys()?, config.app_url());

    let signature = {
        let descriptor = descriptor.clone();
        tokio::task::spawn_blocking(move || calculator.calculate(&descriptor, &dir, class))
            .await
            .context("Signature calculation task failed")?
    };

    let validator = SignatureValidator::new(config.signature_policy());
    let verdict = validator.validate(&descriptor.id, class, &signature);

    match format {
        OutputFormat::Text => {
            println!("Plugin:    {} ({})", descriptor.id, descriptor.plugin_type);
            println!("Class:     {}", class);
            println!("Signature: {}", signature.status);
            if let Some(signature_type) = signature.signature_type {
                println!("Type:      {}", signature_type);
            }
            if let Some(org) = &signature.org {
                println!("Signed by: {}", org);
            }
            match &verdict {
                Ok(()) => println!("Verdict:   allowed"),
                Err(e) => {
                    println!("Verdict:   rejected ({})", e.code());
                    println!("Hint:      {}", e.user_hint());
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "id": descriptor.id,
                "class": class,
                "signature": signature,
                "allowed": verdict.is_ok(),
                "error": verdict.as_ref().err().map(|e| e.code()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Load plugins, start their backends and supervise them until SIGINT or
/// SIGTERM
pub async fn handle_run(paths: Vec<PathBuf>, config: &Config, format: OutputFormat) -> Result<()> {
    let registry = Arc::new(Registry::new());
    let report = load(&paths, config, Arc::clone(&registry)).await?;

    print_plugins(&registry.records(), &report.errors, format)?;

    let supervisor = Supervisor::new(Arc::clone(&registry), config.supervisor_settings());
    let failures = supervisor.start_all().await;
    for (plugin_id, error) in &failures {
        tracing::warn!(plugin_id = %plugin_id, hint = error.user_hint(), "Backend not started");
    }

    tracing::info!(
        plugins = registry.len(),
        failed = failures.len(),
        "plugd running, press Ctrl-C to stop"
    );

    wait_for_signal().await?;
    supervisor.shutdown().await;

    Ok(())
}

async fn load(paths: &[PathBuf], config: &Config, registry: Arc<Registry>) -> Result<LoadReport> {
    let loader = Loader::from_config(config, registry).context("Failed to configure loader")?;

    let roots = if paths.is_empty() {
        config.scan_roots()
    } else {
        paths.to_vec()
    };

    tracing::info!(roots = roots.len(), "Scanning for plugins");
    Ok(loader.load(&roots).await)
}

fn print_plugins(
    plugins: &[Arc<Plugin>],
    errors: &BTreeMap<String, PluginError>,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("Plugins:");
            if plugins.is_empty() {
                println!("  (none)");
            }
            for plugin in plugins {
                println!(
                    "  {:<32} {:<14} {:<9} {:<9} {}",
                    plugin.id(),
                    plugin.plugin_type(),
                    plugin.class(),
                    plugin.signature().status,
                    if plugin.is_rejected() { "rejected" } else { "ok" }
                );
            }

            if !errors.is_empty() {
                println!();
                println!("Errors:");
                for (key, error) in errors {
                    println!("  {}: {}", key, error);
                    println!("    hint: {}", error.user_hint());
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "plugins": plugins.iter().map(|p| p.summary()).collect::<Vec<_>>(),
                "errors": errors
                    .iter()
                    .map(|(key, error)| {
                        json!({
                            "key": key,
                            "code": error.code(),
                            "message": error.to_string(),
                        })
                    })
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Received interrupt signal");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM signal");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Received interrupt signal");
    Ok(())
}
