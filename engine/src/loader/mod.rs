//! Plugin loading
//!
//! The loader turns plugin roots into registered plugins:
//!
//! 1. find every `plugin.json` under the roots
//! 2. read and validate each descriptor
//! 3. drop incompatible and duplicate plugins
//! 4. assign each plugin its class from the root containing it
//! 5. link nested plugins to their parent
//! 6. compute signatures (concurrently, on blocking workers)
//! 7. resolve inherited signatures and validate them, parents first
//! 8. register every surviving plugin, rejected ones included
//!
//! Loading never fails as a whole. Every per-plugin problem ends up in the
//! [`LoadReport`], keyed by plugin ID or, when no ID is known yet, by the
//! manifest path.
//!
//! # Examples
//!
//! ```no_run
//! use plugd_engine::config::Config;
//! use plugd_engine::loader::Loader;
//! use plugd_engine::registry::Registry;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_default()?;
//! let registry = Arc::new(Registry::new());
//! let loader = Loader::from_config(&config, Arc::clone(&registry))?;
//!
//! let report = loader.load(&config.scan_roots()).await;
//! for (key, error) in &report.errors {
//!     eprintln!("{}: {}", key, error);
//! }
//! # Ok(())
//! # }
//! ```

mod class;
mod compat;
mod link;

pub use class::{normalize, PluginRoots};
pub use compat::satisfies;
pub use link::link_parents;

use crate::config::Config;
use crate::finder::Finder;
use crate::plugin::Plugin;
use crate::process::{BackendProvider, ProcessProvider};
use crate::registry::Registry;
use crate::signature::{resolve, ParentTrust, SignatureCalculator, SignatureValidator};
use futures::future::join_all;
use sdk::descriptor::PluginDescriptor;
use sdk::errors::{HostError, PluginError};
use sdk::signature::{Class, Signature};
use semver::Version;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Largest `plugin.json` the loader will read
pub const MAX_MANIFEST_SIZE: u64 = 1024 * 1024;

/// Outcome of one [`Loader::load`] call
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Newly registered plugins that passed validation
    pub plugins: Vec<Arc<Plugin>>,
    /// Per-plugin failures, keyed by plugin ID or manifest path
    pub errors: BTreeMap<String, PluginError>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn plugin(&self, id: &str) -> Option<&Arc<Plugin>> {
        self.plugins.iter().find(|p| p.id() == id)
    }
}

/// A descriptor that survived parsing, compatibility and deduplication
struct Candidate {
    descriptor: PluginDescriptor,
    dir: PathBuf,
    class: Class,
}

pub struct Loader {
    finder: Finder,
    roots: PluginRoots,
    calculator: Arc<SignatureCalculator>,
    validator: SignatureValidator,
    host_version: Option<Version>,
    registry: Arc<Registry>,
    provider: Arc<dyn BackendProvider>,
}

impl Loader {
    pub fn new(
        roots: PluginRoots,
        calculator: SignatureCalculator,
        validator: SignatureValidator,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            finder: Finder::new(),
            roots,
            calculator: Arc::new(calculator),
            validator,
            host_version: None,
            registry,
            provider: Arc::new(ProcessProvider::default()),
        }
    }

    /// Build a loader from configuration
    ///
    /// # Errors
    ///
    /// Returns `HostError::Config` if configured key material is invalid.
    pub fn from_config(config: &Config, registry: Arc<Registry>) -> Result<Self, HostError> {
        let calculator = SignatureCalculator::new(config.trusted_keys()?, config.app_url());

        Ok(Self::new(
            config.plugin_roots(),
            calculator,
            SignatureValidator::new(config.signature_policy()),
            registry,
        )
        .with_host_version(config.host_version())
        .with_provider(Arc::new(ProcessProvider::new(config.process_settings()))))
    }

    /// Check `grafanaDependency` against this host version
    pub fn with_host_version(mut self, host_version: Option<Version>) -> Self {
        self.host_version = host_version;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn BackendProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_finder(mut self, finder: Finder) -> Self {
        self.finder = finder;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Discover, verify and register every plugin under `paths`
    pub async fn load(&self, paths: &[PathBuf]) -> LoadReport {
        let mut report = LoadReport::default();

        let manifests = self.finder.find(paths).await;
        tracing::info!("Loading {} plugin manifest(s)", manifests.len());

        let reads = manifests.into_iter().map(|path| async move {
            let read_path = path.clone();
            let result = tokio::task::spawn_blocking(move || read_descriptor(&read_path))
                .await
                .unwrap_or_else(|e| {
                    Err(PluginError::ManifestRead {
                        path: path.clone(),
                        reason: e.to_string(),
                    })
                });
            (path, result)
        });
        let descriptors = join_all(reads).await;

        let candidates = self.select_candidates(descriptors, &mut report);
        let dirs: Vec<PathBuf> = candidates.iter().map(|c| c.dir.clone()).collect();
        let parents = link_parents(&dirs);

        let own_signatures = self.calculate_signatures(&candidates).await;
        let (signatures, verdicts) = self.validate_in_depth_order(&candidates, &parents, own_signatures);

        let ids: Vec<String> = candidates.iter().map(|c| c.descriptor.id.clone()).collect();
        let mut children: Vec<Vec<String>> = vec![Vec::new(); candidates.len()];
        for (child, parent) in parents.iter().enumerate() {
            if let Some(parent) = parent {
                children[*parent].push(ids[child].clone());
            }
        }

        for (i, ((candidate, signature), verdict)) in candidates
            .into_iter()
            .zip(signatures)
            .zip(verdicts)
            .enumerate()
        {
            let id = ids[i].clone();
            let parent = parents[i].map(|p| ids[p].clone());
            let client = self.provider.client_for(&candidate.descriptor, &candidate.dir);

            let plugin = Arc::new(
                Plugin::new(candidate.descriptor, candidate.dir, candidate.class, signature)
                    .with_parent(parent)
                    .with_children(std::mem::take(&mut children[i]))
                    .with_client(client)
                    .with_signature_error(verdict.clone().err()),
            );

            if let Err(e) = self.registry.add(Arc::clone(&plugin)) {
                tracing::warn!(plugin_id = %id, "Skipping plugin: {}", e);
                continue;
            }

            match verdict {
                Ok(()) => {
                    tracing::info!(
                        plugin_id = %id,
                        class = %plugin.class(),
                        signature = %plugin.signature().status,
                        "Plugin loaded"
                    );
                    report.plugins.push(plugin);
                }
                Err(e) => {
                    report.errors.insert(id, e);
                }
            }
        }

        tracing::info!(
            "Loaded {} plugin(s) with {} error(s)",
            report.plugins.len(),
            report.errors.len()
        );
        report
    }

    /// Drop unreadable, duplicate and incompatible descriptors and classify the rest
    fn select_candidates(
        &self,
        descriptors: Vec<(PathBuf, Result<PluginDescriptor, PluginError>)>,
        report: &mut LoadReport,
    ) -> Vec<Candidate> {
        let mut seen_dirs = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut candidates = Vec::new();

        for (manifest_path, result) in descriptors {
            let descriptor = match result {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    tracing::warn!(path = %manifest_path.display(), "Skipping plugin: {}", e);
                    report
                        .errors
                        .insert(manifest_path.display().to_string(), e);
                    continue;
                }
            };

            let dir = normalize(manifest_path.parent().unwrap_or(Path::new("")));
            let dir_key = dir.canonicalize().unwrap_or_else(|_| dir.clone());
            if !seen_dirs.insert(dir_key) {
                tracing::debug!(path = %dir.display(), "Plugin directory already processed");
                continue;
            }

            let id = descriptor.id.clone();
            if self.registry.contains(&id) || !seen_ids.insert(id.clone()) {
                tracing::warn!(plugin_id = %id, path = %dir.display(), "Duplicate plugin ID, skipping");
                continue;
            }

            if let Err(e) = self.check_compatibility(&descriptor) {
                tracing::warn!(plugin_id = %id, "Skipping plugin: {}", e);
                report.errors.insert(id, e);
                continue;
            }

            let class = self.roots.classify(&dir);
            candidates.push(Candidate {
                descriptor,
                dir,
                class,
            });
        }

        candidates
    }

    fn check_compatibility(&self, descriptor: &PluginDescriptor) -> Result<(), PluginError> {
        let (Some(host), Some(constraint)) = (
            &self.host_version,
            descriptor.dependencies.grafana_dependency.as_deref(),
        ) else {
            return Ok(());
        };

        match satisfies(constraint, host) {
            Ok(true) => Ok(()),
            Ok(false) => Err(PluginError::IncompatibleHostVersion {
                plugin_id: descriptor.id.clone(),
                constraint: constraint.to_string(),
                host_version: host.to_string(),
            }),
            Err(e) => {
                tracing::warn!(
                    plugin_id = %descriptor.id,
                    "Ignoring unparseable host version constraint '{}': {}",
                    constraint,
                    e
                );
                Ok(())
            }
        }
    }

    async fn calculate_signatures(&self, candidates: &[Candidate]) -> Vec<Signature> {
        let tasks = candidates.iter().map(|candidate| {
            let calculator = Arc::clone(&self.calculator);
            let descriptor = candidate.descriptor.clone();
            let dir = candidate.dir.clone();
            let class = candidate.class;

            async move {
                tokio::task::spawn_blocking(move || calculator.calculate(&descriptor, &dir, class))
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!("Signature calculation task failed: {}", e);
                        Signature::invalid()
                    })
            }
        });

        join_all(tasks).await
    }

    /// Resolve inheritance and validate, shallowest directories first
    fn validate_in_depth_order(
        &self,
        candidates: &[Candidate],
        parents: &[Option<usize>],
        own: Vec<Signature>,
    ) -> (Vec<Signature>, Vec<Result<(), PluginError>>) {
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by_key(|&i| (candidates[i].dir.components().count(), i));

        let mut resolved: Vec<Option<Signature>> = vec![None; candidates.len()];
        let mut verdicts: Vec<Result<(), PluginError>> = vec![Ok(()); candidates.len()];

        for i in order {
            let candidate = &candidates[i];
            let parent = parents[i].and_then(|p| {
                resolved[p].clone().map(|signature| ParentTrust {
                    class: candidates[p].class,
                    signature,
                })
            });

            let signature = resolve(&own[i], parent.as_ref());
            verdicts[i] = self
                .validator
                .validate(&candidate.descriptor.id, candidate.class, &signature);
            resolved[i] = Some(signature);
        }

        let signatures = resolved
            .into_iter()
            .zip(own)
            .map(|(resolved, own)| resolved.unwrap_or(own))
            .collect();
        (signatures, verdicts)
    }
}

/// Read and validate a `plugin.json`
///
/// # Errors
///
/// `PluginError::ManifestRead` if the file cannot be read or exceeds
/// [`MAX_MANIFEST_SIZE`], `PluginError::ManifestInvalid` if it does not
/// describe a valid plugin.
pub fn read_descriptor(path: &Path) -> Result<PluginDescriptor, PluginError> {
    let read_error = |reason: String| PluginError::ManifestRead {
        path: path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(path).map_err(|e| read_error(e.to_string()))?;
    let mut bytes = Vec::new();
    file.take(MAX_MANIFEST_SIZE + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| read_error(e.to_string()))?;
    if bytes.len() as u64 > MAX_MANIFEST_SIZE {
        return Err(read_error(format!(
            "manifest exceeds {} bytes",
            MAX_MANIFEST_SIZE
        )));
    }

    PluginDescriptor::from_slice(&bytes).map_err(|e| PluginError::ManifestInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
