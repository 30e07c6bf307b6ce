//! Signature calculation
//!
//! Produces the [`Signature`] of one plugin directory from its
//! `MANIFEST.txt`. The result is a pure function of the directory contents,
//! the trusted keys and the host base URL: files are visited in sorted order
//! and every failure maps to exactly one terminal status.
//!
//! | condition                                              | status     |
//! |--------------------------------------------------------|------------|
//! | core class                                             | `internal` |
//! | no manifest, or manifest shorter than 10 bytes         | `unsigned` |
//! | undecodable, unverifiable, unknown key                 | `invalid`  |
//! | private signature not bound to this host               | `invalid`  |
//! | ID or version differ from `plugin.json`                | `modified` |
//! | listed file missing, unreadable, escaping or changed   | `modified` |
//! | 2.x manifest and an unlisted file or escaping symlink  | `modified` |
//! | otherwise                                              | `valid`    |

use super::keys::TrustedKeys;
use super::manifest::{SignatureManifest, MANIFEST_FILENAME};
use sdk::descriptor::PluginDescriptor;
use sdk::signature::{Class, Signature, SignatureType};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use url::Url;
use walkdir::WalkDir;

/// Manifests shorter than this are treated as absent
const MIN_MANIFEST_LEN: usize = 10;

/// Computes plugin signatures against a fixed set of trusted keys
#[derive(Debug, Clone)]
pub struct SignatureCalculator {
    keys: TrustedKeys,
    app_url: Option<Url>,
}

impl SignatureCalculator {
    /// # Arguments
    ///
    /// * `keys` - Keys a manifest's `keyId` may refer to
    /// * `app_url` - Host base URL; private signatures are invalid without one
    pub fn new(keys: TrustedKeys, app_url: Option<Url>) -> Self {
        Self { keys, app_url }
    }

    /// Compute the signature of the plugin installed in `dir`
    pub fn calculate(&self, descriptor: &PluginDescriptor, dir: &Path, class: Class) -> Signature {
        let plugin_id = descriptor.id.as_str();

        if class == Class::Core {
            return Signature::internal();
        }

        let manifest_path = dir.join(MANIFEST_FILENAME);
        let bytes = match std::fs::read(&manifest_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(plugin_id, "No {} found", MANIFEST_FILENAME);
                return Signature::unsigned();
            }
            Err(e) => {
                tracing::warn!(plugin_id, "Could not read {}: {}", MANIFEST_FILENAME, e);
                return Signature::invalid();
            }
        };

        if bytes.len() < MIN_MANIFEST_LEN {
            tracing::debug!(plugin_id, "{} is too short to be a manifest", MANIFEST_FILENAME);
            return Signature::unsigned();
        }

        let manifest = match SignatureManifest::read_verified(&bytes, &self.keys) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(plugin_id, "Plugin signature is invalid: {}", e);
                return Signature::invalid();
            }
        };

        if manifest.plugin != descriptor.id {
            tracing::warn!(
                plugin_id,
                "Signature manifest is for plugin '{}'",
                manifest.plugin
            );
            return Signature::modified();
        }
        if manifest.version != descriptor.version() {
            tracing::warn!(
                plugin_id,
                "Signature manifest is for version '{}', plugin.json declares '{}'",
                manifest.version,
                descriptor.version()
            );
            return Signature::modified();
        }

        // kind() was checked by read_verified
        let kind = manifest.kind().unwrap_or(SignatureType::Grafana);
        if kind == SignatureType::Private {
            let Some(app_url) = &self.app_url else {
                tracing::warn!(plugin_id, "Private signature but no host URL configured");
                return Signature::invalid();
            };
            if !manifest.root_urls.iter().any(|root| root_url_matches(root, app_url)) {
                tracing::warn!(
                    plugin_id,
                    "Private signature root URLs {:?} do not match {}",
                    manifest.root_urls,
                    app_url
                );
                return Signature::invalid();
            }
        }

        if let Err(reason) = verify_listed_files(dir, &manifest.files) {
            tracing::warn!(plugin_id, "Plugin has been modified: {}", reason);
            return Signature::modified();
        }

        if manifest.is_v2() {
            if let Err(reason) = verify_no_extra_files(dir, &manifest.files) {
                tracing::warn!(plugin_id, "Plugin has been modified: {}", reason);
                return Signature::modified();
            }
        }

        tracing::debug!(
            plugin_id,
            signature_type = %kind,
            org = manifest.org(),
            signed_at = ?manifest.issued_at(),
            "Plugin signature is valid"
        );
        Signature::valid(kind, manifest.org())
    }
}

/// Whether `root` (from the manifest) binds a signature to `app_url`
///
/// Scheme, host and port must be equal and the root's path segments must be
/// a prefix of the base URL's. Trailing slashes are ignored; `.` and `..`
/// are resolved by URL parsing.
pub fn root_url_matches(root: &str, app_url: &Url) -> bool {
    let Ok(root) = Url::parse(root) else {
        return false;
    };

    if root.scheme() != app_url.scheme()
        || root.host_str() != app_url.host_str()
        || root.port_or_known_default() != app_url.port_or_known_default()
    {
        return false;
    }

    let root_segments = path_segments(&root);
    let app_segments = path_segments(app_url);
    app_segments.starts_with(&root_segments)
}

fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn verify_listed_files(dir: &Path, files: &BTreeMap<String, String>) -> Result<(), String> {
    for (rel, expected) in files {
        let path = resolve_listed_path(dir, rel)
            .ok_or_else(|| format!("listed path '{}' escapes the plugin directory", rel))?;

        let matches = hash_matches(&path, expected)
            .map_err(|e| format!("could not hash '{}': {}", rel, e))?;
        if !matches {
            return Err(format!("'{}' does not match its signed hash", rel));
        }
        tracing::debug!(path = %path.display(), "File hash verified");
    }
    Ok(())
}

fn verify_no_extra_files(dir: &Path, files: &BTreeMap<String, String>) -> Result<(), String> {
    let canonical_dir = dir
        .canonicalize()
        .map_err(|e| format!("could not resolve plugin directory: {}", e))?;

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| format!("could not walk plugin directory: {}", e))?;
        let rel = relative_key(dir, entry.path())?;
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let target = entry
                .path()
                .canonicalize()
                .map_err(|e| format!("symlink '{}' cannot be resolved: {}", rel, e))?;
            if !target.starts_with(&canonical_dir) {
                return Err(format!("symlink '{}' points outside the plugin directory", rel));
            }
            if !target.is_file() {
                continue;
            }
        } else if !file_type.is_file() {
            continue;
        }

        if rel != MANIFEST_FILENAME && !files.contains_key(&rel) {
            return Err(format!("'{}' is not listed in the signature manifest", rel));
        }
    }
    Ok(())
}

/// Join a manifest-relative path onto `dir`, refusing anything but plain segments
fn resolve_listed_path(dir: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    if rel.is_empty() {
        return None;
    }

    let mut resolved = dir.to_path_buf();
    for component in rel_path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

/// Manifest key of `path`: relative to `dir`, `/`-separated
fn relative_key(dir: &Path, path: &Path) -> Result<String, String> {
    let rel = path
        .strip_prefix(dir)
        .map_err(|_| format!("{} is outside {}", path.display(), dir.display()))?;

    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Compare a file against a manifest hash (`<hex>`, `sha256:<hex>` or `blake3:<hex>`)
fn hash_matches(path: &Path, expected: &str) -> io::Result<bool> {
    let expected = expected.trim();
    let (computed, hex) = match expected.strip_prefix("blake3:") {
        Some(hex) => (compute_blake3(path)?, hex),
        None => (
            compute_sha256(path)?,
            expected.strip_prefix("sha256:").unwrap_or(expected),
        ),
    };
    Ok(computed.eq_ignore_ascii_case(hex))
}

fn compute_sha256(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    read_chunks(path, |chunk| hasher.update(chunk))?;
    Ok(hex::encode(hasher.finalize()))
}

fn compute_blake3(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    read_chunks(path, |chunk| {
        hasher.update(chunk);
    })?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn read_chunks(path: &Path, mut update: impl FnMut(&[u8])) -> io::Result<()> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            return Ok(());
        }
        update(&buffer[..bytes_read]);
    }
}
