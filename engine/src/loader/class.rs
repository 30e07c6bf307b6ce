//! Class assignment from configured roots

use sdk::signature::Class;
use std::path::{Component, Path, PathBuf};

/// Configured plugin roots, lexically normalized
///
/// Classification is a pure function of the plugin directory and these
/// roots. Precedence is `Core > Bundled > External`, so a core root nested
/// under the bundled root still classifies its plugins as core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginRoots {
    core: Option<PathBuf>,
    bundled: Option<PathBuf>,
    external: Vec<PathBuf>,
}

impl PluginRoots {
    pub fn new(core: Option<PathBuf>, bundled: Option<PathBuf>, external: Vec<PathBuf>) -> Self {
        Self {
            core: core.as_deref().map(normalize),
            bundled: bundled.as_deref().map(normalize),
            external: external.iter().map(|p| normalize(p)).collect(),
        }
    }

    pub fn core(&self) -> Option<&Path> {
        self.core.as_deref()
    }

    pub fn bundled(&self) -> Option<&Path> {
        self.bundled.as_deref()
    }

    pub fn external(&self) -> &[PathBuf] {
        &self.external
    }

    /// Class of the plugin installed in `dir`
    pub fn classify(&self, dir: &Path) -> Class {
        let dir = normalize(dir);

        if self.core.as_deref().is_some_and(|root| dir.starts_with(root)) {
            Class::Core
        } else if self.bundled.as_deref().is_some_and(|root| dir.starts_with(root)) {
            Class::Bundled
        } else if self.external.iter().any(|root| dir.starts_with(root)) {
            Class::External
        } else {
            Class::Unknown
        }
    }
}

/// Absolute path with `.` and `..` resolved lexically
///
/// Symlinks are not resolved, so a plugin reached through a symlink keeps the
/// class of the root it was found under.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
