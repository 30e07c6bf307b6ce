//! Parent/child linking of nested plugins

use std::collections::HashMap;
use std::path::PathBuf;

/// For each plugin directory, the index of its parent plugin directory
///
/// The parent is the nearest strict ancestor that is itself a plugin
/// directory. Parents are always shallower than their children, so the
/// result has no cycles.
pub fn link_parents(dirs: &[PathBuf]) -> Vec<Option<usize>> {
    let index: HashMap<&std::path::Path, usize> = dirs
        .iter()
        .enumerate()
        .map(|(i, dir)| (dir.as_path(), i))
        .collect();

    dirs.iter()
        .map(|dir| {
            dir.ancestors()
                .skip(1)
                .find_map(|ancestor| index.get(ancestor).copied())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_ancestor_is_parent() {
        let dirs = vec![
            PathBuf::from("/p/app"),
            PathBuf::from("/p/app/datasources/ds"),
            PathBuf::from("/p/app/datasources/ds/panels/inner"),
            PathBuf::from("/p/other"),
            PathBuf::from("/p/app-two"),
        ];

        assert_eq!(
            link_parents(&dirs),
            vec![None, Some(0), Some(1), None, None]
        );
    }

    #[test]
    fn test_no_self_parent() {
        let dirs = vec![PathBuf::from("/p/app")];
        assert_eq!(link_parents(&dirs), vec![None]);
    }
}
