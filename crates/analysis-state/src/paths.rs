//! Path normalization shared by every per-file map.
//!
//! Paths coming from the IDE, the project options and the analysis server
//! may be relative, contain `.`/`..` segments or Windows verbatim prefixes.
//! All of them are folded into one normalized form before they are used as
//! keys or compared against a base directory. Normalization is purely
//! lexical: the file does not have to exist.

use std::path::{Component, Path, PathBuf};

/// Normalizes `path` into an absolute path without `.`/`..` segments.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in dunce::simplified(&absolute).components() {
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

/// Key under which per-file state is stored.
///
/// Windows file systems are case-insensitive, so keys are lower-cased there.
pub fn path_key(path: &Path) -> String {
    let normalized = normalize_path(path).to_string_lossy().to_string();
    if cfg!(windows) {
        normalized.to_lowercase()
    } else {
        normalized
    }
}

/// Returns true if `path` lies inside `base_dir` (component-wise prefix test).
pub fn is_within(path: &Path, base_dir: &Path) -> bool {
    if cfg!(windows) {
        PathBuf::from(path_key(path)).starts_with(PathBuf::from(path_key(base_dir)))
    } else {
        normalize_path(path).starts_with(normalize_path(base_dir))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_resolves_dot_segments() {
        assert_eq!(
            normalize_path(Path::new("/work/project/./src/../lib/a.pas")),
            PathBuf::from("/work/project/lib/a.pas")
        );
    }

    #[test]
    fn test_normalize_makes_relative_paths_absolute() {
        let normalized = normalize_path(Path::new("src/a.pas"));
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with("src/a.pas"));
    }

    #[test]
    fn test_parent_of_root_stays_at_root() {
        assert_eq!(normalize_path(Path::new("/../a.pas")), PathBuf::from("/a.pas"));
    }

    #[test]
    fn test_path_key_is_stable_across_spellings() {
        assert_eq!(
            path_key(Path::new("/work/./project/a.pas")),
            path_key(Path::new("/work/project/src/../a.pas"))
        );
    }

    #[test]
    fn test_is_within_uses_components() {
        let base = Path::new("/work/project");
        assert!(is_within(Path::new("/work/project/proj.dproj"), base));
        assert!(is_within(Path::new("/work/project/src/../a.pas"), base));
        assert!(!is_within(Path::new("/work/project2/a.pas"), base));
        assert!(!is_within(Path::new("/work/other/a.pas"), base));
        assert!(!is_within(Path::new("/work/project/../a.pas"), base));
    }
}
