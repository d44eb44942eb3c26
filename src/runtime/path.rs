//! Path utility functions for normalization and expansion.

use std::path::{Component, Path, PathBuf};

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// Expand a leading `~`, anchor relative paths at `cwd` and normalize.
///
/// `~user` forms are not expanded and are treated as relative names.
pub fn expand_path(raw: &str, home: Option<&Path>, cwd: &Path) -> PathBuf {
    let expanded = match (raw, home) {
        ("~", Some(home)) => home.to_path_buf(),
        (raw, Some(home)) if raw.starts_with("~/") => home.join(&raw[2..]),
        (raw, _) => PathBuf::from(raw),
    };
    if expanded.is_absolute() {
        normalize_path(&expanded)
    } else {
        normalize_path(&cwd.join(expanded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_simple() {
        let path = Path::new("/usr/local/bin");
        assert_eq!(normalize_path(path), PathBuf::from("/usr/local/bin"));
    }

    #[test]
    fn test_normalize_path_with_dot() {
        let path = Path::new("/opt/./zapper/./packages");
        assert_eq!(normalize_path(path), PathBuf::from("/opt/zapper/packages"));
    }

    #[test]
    fn test_normalize_path_with_parent_dir() {
        let path = Path::new("/opt/zapper/../local/bin");
        assert_eq!(normalize_path(path), PathBuf::from("/opt/local/bin"));
    }

    #[test]
    fn test_normalize_path_parent_at_root() {
        // On Unix, /.. stays as / because RootDir can't be popped
        let path = Path::new("/../a");
        let result = normalize_path(path);
        assert!(result.ends_with("a"));
    }

    #[test]
    fn test_normalize_path_relative() {
        let path = Path::new("a/./b/../c");
        assert_eq!(normalize_path(path), PathBuf::from("a/c"));
    }

    #[test]
    fn test_normalize_path_trailing_slash_and_duplicates() {
        let path = Path::new("/opt//zapper/bin/");
        assert_eq!(normalize_path(path), PathBuf::from("/opt/zapper/bin"));
    }

    #[test]
    fn test_expand_path_home() {
        let home = Path::new("/home/alice");
        let cwd = Path::new("/work");
        assert_eq!(expand_path("~", Some(home), cwd), PathBuf::from("/home/alice"));
        assert_eq!(
            expand_path("~/.zapper/packages", Some(home), cwd),
            PathBuf::from("/home/alice/.zapper/packages")
        );
        // no home: `~` is just a relative name
        assert_eq!(expand_path("~/x", None, cwd), PathBuf::from("/work/~/x"));
        assert_eq!(expand_path("~bob/x", Some(home), cwd), PathBuf::from("/work/~bob/x"));
    }

    #[test]
    fn test_expand_path_relative_and_absolute() {
        let cwd = Path::new("/work/project");
        assert_eq!(expand_path("pkgs", None, cwd), PathBuf::from("/work/project/pkgs"));
        assert_eq!(expand_path("../pkgs/./x", None, cwd), PathBuf::from("/work/pkgs/x"));
        assert_eq!(expand_path("/opt/a/../b", None, cwd), PathBuf::from("/opt/b"));
    }
}
