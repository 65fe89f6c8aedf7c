//! Browsable file tree derived live from a snapshot directory.

use std::path::Path;

use serde::Serialize;

use crate::error::{IndexError, Result};
use crate::snapshot::{confine, is_hidden, resolve_relative};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub title: String,
    pub key: String,
    pub is_leaf: bool,
    pub path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
}

/// Build the tree below `relative` (empty for the snapshot root).
///
/// Directories come before files, each group sorted by name. Hidden entries
/// and symlinks are skipped. Unreadable or missing directories yield no nodes.
///
/// # Errors
///
/// Returns [`IndexError::InvalidPath`] if `relative` escapes `root`, through
/// `..` or through a symlink.
pub fn build_file_tree(root: &Path, relative: &str) -> Result<Vec<FileNode>> {
    let start = if relative.is_empty() {
        root.to_path_buf()
    } else {
        match confine(root, &resolve_relative(root, relative)?, relative) {
            Ok(path) => path,
            Err(IndexError::FileNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
    };
    let prefix = relative.trim_matches('/');
    Ok(read_level(&start, prefix))
}

fn read_level(dir: &Path, prefix: &str) -> Vec<FileNode> {
    let Ok(read) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut entries: Vec<(String, bool)> = read
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_hidden(&name) {
                return None;
            }
            let file_type = entry.file_type().ok()?;
            if file_type.is_symlink() {
                return None;
            }
            Some((name, file_type.is_dir()))
        })
        .collect();
    entries.sort_by(|(a, a_dir), (b, b_dir)| b_dir.cmp(a_dir).then_with(|| a.cmp(b)));

    entries
        .into_iter()
        .map(|(name, is_dir)| {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            let children = if is_dir {
                read_level(&dir.join(&name), &path)
            } else {
                Vec::new()
            };
            FileNode {
                title: name,
                key: path.clone(),
                is_leaf: !is_dir,
                path,
                children,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("README.md"), "hi").unwrap();
        fs::write(root.join("build.rs"), "").unwrap();
        fs::write(root.join(".env"), "SECRET=1").unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/nested/lib.rs"), "").unwrap();
        fs::write(root.join(".git/config"), "").unwrap();
        dir
    }

    #[test]
    fn directories_first_then_sorted_files() {
        let dir = fixture();
        let tree = build_file_tree(dir.path(), "").unwrap();
        let titles: Vec<&str> = tree.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["empty", "src", "README.md", "build.rs"]);
    }

    #[test]
    fn nested_nodes_carry_relative_paths() {
        let dir = fixture();
        let tree = build_file_tree(dir.path(), "").unwrap();
        let src = tree.iter().find(|n| n.title == "src").unwrap();
        assert!(!src.is_leaf);
        assert_eq!(src.children[0].path, "src/nested");
        assert_eq!(src.children[0].children[0].key, "src/nested/lib.rs");
        assert_eq!(src.children[1].path, "src/main.rs");
        assert!(src.children[1].is_leaf);
    }

    #[test]
    fn expands_subdirectory_lazily() {
        let dir = fixture();
        let tree = build_file_tree(dir.path(), "src").unwrap();
        let paths: Vec<&str> = tree.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["src/nested", "src/main.rs"]);
    }

    #[test]
    fn empty_children_are_not_serialized() {
        let dir = fixture();
        let tree = build_file_tree(dir.path(), "").unwrap();
        let json = serde_json::to_value(&tree).unwrap();
        assert!(json[0].get("children").is_none());
        assert_eq!(json[0]["isLeaf"], false);
        assert!(json[1].get("children").is_some());
    }

    #[test]
    fn missing_directory_yields_empty_tree() {
        let dir = fixture();
        assert!(build_file_tree(dir.path(), "nope").unwrap().is_empty());
    }

    #[test]
    fn traversal_rejected() {
        let dir = fixture();
        let err = build_file_tree(dir.path(), "../etc").unwrap_err();
        assert!(matches!(err, IndexError::InvalidPath(_)));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_listed_or_followed() {
        let dir = fixture();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "TOP-SECRET").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("dirlink")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            dir.path().join("src/link.txt"),
        )
        .unwrap();

        let tree = build_file_tree(dir.path(), "").unwrap();
        assert!(tree.iter().all(|n| n.title != "dirlink"));
        let src = tree.iter().find(|n| n.title == "src").unwrap();
        assert!(src.children.iter().all(|n| n.title != "link.txt"));

        let err = build_file_tree(dir.path(), "dirlink").unwrap_err();
        assert!(matches!(err, IndexError::InvalidPath(_)));
    }
}
