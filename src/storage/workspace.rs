use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::colab::error::SessionError;

/// One entry of a workspace file tree listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

/// The file-storage collaborator for one session.
///
/// All paths handed to a `Workspace` are workspace-relative; anything that
/// resolves outside the root (absolute paths, parent-directory segments) is
/// rejected with `PathTraversal` before touching the filesystem.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn ensure_root(&self) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| SessionError::PersistenceFailure {
                path: self.root.display().to_string(),
                source,
            })
    }

    /// Resolve a workspace-relative path, rejecting traversal attempts.
    fn resolve(&self, relative: &str) -> Result<PathBuf, SessionError> {
        let rel = Path::new(relative);
        if relative.is_empty() || rel.is_absolute() {
            return Err(SessionError::PathTraversal(relative.to_string()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(SessionError::PathTraversal(relative.to_string())),
            }
        }
        Ok(self.root.join(rel))
    }

    pub async fn read(&self, relative: &str) -> Result<String, SessionError> {
        let full = self.resolve(relative)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|source| SessionError::FileUnavailable {
                path: relative.to_string(),
                source,
            })
    }

    pub async fn write(&self, relative: &str, content: &str) -> Result<(), SessionError> {
        let full = self.resolve(relative)?;
        tokio::fs::write(&full, content)
            .await
            .map_err(|source| SessionError::PersistenceFailure {
                path: relative.to_string(),
                source,
            })
    }

    pub async fn create(&self, relative: &str, is_dir: bool) -> Result<(), SessionError> {
        let full = self.resolve(relative)?;
        let result = if is_dir {
            tokio::fs::create_dir_all(&full).await
        } else {
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            tokio::fs::write(&full, "").await
        };
        result.map_err(|source| SessionError::PersistenceFailure {
            path: relative.to_string(),
            source,
        })
    }

    pub async fn remove(&self, relative: &str) -> Result<(), SessionError> {
        let full = self.resolve(relative)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|source| SessionError::FileUnavailable {
                path: relative.to_string(),
                source,
            })?;
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(&full).await
        } else {
            tokio::fs::remove_file(&full).await
        };
        result.map_err(|source| SessionError::PersistenceFailure {
            path: relative.to_string(),
            source,
        })
    }

    pub async fn rename(&self, old: &str, new: &str) -> Result<(), SessionError> {
        let old_full = self.resolve(old)?;
        let new_full = self.resolve(new)?;
        tokio::fs::rename(&old_full, &new_full)
            .await
            .map_err(|source| SessionError::PersistenceFailure {
                path: new.to_string(),
                source,
            })
    }

    /// List the workspace tree under `relative` ("" for the root).
    /// Directories sort before files, case-insensitively; dotfiles are
    /// skipped.
    pub fn tree(&self, relative: &str) -> Result<Vec<FileNode>, SessionError> {
        let base = if relative.is_empty() {
            self.root.clone()
        } else {
            self.resolve(relative)?
        };
        Ok(walk(&base, &base))
    }
}

fn walk(base: &Path, dir: &Path) -> Vec<FileNode> {
    let mut entries: Vec<(String, PathBuf, bool)> = match std::fs::read_dir(dir) {
        Ok(read) => read
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    return None;
                }
                let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
                Some((name, e.path(), is_dir))
            })
            .collect(),
        Err(_) => return Vec::new(),
    };
    entries.sort_by(|a, b| (!a.2, a.0.to_lowercase()).cmp(&(!b.2, b.0.to_lowercase())));

    entries
        .into_iter()
        .map(|(name, path, is_dir)| {
            let rel = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            FileNode {
                name,
                path: rel,
                is_dir,
                children: if is_dir { Some(walk(base, &path)) } else { None },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        (dir, ws)
    }

    #[tokio::test]
    async fn read_write_round_trip() {
        let (_dir, ws) = workspace();
        ws.write("a.txt", "hello").await.unwrap();
        assert_eq!(ws.read("a.txt").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn parent_segments_are_rejected() {
        let (_dir, ws) = workspace();
        let err = ws.read("../outside.txt").await.unwrap_err();
        assert!(matches!(err, SessionError::PathTraversal(_)));
        let err = ws.write("ok/../../escape.txt", "x").await.unwrap_err();
        assert!(matches!(err, SessionError::PathTraversal(_)));
    }

    #[tokio::test]
    async fn absolute_paths_are_rejected() {
        let (_dir, ws) = workspace();
        let err = ws.read("/etc/passwd").await.unwrap_err();
        assert!(matches!(err, SessionError::PathTraversal(_)));
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let (_dir, ws) = workspace();
        let err = ws.read("nope.txt").await.unwrap_err();
        assert!(matches!(err, SessionError::FileUnavailable { .. }));
    }

    #[tokio::test]
    async fn tree_sorts_directories_first_and_skips_dotfiles() {
        let (_dir, ws) = workspace();
        ws.create("src", true).await.unwrap();
        ws.create("src/main.rs", false).await.unwrap();
        ws.create("README.md", false).await.unwrap();
        ws.create(".hidden", false).await.unwrap();

        let tree = ws.tree("").unwrap();
        let names: Vec<&str> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["src", "README.md"]);
        assert!(tree[0].is_dir);
        let children = tree[0].children.as_ref().unwrap();
        assert_eq!(children[0].path, "src/main.rs");
    }

    #[tokio::test]
    async fn rename_and_remove() {
        let (_dir, ws) = workspace();
        ws.write("a.txt", "x").await.unwrap();
        ws.rename("a.txt", "b.txt").await.unwrap();
        assert_eq!(ws.read("b.txt").await.unwrap(), "x");
        ws.remove("b.txt").await.unwrap();
        assert!(ws.read("b.txt").await.is_err());
    }
}
