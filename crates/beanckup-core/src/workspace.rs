use std::path::{Component, Path, PathBuf};

use crate::error::Result;
use crate::platform;

/// Name of the hidden metadata directory inside every workspace.
pub const META_DIR_NAME: &str = ".beanckup";

/// A user-chosen source tree plus the derived paths the engine works with.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    name: String,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = workspace_name(&root);
        Workspace { root, name }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR_NAME)
    }

    /// Create the metadata directory if needed and mark it hidden where the
    /// platform supports the attribute.
    pub fn ensure_meta_dir(&self) -> Result<PathBuf> {
        let dir = self.meta_dir();
        std::fs::create_dir_all(&dir)?;
        if let Err(e) = platform::fs::set_hidden(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "could not mark metadata directory hidden");
        }
        Ok(dir)
    }

    /// Whether the workspace sits at a filesystem root (`/`, `C:\`), which
    /// widens the indexer's deny-list to OS junk entries.
    pub fn is_filesystem_root(&self) -> bool {
        self.root.parent().is_none()
    }
}

/// Derive a usable workspace name from its path. Filesystem roots have no
/// final component; fall back to the drive letter or a fixed name.
fn workspace_name(root: &Path) -> String {
    if let Some(name) = root.file_name() {
        return name.to_string_lossy().into_owned();
    }
    for component in root.components() {
        if let Component::Prefix(prefix) = component {
            let vol = prefix.as_os_str().to_string_lossy();
            return vol.trim_end_matches(':').to_string();
        }
    }
    "root".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_final_component() {
        let ws = Workspace::new("/data/projects/photos");
        assert_eq!(ws.name(), "photos");
        assert!(!ws.is_filesystem_root());
    }

    #[test]
    fn unix_root_falls_back() {
        let ws = Workspace::new("/");
        assert_eq!(ws.name(), "root");
        assert!(ws.is_filesystem_root());
    }

    #[test]
    fn meta_dir_is_nested_and_hidden_by_name() {
        let ws = Workspace::new("/data/ws");
        assert_eq!(ws.meta_dir(), PathBuf::from("/data/ws/.beanckup"));
    }
}
