use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::FileNode;

/// The per-package record: which files a package carries and where every
/// listed file's bytes physically live. A package and its manifest form an
/// immutable pair; manifests are never rewritten once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub workspace_name: String,
    pub session_id: u32,
    pub episode_id: u32,
    pub timestamp: DateTime<Utc>,
    /// Package file name including the archive extension.
    pub package_name: String,
    pub files: Vec<FileNode>,
}

impl Manifest {
    /// Package name with the archive extension stripped; this doubles as the
    /// manifest's own file stem.
    pub fn base_name(&self) -> &str {
        crate::node::package_base_name(&self.package_name)
    }
}
