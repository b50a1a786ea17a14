use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use beanckup_types::{FileNode, Manifest};

use crate::error::Result;
use crate::session::STATUS_FILE_PREFIX;

/// Prefix of per-workspace configuration files inside the metadata
/// directory; they are not manifests.
pub const CONFIG_FILE_PREFIX: &str = "config";

/// Aggregate of every manifest a workspace has ever emitted, rebuilt before
/// each scan and discarded on exit. Read-only once built.
#[derive(Debug, Default)]
pub struct HistoricalState {
    /// Content hash → the node that first stored it. Earliest wins, so the
    /// original reference survives moves and duplicates.
    hash_to_node: HashMap<String, FileNode>,
    /// Workspace path → the most recent record of that path. Latest wins,
    /// so the freshest metadata drives the change pre-filter.
    path_to_node: HashMap<String, FileNode>,
    max_session_id: u32,
}

impl HistoricalState {
    pub fn new() -> Self {
        HistoricalState::default()
    }

    /// Fold one manifest into the aggregate. Manifests must arrive in
    /// chronological order for the earliest/latest-wins rules to hold.
    pub fn record_manifest(&mut self, manifest: &Manifest) {
        self.max_session_id = self.max_session_id.max(manifest.session_id);

        for node in &manifest.files {
            if node.is_dir() {
                continue;
            }
            self.path_to_node
                .insert(node.path.clone(), node.clone());
            if !node.hash.is_empty() && !self.hash_to_node.contains_key(&node.hash) {
                self.hash_to_node.insert(node.hash.clone(), node.clone());
            }
        }
    }

    pub fn by_hash(&self, hash: &str) -> Option<&FileNode> {
        self.hash_to_node.get(hash)
    }

    pub fn by_path(&self, path: &str) -> Option<&FileNode> {
        self.path_to_node.get(path)
    }

    pub fn known_paths(&self) -> impl Iterator<Item = &FileNode> {
        self.path_to_node.values()
    }

    pub fn max_session_id(&self) -> u32 {
        self.max_session_id
    }

    /// True when the workspace has no delivery history at all.
    pub fn is_empty(&self) -> bool {
        self.max_session_id == 0 && self.path_to_node.is_empty()
    }
}

/// Load every manifest under the metadata directory into a
/// [`HistoricalState`]. A missing directory yields an empty state; a
/// malformed manifest is skipped with a warning.
pub fn load_historical_state(meta_dir: &Path) -> Result<HistoricalState> {
    let mut state = HistoricalState::new();

    let entries = match std::fs::read_dir(meta_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(state),
        Err(e) => return Err(e.into()),
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_manifest_file_name(name))
        .collect();
    // Filenames embed timestamps; lexicographic order is chronological order.
    names.sort();

    for name in names {
        let path = meta_dir.join(&name);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "could not read manifest, skipping");
                continue;
            }
        };
        match serde_json::from_str::<Manifest>(&data) {
            Ok(manifest) => state.record_manifest(&manifest),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "could not parse manifest, skipping");
            }
        }
    }

    Ok(state)
}

/// Manifest files are the `.json` entries that are neither plan-status
/// files nor configuration files.
pub fn is_manifest_file_name(name: &str) -> bool {
    name.ends_with(".json")
        && !name.starts_with(STATUS_FILE_PREFIX)
        && !name.starts_with(CONFIG_FILE_PREFIX)
}
