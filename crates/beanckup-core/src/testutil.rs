use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};

use beanckup_types::{FileNode, Manifest};

pub fn utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

/// Write a file under `root`, creating parent directories as needed.
pub fn write_file(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parents");
    }
    std::fs::write(path, contents).expect("write file");
}

/// A file node as it would appear in a historical manifest: hashed and
/// physically placed.
pub fn stored_node(path: &str, size: u64, hash: &str, reference: &str) -> FileNode {
    FileNode {
        path: path.to_string(),
        size,
        mod_time: Some(utc(1_700_000_000)),
        create_time: Some(utc(1_700_000_000)),
        hash: hash.to_string(),
        reference: reference.to_string(),
        ..FileNode::default()
    }
}

pub fn manifest_with(
    session_id: u32,
    episode_id: u32,
    package_name: &str,
    files: Vec<FileNode>,
) -> Manifest {
    Manifest {
        workspace_name: "ws".to_string(),
        session_id,
        episode_id,
        timestamp: utc(1_700_000_000 + i64::from(session_id) * 86_400),
        package_name: package_name.to_string(),
        files,
    }
}
