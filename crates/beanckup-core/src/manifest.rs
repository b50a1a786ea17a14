use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use beanckup_types::{Episode, FileNode, Manifest, Plan};

use crate::error::{BeanckupError, Result};
use crate::workspace::META_DIR_NAME;

pub const ARCHIVE_EXT: &str = ".7z";
/// Suffix of the first volume of a split archive; references to split
/// packages carry it so the restorer can find the entry point.
pub const FIRST_VOLUME_SUFFIX: &str = ".001";

fn package_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"S(\d+)[_-]?E(\d+)").expect("static regex"))
}

/// Compose a package file name: `<workspace>-S<NN>E<NN>-<YYMMDD_HHMMSS>.7z`.
pub fn package_name(
    workspace_name: &str,
    session_id: u32,
    episode_id: u32,
    when: DateTime<Utc>,
) -> String {
    format!(
        "{workspace_name}-S{session_id:02}E{episode_id:02}-{}{ARCHIVE_EXT}",
        when.format("%y%m%d_%H%M%S")
    )
}

/// Extract `(session_id, episode_id)` from a package or manifest file name.
pub fn parse_package_name(name: &str) -> Option<(u32, u32)> {
    let caps = package_name_re().captures(name)?;
    let session = caps[1].parse().ok()?;
    let episode = caps[2].parse().ok()?;
    Some((session, episode))
}

/// Manifest file name for a package: the base name with a `.json` extension.
pub fn manifest_file_name(package_name: &str) -> String {
    format!("{}.json", beanckup_types::node::package_base_name(package_name))
}

/// Path of the manifest inside its archive, always forward-slashed.
pub fn manifest_path_in_package(package_name: &str) -> String {
    format!("{META_DIR_NAME}/{}", manifest_file_name(package_name))
}

/// Whether packaging this episode will produce a multi-volume archive.
pub fn will_split(package_size_limit_mb: u32, episode_total_size: u64) -> bool {
    package_size_limit_mb > 0 && episode_total_size > mb_to_bytes(package_size_limit_mb)
}

pub fn mb_to_bytes(mb: u32) -> u64 {
    u64::from(mb) * 1024 * 1024
}

/// The package identifier references use: the package name, with the first
/// volume's suffix appended when the archive will be split.
pub fn reference_package(package_name: &str, split: bool) -> String {
    if split {
        format!("{package_name}{FIRST_VOLUME_SUFFIX}")
    } else {
        package_name.to_string()
    }
}

/// Finalize references on an episode's new files just before the manifest is
/// written. The first node per content hash points into its own package;
/// session duplicates of that content inherit the same reference, so their
/// bytes are stored exactly once. Files are visited in list order, which is
/// path order, so the original (smallest path) always resolves first.
/// Pre-existing references are left untouched.
pub fn resolve_references(files: &mut [FileNode], package_name: &str, split: bool) {
    let ref_package = reference_package(package_name, split);
    let mut assigned: std::collections::HashMap<String, String> = std::collections::HashMap::new();

    for node in files.iter_mut() {
        if !node.is_new() {
            continue;
        }
        if !node.hash.is_empty() {
            if let Some(existing) = assigned.get(&node.hash) {
                node.reference = existing.clone();
                continue;
            }
        }
        let reference = format!("{ref_package}/{}", node.path);
        if !node.hash.is_empty() {
            assigned.insert(node.hash.clone(), reference.clone());
        }
        node.reference = reference;
    }
}

/// The subset of an episode's files whose bytes this package physically
/// stores: exactly those whose resolved reference names this package and
/// their own path. Session duplicates and carried reference files fall out.
pub fn physical_files<'a>(
    files: &'a [FileNode],
    package_name: &str,
    split: bool,
) -> Vec<&'a FileNode> {
    let ref_package = reference_package(package_name, split);
    files
        .iter()
        .filter(|n| !n.is_dir() && n.reference == format!("{ref_package}/{}", n.path))
        .collect()
}

/// The `files` list of an episode's manifest. Episode 1 additionally carries
/// every reference-classified node of the session, so the first package
/// records the complete reference graph for content that was not newly
/// placed this session.
pub fn assemble_files(plan: &Plan, episode: &Episode) -> Vec<FileNode> {
    let mut files = episode.files.clone();
    if episode.id == 1 {
        files.extend(
            plan.all_nodes
                .iter()
                .filter(|n| n.is_reference())
                .cloned(),
        );
    }
    files
}

pub fn new_manifest(
    workspace_name: &str,
    session_id: u32,
    episode_id: u32,
    package_name: String,
    files: Vec<FileNode>,
    timestamp: DateTime<Utc>,
) -> Manifest {
    Manifest {
        workspace_name: workspace_name.to_string(),
        session_id,
        episode_id,
        timestamp,
        package_name,
        files,
    }
}

/// Serialize a manifest into `dir` under its package-derived file name.
pub fn save_manifest(manifest: &Manifest, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(manifest_file_name(&manifest.package_name));
    let data = serde_json::to_string_pretty(manifest)
        .map_err(|e| BeanckupError::parse(path.display().to_string(), e))?;
    std::fs::write(&path, data)?;
    Ok(path)
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|e| BeanckupError::parse(path.display().to_string(), e))
}
