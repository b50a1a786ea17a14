use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::warn;

use beanckup_types::node::{package_base_name, split_reference};
use beanckup_types::{FileNode, Manifest};

use crate::error::{BeanckupError, Result};
use crate::manifest;
use crate::platform;
use crate::workspace::META_DIR_NAME;

fn package_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.7z(\.001)?$").expect("static regex"))
}

/// Progress signal: one source package is about to be unpacked.
#[derive(Debug)]
pub struct RestoreProgress<'a> {
    pub package: &'a str,
    pub files: usize,
}

/// The manifests backing one restoration: the chosen session's own
/// manifests plus every manifest up to and including that session.
#[derive(Debug)]
pub struct RestoreSession {
    pub session_id: u32,
    pub workspace_name: String,
    pub timestamp: DateTime<Utc>,
    pub target_manifests: Vec<Manifest>,
    pub historical_manifests: Vec<Manifest>,
}

/// Indexes the delivery directory: which sessions exist and where each
/// package's entry point lives (the `.7z`, or the `.001` volume of a split
/// archive).
pub struct Restorer {
    packages: HashMap<String, PathBuf>,
    sessions: Vec<u32>,
}

impl Restorer {
    /// Walk the delivery directory and index every package file.
    pub fn discover(delivery_dir: &Path) -> Result<Restorer> {
        if !delivery_dir.is_dir() {
            return Err(BeanckupError::Other(format!(
                "delivery directory does not exist: {}",
                delivery_dir.display()
            )));
        }

        let mut packages = HashMap::new();
        let mut session_set = BTreeMap::new();

        let mut walker = ignore::WalkBuilder::new(delivery_dir);
        walker.standard_filters(false).follow_links(false);
        for entry in walker.build() {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !package_file_re().is_match(&name) {
                continue;
            }
            let Some((session_id, _)) = manifest::parse_package_name(&name) else {
                continue;
            };
            if session_id == 0 {
                continue;
            }
            session_set.insert(session_id, ());
            packages.insert(package_base_name(&name).to_string(), entry.into_path());
        }

        Ok(Restorer {
            packages,
            sessions: session_set.into_keys().collect(),
        })
    }

    /// Discovered session ids, ascending.
    pub fn sessions(&self) -> &[u32] {
        &self.sessions
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Pre-extract and parse the manifest of every package at or before the
    /// chosen session. A package whose manifest cannot be read (typically a
    /// wrong password) is skipped with a warning; zero loaded target
    /// manifests fails the restore.
    pub fn load_session(&self, session_id: u32, password: Option<&str>) -> Result<RestoreSession> {
        let scratch = tempfile::tempdir()?;
        let mut target: Vec<Manifest> = Vec::new();
        let mut historical: Vec<Manifest> = Vec::new();

        for (base, entry_path) in &self.packages {
            let m = match self.extract_manifest(base, entry_path, scratch.path(), password) {
                Ok(m) => m,
                Err(e) => {
                    warn!(package = %base, error = %e, "could not extract manifest, skipping package");
                    continue;
                }
            };
            if m.session_id == 0 || m.session_id > session_id {
                continue;
            }
            if m.session_id == session_id {
                target.push(m.clone());
            }
            historical.push(m);
        }

        if target.is_empty() {
            return Err(BeanckupError::Integrity(format!(
                "no manifest could be loaded for session S{session_id} (wrong password, or packages missing)"
            )));
        }

        target.sort_by_key(|m| m.episode_id);
        let timestamp = target
            .iter()
            .map(|m| m.timestamp)
            .min()
            .unwrap_or_else(Utc::now);
        let workspace_name = target[0].workspace_name.clone();

        Ok(RestoreSession {
            session_id,
            workspace_name,
            timestamp,
            target_manifests: target,
            historical_manifests: historical,
        })
    }

    fn extract_manifest(
        &self,
        base: &str,
        entry_path: &Path,
        scratch: &Path,
        password: Option<&str>,
    ) -> Result<Manifest> {
        let member = format!("{META_DIR_NAME}/{base}.json");
        let extract_result =
            crate::packager::extract_member(entry_path, &member, scratch, password);

        let extracted = scratch.join(META_DIR_NAME).join(format!("{base}.json"));
        if !extracted.is_file() {
            // Some archiver builds exit non-zero on benign conditions; only
            // trust the error when the file really is absent.
            extract_result?;
            return Err(BeanckupError::Integrity(format!(
                "manifest member '{member}' missing from package"
            )));
        }

        manifest::load_manifest(&extracted)
    }

    /// Materialize the chosen session under
    /// `<dest>/<workspace>_S<n>_<YYMMDD_HHMMSS>_Recovery/`.
    ///
    /// Historical manifests are regenerated into the restored `.beanckup/`
    /// so the recovered tree carries its own history. Files are grouped by
    /// the source package their reference names, extracted per package into
    /// a staging area, then moved into place with their recorded timestamps.
    /// Missing packages or members are warnings; the restore continues.
    pub fn restore(
        &self,
        restore_session: &RestoreSession,
        dest: &Path,
        password: Option<&str>,
        progress: &mut dyn FnMut(&RestoreProgress<'_>),
    ) -> Result<PathBuf> {
        let root = dest.join(format!(
            "{}_S{}_{}_Recovery",
            restore_session.workspace_name,
            restore_session.session_id,
            restore_session.timestamp.format("%y%m%d_%H%M%S")
        ));
        std::fs::create_dir_all(&root)?;

        let meta_dir = root.join(META_DIR_NAME);
        std::fs::create_dir_all(&meta_dir)?;
        if let Err(e) = platform::fs::set_hidden(&meta_dir) {
            warn!(dir = %meta_dir.display(), error = %e, "could not mark restored metadata directory hidden");
        }
        for m in &restore_session.historical_manifests {
            if let Err(e) = manifest::save_manifest(m, &meta_dir) {
                warn!(manifest = %m.package_name, error = %e, "could not regenerate historical manifest");
            }
        }

        // Union of the target manifests' files, keyed by path; the latest
        // record of a duplicated path wins.
        let mut final_set: BTreeMap<String, FileNode> = BTreeMap::new();
        for m in &restore_session.target_manifests {
            for node in &m.files {
                final_set.insert(node.node_path().to_string(), node.clone());
            }
        }

        // Directories first, timestamps after the files have landed.
        let directories: Vec<&FileNode> =
            final_set.values().filter(|n| n.is_dir()).collect();
        for node in &directories {
            std::fs::create_dir_all(root.join(&node.dir))?;
        }

        let groups = group_by_source_package(final_set.values());

        let staging = tempfile::Builder::new()
            .prefix(".beanckup-restore-")
            .tempdir_in(&root)?;

        for (package_base, nodes) in &groups {
            let Some(entry_path) = self.packages.get(package_base) else {
                warn!(
                    package = %package_base,
                    files = nodes.len(),
                    "source package not found, skipping its files"
                );
                continue;
            };

            progress(&RestoreProgress {
                package: package_base,
                files: nodes.len(),
            });

            // Deduplicated content means several paths can share one
            // in-archive member; track how many takers each member has so
            // only the last one consumes the staged copy.
            let mut member_users: HashMap<&str, usize> = HashMap::new();
            for node in nodes {
                if let Some((_, inner)) = split_reference(&node.reference) {
                    *member_users.entry(inner).or_default() += 1;
                }
            }

            let members: Vec<String> = member_users.keys().map(|m| m.to_string()).collect();
            if let Err(e) =
                crate::packager::extract_files(entry_path, &members, staging.path(), password)
            {
                warn!(package = %package_base, error = %e, "extraction failed, skipping package");
                continue;
            }

            for node in nodes {
                let Some((_, inner)) = split_reference(&node.reference) else {
                    continue;
                };
                let staged = staging.path().join(inner);
                if !staged.is_file() {
                    warn!(path = %node.path, member = inner, "extracted file missing, skipping");
                    continue;
                }
                let remaining = member_users.entry(inner).or_insert(1);
                *remaining -= 1;
                let target = root.join(&node.path);
                let placed = if *remaining == 0 {
                    move_file(&staged, &target)
                } else {
                    copy_file(&staged, &target)
                };
                if let Err(e) = placed {
                    warn!(path = %node.path, error = %e, "could not place restored file");
                    continue;
                }
                if let Err(e) =
                    platform::fs::set_entry_times(&target, node.create_time, node.mod_time)
                {
                    warn!(path = %node.path, error = %e, "could not restore timestamps");
                }
            }
        }

        for node in &directories {
            let path = root.join(&node.dir);
            if let Err(e) = platform::fs::set_entry_times(&path, node.create_time, node.mod_time)
            {
                warn!(path = %node.dir, error = %e, "could not restore directory timestamps");
            }
        }

        Ok(root)
    }
}

/// Group restorable files by the package their reference points into,
/// reduced to the base name the discovery index uses. Malformed references
/// are reported and dropped.
pub(crate) fn group_by_source_package<'a>(
    nodes: impl Iterator<Item = &'a FileNode>,
) -> BTreeMap<String, Vec<&'a FileNode>> {
    let mut groups: BTreeMap<String, Vec<&'a FileNode>> = BTreeMap::new();
    for node in nodes {
        if node.is_dir() {
            continue;
        }
        let Some((package, _)) = split_reference(&node.reference) else {
            warn!(path = %node.path, reference = %node.reference, "malformed reference, skipping file");
            continue;
        };
        groups
            .entry(package_base_name(package).to_string())
            .or_default()
            .push(node);
    }
    groups
}

/// Rename where possible, copy-and-delete across filesystems.
fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dst)?;
    std::fs::remove_file(src)
}

/// Copy, leaving the staged source for further takers of the same member.
fn copy_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dst).map(|_| ())
}
