use std::collections::HashMap;

use chrono::{DateTime, Utc};

use beanckup_types::{Episode, EpisodeStatus, FileNode, Plan};

use crate::manifest::mb_to_bytes;

/// Build a session's delivery schedule from a scan result.
///
/// New files are partitioned into size-bounded episodes in path order, which
/// keeps episode assignment deterministic across reruns. Only the first path
/// per content hash is stored physically; later paths with the same hash
/// ride along in the same episode as manifest-only duplicates and resolve to
/// the original's reference at delivery time. A file larger than the cap
/// gets an episode of its own and is later split into volumes by the
/// packager. A session with no new files but with reference files still gets
/// one empty episode: its package carries the manifest that records the
/// moves and renames.
pub fn create_plan(
    session_id: u32,
    all_nodes: Vec<FileNode>,
    package_size_limit_mb: u32,
    now: DateTime<Utc>,
) -> Plan {
    let mut new_files: Vec<FileNode> = all_nodes
        .iter()
        .filter(|n| n.is_new())
        .cloned()
        .collect();
    new_files.sort_by(|a, b| a.path.cmp(&b.path));

    let mut storable: Vec<FileNode> = Vec::new();
    let mut duplicates: Vec<FileNode> = Vec::new();
    let mut seen_hashes: HashMap<String, ()> = HashMap::new();
    for file in new_files {
        // Unhashable files are always stored; there is nothing to match on.
        if !file.hash.is_empty() && seen_hashes.insert(file.hash.clone(), ()).is_some() {
            duplicates.push(file);
        } else {
            storable.push(file);
        }
    }

    let total_new_size: u64 = storable.iter().map(|n| n.size).sum();
    let has_references = all_nodes.iter().any(|n| n.is_reference());

    let mut episodes = if storable.is_empty() {
        if has_references {
            vec![Episode {
                id: 1,
                total_size: 0,
                files: Vec::new(),
                status: EpisodeStatus::Pending,
            }]
        } else {
            Vec::new()
        }
    } else if package_size_limit_mb == 0 {
        vec![Episode {
            id: 1,
            total_size: total_new_size,
            files: storable,
            status: EpisodeStatus::Pending,
        }]
    } else {
        pack_episodes(storable, mb_to_bytes(package_size_limit_mb))
    };

    attach_duplicates(&mut episodes, duplicates);

    Plan {
        session_id,
        timestamp: now,
        total_new_size,
        package_size_limit_mb,
        episodes,
        all_nodes,
        status_file_path: None,
    }
}

/// Place each session duplicate in the episode that stores its original, so
/// one manifest records both. Sizes are untouched: duplicates cost nothing
/// in the archive.
fn attach_duplicates(episodes: &mut [Episode], duplicates: Vec<FileNode>) {
    if duplicates.is_empty() {
        return;
    }

    let mut episode_by_hash: HashMap<String, usize> = HashMap::new();
    for (idx, episode) in episodes.iter().enumerate() {
        for file in &episode.files {
            if !file.hash.is_empty() {
                episode_by_hash.entry(file.hash.clone()).or_insert(idx);
            }
        }
    }

    let mut touched = Vec::new();
    for dup in duplicates {
        // Every duplicate's hash was first seen on a storable file, so the
        // lookup cannot miss.
        let idx = episode_by_hash.get(&dup.hash).copied().unwrap_or(0);
        episodes[idx].files.push(dup);
        touched.push(idx);
    }
    for idx in touched {
        episodes[idx].files.sort_by(|a, b| a.path.cmp(&b.path));
    }
}

fn pack_episodes(files: Vec<FileNode>, cap_bytes: u64) -> Vec<Episode> {
    let mut episodes: Vec<Episode> = Vec::new();
    let mut current: Vec<FileNode> = Vec::new();
    let mut current_size: u64 = 0;

    let mut flush = |files: &mut Vec<FileNode>, size: &mut u64, episodes: &mut Vec<Episode>| {
        if files.is_empty() {
            return;
        }
        episodes.push(Episode {
            id: episodes.len() as u32 + 1,
            total_size: *size,
            files: std::mem::take(files),
            status: EpisodeStatus::Pending,
        });
        *size = 0;
    };

    for file in files {
        if file.size > cap_bytes {
            // Oversize file: its own episode, delivered as a multi-volume
            // archive.
            flush(&mut current, &mut current_size, &mut episodes);
            let size = file.size;
            current.push(file);
            current_size = size;
            flush(&mut current, &mut current_size, &mut episodes);
        } else if current_size + file.size > cap_bytes && !current.is_empty() {
            flush(&mut current, &mut current_size, &mut episodes);
            current_size = file.size;
            current.push(file);
        } else {
            current_size += file.size;
            current.push(file);
        }
    }
    flush(&mut current, &mut current_size, &mut episodes);

    episodes
}

/// Reassess which episodes this run may deliver under the total-size cap.
///
/// Completed episodes are frozen; their sizes seed the running total. Every
/// other episode flips to Pending while it fits and ExceededLimit once the
/// cap is crossed. Idempotent, so it re-runs safely on resume.
pub fn apply_total_size_limit(plan: &mut Plan, total_size_limit_mb: u32) {
    if total_size_limit_mb == 0 {
        for episode in &mut plan.episodes {
            if episode.status != EpisodeStatus::Completed {
                episode.status = EpisodeStatus::Pending;
            }
        }
        return;
    }

    let cap_bytes = mb_to_bytes(total_size_limit_mb);
    let mut running = plan.completed_size();
    for episode in &mut plan.episodes {
        if episode.status == EpisodeStatus::Completed {
            continue;
        }
        if running + episode.total_size <= cap_bytes {
            episode.status = EpisodeStatus::Pending;
            running += episode.total_size;
        } else {
            episode.status = EpisodeStatus::ExceededLimit;
        }
    }
}
