use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use beanckup_types::Plan;

use crate::error::{BeanckupError, Result};

/// Prefix of plan-status files inside the metadata directory.
pub const STATUS_FILE_PREFIX: &str = "Delivery_Status_";

/// Status file name for a plan:
/// `Delivery_Status_<workspace>_S<NN>_<YYMMDD_HHMMSS>.json`.
pub fn status_file_name(workspace_name: &str, plan: &Plan) -> String {
    format!(
        "{STATUS_FILE_PREFIX}{workspace_name}_S{:02}_{}.json",
        plan.session_id,
        plan.timestamp.format("%y%m%d_%H%M%S")
    )
}

/// Persist a plan atomically: write a temp file in the same directory, then
/// rename over the target. On success, stale status files for the same
/// session are removed best-effort and the plan remembers where it lives.
pub fn save_plan(meta_dir: &Path, workspace_name: &str, plan: &mut Plan) -> Result<PathBuf> {
    let name = status_file_name(workspace_name, plan);
    let target = meta_dir.join(&name);

    let data = serde_json::to_string_pretty(plan)
        .map_err(|e| BeanckupError::parse(target.display().to_string(), e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(meta_dir)?;
    tmp.write_all(data.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(&target)
        .map_err(|e| BeanckupError::Io(e.error))?;

    remove_stale_status_files(meta_dir, workspace_name, plan.session_id, &name);
    plan.status_file_path = Some(target.clone());
    Ok(target)
}

/// Delete the plan's status file, marking the session finished.
pub fn remove_status_file(plan: &Plan) -> Result<()> {
    if let Some(path) = &plan.status_file_path {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

fn remove_stale_status_files(meta_dir: &Path, workspace_name: &str, session_id: u32, keep: &str) {
    let prefix = format!("{STATUS_FILE_PREFIX}{workspace_name}_S{session_id:02}_");
    let Ok(entries) = std::fs::read_dir(meta_dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with(&prefix) && name.ends_with(".json") && name != keep {
            debug!(file = %name, "removing stale plan status file");
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

/// Find the plan to resume: the most recently modified status file whose
/// plan has unfinished episodes. Completed, missing, or unparsable plans
/// yield `None`.
pub fn find_resumable_plan(meta_dir: &Path) -> Result<Option<Plan>> {
    let entries = match std::fs::read_dir(meta_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut candidates: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(STATUS_FILE_PREFIX) && n.ends_with(".json"))
        })
        .filter_map(|e| {
            let mtime = e.metadata().ok()?.modified().ok()?;
            Some((mtime, e.path()))
        })
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, path) in candidates {
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "could not read plan status file");
                continue;
            }
        };
        let mut plan: Plan = match serde_json::from_str(&data) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "could not parse plan status file");
                continue;
            }
        };
        if plan.is_completed() {
            continue;
        }
        plan.status_file_path = Some(path);
        return Ok(Some(plan));
    }

    Ok(None)
}
