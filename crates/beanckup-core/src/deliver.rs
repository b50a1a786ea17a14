use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use beanckup_types::{EpisodeStatus, Plan};

use crate::error::{BeanckupError, Result};
use crate::manifest;
use crate::packager::{self, CreateRequest, PackageProgress};
use crate::plan as planner;
use crate::session;
use crate::workspace::{Workspace, META_DIR_NAME};

/// Per-run delivery knobs. The package-size cap is not here: it is fixed in
/// the plan at session creation and never re-asked.
#[derive(Debug, Clone)]
pub struct DeliveryParams {
    pub delivery_dir: PathBuf,
    pub total_size_limit_mb: u32,
    pub compression_level: u8,
    pub password: Option<String>,
}

/// The per-run delivery state machine. Decides episode transitions and
/// persists them; when to pause, continue, or abort stays with the caller.
pub struct DeliverySession<'a> {
    workspace: &'a Workspace,
    meta_dir: PathBuf,
    plan: Plan,
    params: DeliveryParams,
}

impl<'a> DeliverySession<'a> {
    pub fn new(workspace: &'a Workspace, plan: Plan, params: DeliveryParams) -> Result<Self> {
        let meta_dir = workspace.ensure_meta_dir()?;
        Ok(DeliverySession {
            workspace,
            meta_dir,
            plan,
            params,
        })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn params(&self) -> &DeliveryParams {
        &self.params
    }

    /// Swap in re-asked parameters before another round.
    pub fn set_params(&mut self, params: DeliveryParams) {
        self.params = params;
    }

    /// Crash recovery: an episode still InProgress means a prior run died
    /// mid-delivery. Its manifest is stale (tied to a package that never
    /// completed) and must go; so must any partial archive or volume parts
    /// of episodes that are not Completed.
    pub fn recover_interrupted(&mut self) -> Result<()> {
        let mut touched = false;

        for episode in &mut self.plan.episodes {
            if episode.status != EpisodeStatus::InProgress {
                continue;
            }
            info!(
                session = self.plan.session_id,
                episode = episode.id,
                "recovering interrupted episode"
            );
            remove_stale_manifests(&self.meta_dir, self.plan.session_id, episode.id);
            episode.status = EpisodeStatus::Pending;
            touched = true;
        }

        self.remove_residual_archives();

        if touched {
            session::save_plan(&self.meta_dir, self.workspace.name(), &mut self.plan)?;
        }
        Ok(())
    }

    /// Delete delivery-directory output belonging to episodes that did not
    /// complete. Completed episodes' archives are never touched.
    fn remove_residual_archives(&self) {
        let unfinished: Vec<u32> = self
            .plan
            .episodes
            .iter()
            .filter(|e| e.status != EpisodeStatus::Completed)
            .map(|e| e.id)
            .collect();
        if unfinished.is_empty() {
            return;
        }

        let Ok(entries) = std::fs::read_dir(&self.params.delivery_dir) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((session_id, episode_id)) = manifest::parse_package_name(name) else {
                continue;
            };
            if session_id == self.plan.session_id && unfinished.contains(&episode_id) {
                warn!(file = %name, "removing residual archive of unfinished episode");
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }

    /// Re-apply the current run's total-size cap to the plan.
    pub fn reassess(&mut self) {
        planner::apply_total_size_limit(&mut self.plan, self.params.total_size_limit_mb);
    }

    /// Write the plan's current state to its status file. Called after every
    /// reassessment so deferred episodes survive a pause or crash even when
    /// no episode ran this round.
    pub fn persist(&mut self) -> Result<()> {
        session::save_plan(&self.meta_dir, self.workspace.name(), &mut self.plan)?;
        Ok(())
    }

    pub fn pending_episode_ids(&self) -> Vec<u32> {
        self.plan
            .episodes
            .iter()
            .filter(|e| e.status == EpisodeStatus::Pending)
            .map(|e| e.id)
            .collect()
    }

    pub fn is_completed(&self) -> bool {
        self.plan.is_completed()
    }

    /// Deliver one pending episode: persist the InProgress transition,
    /// resolve references, write the manifest, drive the archiver, then
    /// persist the outcome. On failure the episode returns to Pending and
    /// the stale manifest is removed; continuing is the caller's decision.
    pub fn deliver_episode(
        &mut self,
        episode_id: u32,
        progress: &mut dyn FnMut(&PackageProgress),
    ) -> Result<String> {
        let idx = self
            .plan
            .episodes
            .iter()
            .position(|e| e.id == episode_id)
            .ok_or_else(|| {
                BeanckupError::Other(format!("no episode {episode_id} in this plan"))
            })?;

        self.plan.episodes[idx].status = EpisodeStatus::InProgress;
        if let Err(e) = session::save_plan(&self.meta_dir, self.workspace.name(), &mut self.plan) {
            self.plan.episodes[idx].status = EpisodeStatus::Pending;
            return Err(e);
        }

        let package_name = manifest::package_name(
            self.workspace.name(),
            self.plan.session_id,
            episode_id,
            Utc::now(),
        );
        let split = manifest::will_split(
            self.plan.package_size_limit_mb,
            self.plan.episodes[idx].total_size,
        );

        manifest::resolve_references(&mut self.plan.episodes[idx].files, &package_name, split);

        let files = manifest::assemble_files(&self.plan, &self.plan.episodes[idx]);
        let episode_manifest = manifest::new_manifest(
            self.workspace.name(),
            self.plan.session_id,
            episode_id,
            package_name.clone(),
            files,
            Utc::now(),
        );
        let manifest_path = match manifest::save_manifest(&episode_manifest, &self.meta_dir) {
            Ok(path) => path,
            Err(e) => {
                self.fail_episode(idx, None);
                return Err(e);
            }
        };

        let mut pack_list: Vec<String> =
            manifest::physical_files(&self.plan.episodes[idx].files, &package_name, split)
                .iter()
                .map(|n| n.path.clone())
                .collect();
        pack_list.push(format!(
            "{META_DIR_NAME}/{}",
            manifest::manifest_file_name(&package_name)
        ));

        let request = CreateRequest {
            delivery_dir: &self.params.delivery_dir,
            package_name: &package_name,
            workspace_root: self.workspace.root(),
            files: &pack_list,
            password: self.params.password.as_deref(),
            compression_level: self.params.compression_level,
            volume_size_mb: split.then_some(self.plan.package_size_limit_mb),
        };

        match packager::create_package(&request, progress) {
            Ok(_) => {
                self.plan.episodes[idx].status = EpisodeStatus::Completed;
                session::save_plan(&self.meta_dir, self.workspace.name(), &mut self.plan)?;
                info!(package = %package_name, "package delivered");
                Ok(package_name)
            }
            Err(e) => {
                self.fail_episode(idx, Some(&manifest_path));
                Err(e)
            }
        }
    }

    fn fail_episode(&mut self, idx: usize, manifest_path: Option<&std::path::Path>) {
        if let Some(path) = manifest_path {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(file = %path.display(), error = %e, "could not remove manifest of failed episode");
            }
        }
        self.plan.episodes[idx].status = EpisodeStatus::Pending;
        if let Err(e) = session::save_plan(&self.meta_dir, self.workspace.name(), &mut self.plan) {
            warn!(error = %e, "could not persist plan after episode failure");
        }
    }

    /// If every episode is delivered, remove the status file and report
    /// completion.
    pub fn finish(&mut self) -> Result<bool> {
        if !self.plan.is_completed() {
            return Ok(false);
        }
        if let Err(e) = session::remove_status_file(&self.plan) {
            warn!(error = %e, "could not remove plan status file");
        }
        Ok(true)
    }
}

/// Delete manifest files in the metadata directory that belong to one
/// session/episode pair. Used for crash recovery, where the interrupted
/// run's manifest carries an unknown timestamp.
fn remove_stale_manifests(meta_dir: &std::path::Path, session_id: u32, episode_id: u32) {
    let Ok(entries) = std::fs::read_dir(meta_dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !crate::history::is_manifest_file_name(name) {
            continue;
        }
        if manifest::parse_package_name(name) == Some((session_id, episode_id)) {
            warn!(file = %name, "removing stale manifest of interrupted episode");
            let _ = std::fs::remove_file(entry.path());
        }
    }
}
