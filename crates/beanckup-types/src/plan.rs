use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::FileNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeStatus {
    Pending,
    InProgress,
    Completed,
    /// Deferred by the current run's total-size cap; flips back to Pending
    /// when a later run reassesses with a larger cap.
    ExceededLimit,
}

/// One package's worth of new content within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: u32,
    pub total_size: u64,
    pub files: Vec<FileNode>,
    pub status: EpisodeStatus,
}

/// One session's delivery schedule, persisted between runs until every
/// episode completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub session_id: u32,
    pub timestamp: DateTime<Utc>,
    pub total_new_size: u64,
    /// Fixed at session creation; reloaded from the plan on resume.
    #[serde(default)]
    pub package_size_limit_mb: u32,
    pub episodes: Vec<Episode>,
    /// Full scan result backing this plan. Not persisted; empty on resume.
    #[serde(skip)]
    pub all_nodes: Vec<FileNode>,
    /// Where this plan was last saved. Not persisted.
    #[serde(skip)]
    pub status_file_path: Option<PathBuf>,
}

impl Plan {
    pub fn is_completed(&self) -> bool {
        if self.episodes.is_empty() {
            // A plan that never produced episodes is complete unless the
            // scan it came from still holds unplaced files.
            return !self.all_nodes.iter().any(FileNode::is_new);
        }
        self.episodes
            .iter()
            .all(|e| e.status == EpisodeStatus::Completed)
    }

    /// Episodes not yet delivered, regardless of why.
    pub fn count_unfinished(&self) -> usize {
        self.episodes
            .iter()
            .filter(|e| e.status != EpisodeStatus::Completed)
            .count()
    }

    /// Episodes scheduled for the current run.
    pub fn count_pending(&self) -> usize {
        self.episodes
            .iter()
            .filter(|e| matches!(e.status, EpisodeStatus::Pending | EpisodeStatus::InProgress))
            .count()
    }

    pub fn completed_size(&self) -> u64 {
        self.episodes
            .iter()
            .filter(|e| e.status == EpisodeStatus::Completed)
            .map(|e| e.total_size)
            .sum()
    }
}
