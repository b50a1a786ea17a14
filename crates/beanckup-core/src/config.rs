use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BeanckupError, Result};

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Per-workspace settings persisted in the metadata directory. These seed
/// the interactive prompts on later runs; every field can be overridden at
/// the prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub delivery_path: String,
    #[serde(default)]
    pub restore_path: String,
    #[serde(default)]
    pub package_size_limit_mb: u32,
    /// 0 means unlimited.
    #[serde(default)]
    pub total_size_limit_mb: u32,
    #[serde(default)]
    pub compression_level: u8,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

/// Load the workspace config if one exists.
pub fn load_config(meta_dir: &Path) -> Result<Option<WorkspaceConfig>> {
    let path = meta_dir.join(CONFIG_FILE_NAME);
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let config = serde_json::from_str(&data)
        .map_err(|e| BeanckupError::parse(path.display().to_string(), e))?;
    Ok(Some(config))
}

pub fn save_config(meta_dir: &Path, config: &WorkspaceConfig) -> Result<()> {
    std::fs::create_dir_all(meta_dir)?;
    let path = meta_dir.join(CONFIG_FILE_NAME);
    let data = serde_json::to_string_pretty(config)
        .map_err(|e| BeanckupError::parse(path.display().to_string(), e))?;
    std::fs::write(&path, data)?;
    Ok(())
}
