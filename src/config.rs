use crate::error::{GridFuseError, Result};
use crate::store::DEFAULT_CHUNK_SIZE;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persistent defaults for mounts, overridable per-invocation by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database namespace within the store.
    pub db: String,
    /// Collection namespace within the database.
    pub collection: String,
    /// Chunk size in bytes for newly created objects.
    pub chunk_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db: "test".to_string(),
            collection: "fs".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", "gridfuse")
        .ok_or_else(|| GridFuseError::Config("Could not determine config directory".to_string()))?;
    Ok(proj_dirs.config_dir().join("config.toml"))
}

/// Load the config file, falling back to defaults when it doesn't exist.
pub fn load_config() -> Result<Config> {
    let path = get_config_path()?;
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        GridFuseError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    parse_config(&contents)
}

fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents)
        .map_err(|e| GridFuseError::Config(format!("Failed to parse config: {}", e)))?;
    if config.chunk_size == 0 {
        return Err(GridFuseError::Config(
            "chunk_size must be greater than zero".to_string(),
        ));
    }
    // chunk_size becomes the kernel's u32 blksize field
    if config.chunk_size > u32::MAX as u64 {
        return Err(GridFuseError::Config(format!(
            "chunk_size must be at most {} bytes",
            u32::MAX
        )));
    }
    Ok(config)
}
