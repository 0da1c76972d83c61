use crate::error::CacheError;
use std::path::PathBuf;

/// Selects the on-disk cache root.
#[derive(Clone, Debug, Default)]
pub struct CacheConfig {
    /// Overrides the global cache directory (`~/.unravel/cache`).
    pub cache_root_override: Option<PathBuf>,
}

impl CacheConfig {
    /// Reads the override from `UNRAVEL_CACHE_DIR`.
    pub fn from_env() -> Self {
        Self {
            cache_root_override: std::env::var_os("UNRAVEL_CACHE_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn cache_root(&self) -> Result<PathBuf, CacheError> {
        match &self.cache_root_override {
            Some(root) => Ok(root.clone()),
            None => default_cache_root(),
        }
    }
}

/// Directory holding persisted decompiled code, created if missing.
pub fn code_cache_dir(config: &CacheConfig) -> Result<PathBuf, CacheError> {
    let dir = config.cache_root()?.join("code");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn default_cache_root() -> Result<PathBuf, CacheError> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or(CacheError::MissingHomeDir)?;

    Ok(home.join(".unravel").join("cache"))
}
