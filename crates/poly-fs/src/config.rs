//! File engine configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for a `FileEngine`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileEngineConfig {
    /// Directories the engine may touch. Empty means the current directory.
    pub allowed_roots: Vec<PathBuf>,
    /// Extensions (with leading dot) that are always refused
    pub blacklisted_extensions: Vec<String>,
    /// Largest file, in bytes, that will be read
    pub max_file_size: u64,
    pub enable_cache: bool,
    /// Where backups go; relative paths resolve against the first root
    pub backup_dir: PathBuf,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

impl Default for FileEngineConfig {
    fn default() -> Self {
        Self {
            allowed_roots: Vec::new(),
            blacklisted_extensions: [".exe", ".dll", ".so", ".dylib", ".bin"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size: 10 * 1024 * 1024,
            enable_cache: true,
            backup_dir: PathBuf::from(".polyagent-backups"),
            cache_ttl_secs: 300,
            cache_capacity: 100,
        }
    }
}

impl FileEngineConfig {
    /// Config rooted at a single directory
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            allowed_roots: vec![root.into()],
            ..Default::default()
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Whether `ext` (without the dot) is blacklisted, ignoring case
    pub fn is_blacklisted(&self, ext: &str) -> bool {
        self.blacklisted_extensions.iter().any(|b| {
            b.trim_start_matches('.').eq_ignore_ascii_case(ext)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FileEngineConfig::default();
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache_capacity, 100);
        assert_eq!(config.backup_dir, PathBuf::from(".polyagent-backups"));
        assert!(config.enable_cache);
    }

    #[test]
    fn test_blacklist_ignores_case_and_dot() {
        let config = FileEngineConfig::default();
        assert!(config.is_blacklisted("exe"));
        assert!(config.is_blacklisted("DLL"));
        assert!(!config.is_blacklisted("rs"));
    }
}
