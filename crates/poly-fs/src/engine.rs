//! Sandboxed file access

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::backup;
use crate::cache::FileCache;
use crate::config::FileEngineConfig;
use crate::error::{FsError, Result};
use crate::walker::FileWalker;

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
}

/// A staged write: the new bytes sit in a temp file next to `target`
/// until committed. Dropping it removes the temp file.
#[derive(Debug)]
pub struct StagedWrite {
    pub target: PathBuf,
    tmp: NamedTempFile,
}

impl StagedWrite {
    /// Where the staged bytes currently live
    pub fn tmp_path(&self) -> &Path {
        self.tmp.path()
    }
}

/// One directory listing entry
#[derive(Debug, Clone, Serialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
}

/// Metadata about a validated path
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
    pub readonly: bool,
    pub modified: Option<DateTime<Local>>,
}

/// Outcome of path validation, as reported by `diagnose`
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub allowed: bool,
    pub resolved: Option<PathBuf>,
    pub error: Option<String>,
    pub code: Option<i32>,
}

/// Everything the engine knows about a path
#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub path: PathBuf,
    pub validation: ValidationReport,
    pub exists: bool,
    pub file_info: Option<FileInfo>,
    pub within_size_limit: Option<bool>,
    pub cached: bool,
    pub suggestions: Vec<String>,
}

/// File engine bound to a set of sandbox roots
#[derive(Debug)]
pub struct FileEngine {
    config: FileEngineConfig,
    roots: Vec<PathBuf>,
    backup_dir: PathBuf,
    cache: FileCache,
}

impl FileEngine {
    /// Create an engine; roots are canonicalized up front and must exist.
    pub fn new(config: FileEngineConfig) -> Result<Self> {
        let configured = if config.allowed_roots.is_empty() {
            vec![std::env::current_dir().map_err(|e| FsError::io(".", e))?]
        } else {
            config.allowed_roots.clone()
        };

        let roots = configured
            .iter()
            .map(|root| root.canonicalize().map_err(|e| FsError::io(root, e)))
            .collect::<Result<Vec<_>>>()?;

        let backup_dir = if config.backup_dir.is_absolute() {
            config.backup_dir.clone()
        } else {
            roots[0].join(&config.backup_dir)
        };

        let cache = FileCache::new(config.cache_ttl(), config.cache_capacity);
        tracing::debug!("File engine roots: {:?}", roots);

        Ok(Self {
            config,
            roots,
            backup_dir,
            cache,
        })
    }

    pub fn config(&self) -> &FileEngineConfig {
        &self.config
    }

    /// Canonical sandbox roots
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Resolve `path` and check it against the sandbox.
    ///
    /// Symlinks are resolved, so a link inside a root pointing outside of it
    /// is refused. Paths that do not exist yet are resolved through their
    /// nearest existing ancestor.
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| FsError::io(path, e))?
                .join(path)
        };
        let resolved = resolve(&lexical_normalize(&absolute))
            .map_err(|e| FsError::not_allowed(path, format!("cannot resolve: {}", e)))?;

        if !self.roots.iter().any(|root| resolved.starts_with(root)) {
            return Err(FsError::not_allowed(path, "outside allowed directories"));
        }

        if let Some(ext) = resolved.extension().and_then(|e| e.to_str()) {
            if self.config.is_blacklisted(ext) {
                return Err(FsError::not_allowed(
                    path,
                    format!("extension .{} is blacklisted", ext),
                ));
            }
        }

        Ok(resolved)
    }

    /// Read a whole file, through the cache unless `force_refresh`.
    pub fn read_file(&self, path: &Path, force_refresh: bool) -> Result<Vec<u8>> {
        let resolved = self.validate_path(path)?;

        if self.config.enable_cache && !force_refresh {
            if let Some(content) = self.cache.get(&resolved) {
                tracing::debug!("Cache hit: {}", resolved.display());
                return Ok(content);
            }
        }

        let meta = std::fs::metadata(&resolved).map_err(|e| FsError::io(&resolved, e))?;
        if meta.is_dir() {
            return Err(FsError::Io {
                path: resolved,
                source: std::io::Error::other("is a directory"),
            });
        }
        if meta.len() > self.config.max_file_size {
            return Err(FsError::FileTooLarge {
                path: resolved,
                size: meta.len(),
                max: self.config.max_file_size,
            });
        }

        let content = std::fs::read(&resolved).map_err(|e| FsError::io(&resolved, e))?;
        if self.config.enable_cache {
            self.cache.put(&resolved, content.clone());
        }
        Ok(content)
    }

    /// Read a file as UTF-8, replacing invalid sequences
    pub fn read_to_string(&self, path: &Path, force_refresh: bool) -> Result<String> {
        let bytes = self.read_file(path, force_refresh)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write `content` atomically, optionally backing up the current file.
    pub fn write_file(&self, path: &Path, content: &[u8], backup: bool) -> Result<WriteOutcome> {
        let resolved = self.validate_path(path)?;

        let backup = if backup {
            backup::snapshot(&resolved, &self.backup_dir)?
        } else {
            None
        };

        let staged = self.stage(&resolved, content)?;
        self.commit_temp(staged)?;

        if self.config.enable_cache {
            self.cache.put(&resolved, content.to_vec());
        }

        Ok(WriteOutcome {
            path: resolved,
            backup,
        })
    }

    /// First half of a write: put `content` in a fresh temp file beside the
    /// target. The target is untouched until `commit_temp`.
    pub fn write_temp(&self, path: &Path, content: &[u8]) -> Result<StagedWrite> {
        let resolved = self.validate_path(path)?;
        self.stage(&resolved, content)
    }

    fn stage(&self, resolved: &Path, content: &[u8]) -> Result<StagedWrite> {
        let parent = resolved
            .parent()
            .ok_or_else(|| FsError::io(resolved, std::io::Error::other("no parent directory")))?;
        std::fs::create_dir_all(parent).map_err(|e| FsError::io(parent, e))?;

        // Created with O_EXCL under a random name, so a planted file or
        // symlink in the directory is never followed.
        let prefix = format!(
            ".{}.",
            resolved
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(|e| FsError::io(parent, e))?;
        tmp.write_all(content)
            .and_then(|()| tmp.flush())
            .map_err(|e| FsError::io(resolved, e))?;
        keep_permissions(resolved, &tmp);

        Ok(StagedWrite {
            target: resolved.to_path_buf(),
            tmp,
        })
    }

    /// Second half of a write: rename the staged file over the target.
    pub fn commit_temp(&self, staged: StagedWrite) -> Result<()> {
        let StagedWrite { target, tmp } = staged;
        // On failure the temp file is dropped along with the error.
        tmp.persist(&target).map_err(|e| FsError::io(&target, e.error))?;
        self.cache.invalidate(&target);
        Ok(())
    }

    /// Drop a staged write without touching the target
    pub fn discard_temp(&self, staged: StagedWrite) {
        drop(staged);
    }

    /// List a directory, sorted by name. Entries that fail validation
    /// (blacklisted, or symlinks leaving the sandbox) are left out.
    pub fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>> {
        let resolved = self.validate_path(path)?;
        let read = std::fs::read_dir(&resolved).map_err(|e| FsError::io(&resolved, e))?;

        let mut entries = Vec::new();
        for entry in read.flatten() {
            let entry_path = entry.path();
            let Ok(target) = self.validate_path(&entry_path) else {
                continue;
            };
            let Ok(meta) = std::fs::metadata(&target) else {
                continue;
            };
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry_path,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Metadata for a validated path
    pub fn file_info(&self, path: &Path) -> Result<FileInfo> {
        let resolved = self.validate_path(path)?;
        let meta = std::fs::metadata(&resolved).map_err(|e| FsError::io(&resolved, e))?;
        Ok(FileInfo {
            path: resolved,
            size: meta.len(),
            is_dir: meta.is_dir(),
            readonly: meta.permissions().readonly(),
            modified: meta.modified().ok().map(DateTime::<Local>::from),
        })
    }

    /// Explain what the engine would do with `path`
    pub fn diagnose(&self, path: &Path) -> Diagnosis {
        let mut suggestions = Vec::new();

        let (validation, resolved) = match self.validate_path(path) {
            Ok(resolved) => (
                ValidationReport {
                    allowed: true,
                    resolved: Some(resolved.clone()),
                    error: None,
                    code: None,
                },
                Some(resolved),
            ),
            Err(e) => {
                suggestions.push(e.suggestion().to_string());
                (
                    ValidationReport {
                        allowed: false,
                        resolved: None,
                        error: Some(e.to_string()),
                        code: Some(e.code()),
                    },
                    None,
                )
            }
        };

        let mut exists = false;
        let mut file_info = None;
        let mut within_size_limit = None;
        let mut cached = false;

        if let Some(resolved) = &resolved {
            match self.file_info(resolved) {
                Ok(info) => {
                    exists = true;
                    if !info.is_dir {
                        let fits = info.size <= self.config.max_file_size;
                        if !fits {
                            suggestions.push(format!(
                                "File is {} bytes; the limit is {}",
                                info.size, self.config.max_file_size
                            ));
                        }
                        within_size_limit = Some(fits);
                    }
                    file_info = Some(info);
                }
                Err(e) => suggestions.push(e.suggestion().to_string()),
            }
            cached = self.is_cached(resolved);
        }

        if suggestions.is_empty() {
            suggestions.push("No problems found".to_string());
        }

        Diagnosis {
            path: path.to_path_buf(),
            validation,
            exists,
            file_info,
            within_size_limit,
            cached,
            suggestions,
        }
    }

    /// Start a directory walk under `root`
    pub fn walker(&self, root: impl Into<PathBuf>) -> FileWalker<'_> {
        FileWalker::new(self, root)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Whether `path` has a live cache entry
    pub fn is_cached(&self, path: &Path) -> bool {
        match self.validate_path(path) {
            Ok(resolved) => self.cache.contains(&resolved),
            Err(_) => false,
        }
    }
}

/// Temp files are created owner-only; give the new file the permissions of
/// the file it replaces, or the usual default for a new file.
fn keep_permissions(target: &Path, tmp: &NamedTempFile) {
    let permissions = match std::fs::metadata(target) {
        Ok(meta) => Some(meta.permissions()),
        Err(_) => default_permissions(),
    };
    if let Some(permissions) = permissions {
        if let Err(e) = tmp.as_file().set_permissions(permissions) {
            tracing::debug!("Could not set permissions on {}: {}", tmp.path().display(), e);
        }
    }
}

#[cfg(unix)]
fn default_permissions() -> Option<std::fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<std::fs::Permissions> {
    None
}

/// Drop `.` components and fold `..` without touching the filesystem
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing prefix and re-append the rest
fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path;
    let mut tail = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(base) => {
                let mut resolved = base;
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) => {
                let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                    return Err(e);
                };
                tail.push(name.to_os_string());
                existing = parent;
            }
        }
    }
}
