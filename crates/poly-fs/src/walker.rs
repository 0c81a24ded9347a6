//! Sandboxed recursive directory traversal

use std::path::PathBuf;

use glob::Pattern;
use walkdir::WalkDir;

use crate::engine::FileEngine;
use crate::error::{FsError, Result};

/// A file or directory found by a walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    /// Path relative to the walk root
    pub relative: PathBuf,
    pub is_dir: bool,
    pub size: u64,
}

/// Builder for a walk over one directory tree.
///
/// Include and exclude patterns match the entry's file name. Excluded
/// directories are pruned; include patterns only filter files.
pub struct FileWalker<'a> {
    engine: &'a FileEngine,
    root: PathBuf,
    include: Vec<String>,
    exclude: Vec<String>,
    max_depth: Option<usize>,
    files_only: bool,
}

impl<'a> FileWalker<'a> {
    pub fn new(engine: &'a FileEngine, root: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            root: root.into(),
            include: Vec::new(),
            exclude: Vec::new(),
            max_depth: None,
            files_only: false,
        }
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include.push(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    pub fn excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Limit recursion; `None` is unlimited, `Some(1)` is the root's children
    pub fn max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Only return files
    pub fn files_only(mut self, files_only: bool) -> Self {
        self.files_only = files_only;
        self
    }

    /// Run the walk. Entries failing sandbox validation are skipped.
    pub fn walk(self) -> Result<Vec<WalkEntry>> {
        let root = self.engine.validate_path(&self.root)?;
        let include = compile(&self.include)?;
        let exclude = compile(&self.exclude)?;

        let mut walk = WalkDir::new(&root).min_depth(1).follow_links(false);
        if let Some(depth) = self.max_depth {
            walk = walk.max_depth(depth);
        }

        let mut out = Vec::new();
        let entries = walk.into_iter().filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !exclude.iter().any(|p| p.matches(&name))
        });

        for entry in entries.filter_map(|e| e.ok()) {
            let is_dir = entry.file_type().is_dir();
            if is_dir && (self.files_only || !include.is_empty()) {
                continue;
            }
            if !is_dir && !include.is_empty() {
                let name = entry.file_name().to_string_lossy();
                if !include.iter().any(|p| p.matches(&name)) {
                    continue;
                }
            }
            if self.engine.validate_path(entry.path()).is_err() {
                tracing::debug!("Walker skipping {}", entry.path().display());
                continue;
            }

            let size = if is_dir {
                0
            } else {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            };
            let relative = entry
                .path()
                .strip_prefix(&root)
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|_| entry.path().to_path_buf());

            out.push(WalkEntry {
                path: entry.path().to_path_buf(),
                relative,
                is_dir,
                size,
            });
        }

        Ok(out)
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| FsError::InvalidPattern {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileEngineConfig;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, FileEngine) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::create_dir_all(root.join("target/debug")).unwrap();
        std::fs::write(root.join("Cargo.toml"), "[package]").unwrap();
        std::fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(root.join("src/nested/lib.rs"), "").unwrap();
        std::fs::write(root.join("src/notes.md"), "# notes").unwrap();
        std::fs::write(root.join("target/debug/out.rs"), "").unwrap();
        std::fs::write(root.join("target/debug/app.exe"), "").unwrap();
        let engine = FileEngine::new(FileEngineConfig::with_root(root)).unwrap();
        (dir, engine)
    }

    fn relative(entries: &[WalkEntry]) -> Vec<String> {
        let mut names: Vec<String> = entries
            .iter()
            .map(|e| e.relative.to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_include_filters_files() {
        let (dir, engine) = fixture();
        let entries = engine
            .walker(dir.path())
            .include("*.rs")
            .exclude("target")
            .walk()
            .unwrap();
        assert_eq!(relative(&entries), vec!["src/main.rs", "src/nested/lib.rs"]);
    }

    #[test]
    fn test_excluded_directories_are_pruned() {
        let (dir, engine) = fixture();
        let entries = engine
            .walker(dir.path())
            .excludes(["target", "nested"])
            .walk()
            .unwrap();
        let names = relative(&entries);
        assert!(names.iter().all(|n| !n.starts_with("target")));
        assert!(names.iter().all(|n| !n.contains("nested")));
        assert!(names.contains(&"src".to_string()));
    }

    #[test]
    fn test_max_depth() {
        let (dir, engine) = fixture();
        let entries = engine
            .walker(dir.path())
            .max_depth(Some(1))
            .files_only(true)
            .walk()
            .unwrap();
        assert_eq!(relative(&entries), vec!["Cargo.toml"]);
    }

    #[test]
    fn test_blacklisted_files_skipped() {
        let (dir, engine) = fixture();
        let entries = engine.walker(dir.path()).files_only(true).walk().unwrap();
        let names = relative(&entries);
        assert!(names.contains(&"target/debug/out.rs".to_string()));
        assert!(!names.iter().any(|n| n.ends_with(".exe")));
    }

    #[test]
    fn test_sizes_reported() {
        let (dir, engine) = fixture();
        let entries = engine.walker(dir.path()).include("main.rs").walk().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, "fn main() {}".len() as u64);
        assert!(!entries[0].is_dir);
    }

    #[test]
    fn test_invalid_pattern() {
        let (dir, engine) = fixture();
        let err = engine.walker(dir.path()).include("[").walk().unwrap_err();
        assert!(matches!(err, FsError::InvalidPattern { .. }));
    }
}
