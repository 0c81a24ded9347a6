//! Pre-write snapshots

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use sha2::{Digest, Sha256};

use crate::error::{FsError, Result};

/// Name collisions tolerated before a snapshot gives up
const MAX_COLLISIONS: u32 = 1000;

/// Backup file name for `target` taken at the current local time.
///
/// `<basename>-<16 hex of sha256(path)>-<YYYYMMDD-HHMMSS-micros>.backup`
pub fn backup_name(target: &Path) -> String {
    let base = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let digest = Sha256::digest(target.to_string_lossy().as_bytes());
    let hash: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    let stamp = Local::now().format("%Y%m%d-%H%M%S-%6f");
    format!("{}-{}-{}.backup", base, hash, stamp)
}

/// Copy the current bytes of `target` into `backup_dir`.
///
/// Returns `Ok(None)` when the target does not exist yet. An existing
/// backup is never overwritten.
pub fn snapshot(target: &Path, backup_dir: &Path) -> Result<Option<PathBuf>> {
    if !target.exists() {
        return Ok(None);
    }

    let failed = |reason: String| FsError::BackupFailed {
        path: target.to_path_buf(),
        reason,
    };

    std::fs::create_dir_all(backup_dir)
        .map_err(|e| failed(format!("cannot create {}: {}", backup_dir.display(), e)))?;

    let (dest, mut file) = create_unique(backup_dir, &backup_name(target))
        .map_err(|e| failed(format!("cannot create backup in {}: {}", backup_dir.display(), e)))?;
    let copied = File::open(target).and_then(|mut source| io::copy(&mut source, &mut file));
    if let Err(e) = copied {
        drop(file);
        let _ = std::fs::remove_file(&dest);
        return Err(failed(e.to_string()));
    }

    tracing::debug!("Backed up {} to {}", target.display(), dest.display());
    Ok(Some(dest))
}

/// Create `name` in `dir` exclusively, numbering it on collision
fn create_unique(dir: &Path, name: &str) -> io::Result<(PathBuf, File)> {
    for n in 0..MAX_COLLISIONS {
        let candidate = if n == 0 {
            dir.join(name)
        } else {
            dir.join(numbered(name, n))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("{} backups named {} already exist", MAX_COLLISIONS, name),
    ))
}

fn numbered(name: &str, n: u32) -> String {
    match name.strip_suffix(".backup") {
        Some(stem) => format!("{}-{}.backup", stem, n),
        None => format!("{}-{}", name, n),
    }
}
