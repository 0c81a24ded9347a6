//! poly-fs: sandboxed file engine
//!
//! Every path goes through `FileEngine::validate_path` before it is read,
//! written, listed or walked. Reads are cached with a TTL; writes go through
//! a temp file and a rename, with an optional backup of the previous bytes.

pub mod backup;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod walker;

pub use cache::{CacheEntry, FileCache};
pub use config::FileEngineConfig;
pub use engine::{
    DirEntryInfo, Diagnosis, FileEngine, FileInfo, StagedWrite, ValidationReport, WriteOutcome,
};
pub use error::{FsError, Result};
pub use walker::{FileWalker, WalkEntry};
