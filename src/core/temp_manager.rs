//! Working directory management
//!
//! Every batch gets a scoped directory under one root. Directories left
//! behind by a crashed or killed process are swept the first time a manager
//! is created for that root.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::core::models::AppResult;

/// Name prefix of every working directory
pub const WORKDIR_PREFIX: &str = "ytbatch-";

/// Slack for filesystems whose timestamps lag the wall clock
const ORPHAN_GRACE: Duration = Duration::from_secs(2);

static PROCESS_START: OnceLock<SystemTime> = OnceLock::new();

/// First time this process touched a temp manager; anything older carrying
/// the prefix belongs to an earlier process
fn process_start() -> SystemTime {
    *PROCESS_START.get_or_init(SystemTime::now)
}

/// Owner of the working directory root
#[derive(Debug)]
pub struct TempManager {
    root: PathBuf,
}

impl TempManager {
    /// Create the root if needed and sweep orphans from earlier runs
    pub fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let cutoff = process_start()
            .checked_sub(ORPHAN_GRACE)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let manager = Self { root };
        let removed = manager.sweep_orphans(cutoff);
        if removed > 0 {
            info!(
                "Removed {} orphaned working directories from {:?}",
                removed, manager.root
            );
        }
        Ok(manager)
    }

    /// Manager rooted in the system temp directory
    pub fn in_system_temp() -> AppResult<Self> {
        Self::new(std::env::temp_dir().join("yt-batch-downloader"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh, uniquely named working directory
    pub fn acquire(&self) -> AppResult<ScopedDirectory> {
        let dir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir_in(&self.root)?;
        debug!("Acquired working directory {:?}", dir.path());
        Ok(ScopedDirectory { dir })
    }

    /// Remove prefixed directories last modified before `cutoff`; returns
    /// how many were removed
    pub fn sweep_orphans(&self, cutoff: SystemTime) -> usize {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan {:?} for orphans: {}", self.root, e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(WORKDIR_PREFIX) {
                continue;
            }

            let is_orphan = entry
                .metadata()
                .ok()
                .filter(|metadata| metadata.is_dir())
                .and_then(|metadata| metadata.modified().ok())
                .map_or(false, |modified| modified < cutoff);
            if !is_orphan {
                continue;
            }

            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    debug!("Removed orphaned working directory {:?}", entry.path());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove orphan {:?}: {}", entry.path(), e),
            }
        }
        removed
    }
}

/// A working directory removed recursively on [`close`](Self::close) or drop
#[derive(Debug)]
pub struct ScopedDirectory {
    dir: TempDir,
}

impl ScopedDirectory {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting failures
    pub fn close(self) -> AppResult<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("Released working directory {:?}", path);
        Ok(())
    }
}
