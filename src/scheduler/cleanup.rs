use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::scheduler::Scheduler;

/// Deletes media files older than `max_age` anywhere under `root`.
#[derive(Debug, Clone)]
pub struct CleanupSweeper {
    root: PathBuf,
    max_age: Duration,
}

impl CleanupSweeper {
    pub fn new(root: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            root: root.into(),
            max_age,
        }
    }

    /// One pass over the media tree. Returns how many files were deleted.
    pub async fn sweep(&self) -> Result<usize> {
        let root = self.root.clone();
        let max_age = self.max_age;
        tokio::task::spawn_blocking(move || sweep_dir(&root, max_age, SystemTime::now()))
            .await
            .context("Cleanup sweep panicked")
    }

    /// Run one sweep now and register the repeating sweep on `scheduler`.
    pub async fn schedule(
        self: Arc<Self>,
        scheduler: &Scheduler,
        interval: Duration,
    ) -> Result<()> {
        self.run_logged().await;

        let sweeper = self;
        scheduler
            .add_repeated_job(interval, "media-cleanup", move || {
                let sweeper = sweeper.clone();
                Box::pin(async move {
                    sweeper.run_logged().await;
                })
            })
            .await
    }

    async fn run_logged(&self) {
        match self.sweep().await {
            Ok(0) => debug!(
                "Cleanup: nothing older than {:?} in {}",
                self.max_age,
                self.root.display()
            ),
            Ok(n) => info!("Cleanup: deleted {} file(s) from {}", n, self.root.display()),
            Err(e) => error!("Cleanup sweep failed: {:#}", e),
        }
    }
}

fn sweep_dir(root: &Path, max_age: Duration, now: SystemTime) -> usize {
    if !root.exists() {
        return 0;
    }

    let mut deleted = 0;
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cleanup: cannot read entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
            warn!("Cleanup: no mtime for {}", entry.path().display());
            continue;
        };

        // Files from the future count as fresh.
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Cleanup: removed {}", entry.path().display());
                deleted += 1;
            }
            Err(e) => warn!("Cleanup: failed to remove {}: {}", entry.path().display(), e),
        }
    }
    deleted
}
