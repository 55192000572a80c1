use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::MediaTransferError;
use crate::platform::{AttachmentRef, ChatAdapter, DestinationAttachmentHandle, LocalMedia};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_STORED_NAME_LEN: usize = 100;

/// A file in the media directory owned by exactly one forward operation.
/// Dropping it deletes the file, so every exit path releases it.
#[derive(Debug)]
pub struct DownloadedFile {
    path: PathBuf,
    created_at: DateTime<Utc>,
    size: u64,
}

impl DownloadedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for DownloadedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(
                "Released {} after {}ms",
                self.path.display(),
                (Utc::now() - self.created_at).num_milliseconds()
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to delete {} (left for the sweeper): {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Downloads attachments into the media directory and re-uploads them to a
/// destination adapter.
#[derive(Clone)]
pub struct MediaTransfer {
    client: reqwest::Client,
    root: PathBuf,
}

impl MediaTransfer {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("Failed to build download client")?;
        Ok(Self::with_client(root, client))
    }

    pub fn with_client(root: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            client,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the media root and its `images/` and `videos/` subdirectories.
    pub async fn ensure_directories(&self) -> Result<()> {
        for subdir in ["images", "videos"] {
            let dir = self.root.join(subdir);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create media directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Download an attachment to a fresh, uniquely named local file.
    pub async fn download(
        &self,
        attachment: &AttachmentRef,
    ) -> Result<DownloadedFile, MediaTransferError> {
        let fail = |reason: String| MediaTransferError {
            filename: attachment.filename.clone(),
            reason,
        };

        let dir = match attachment.kind.subdir() {
            Some(subdir) => self.root.join(subdir),
            None => self.root.clone(),
        };
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| fail(format!("cannot create {}: {}", dir.display(), e)))?;

        let path = dir.join(format!(
            "{}_{}",
            uuid::Uuid::new_v4().simple(),
            stored_name(&attachment.filename)
        ));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| fail(format!("cannot create {}: {}", path.display(), e)))?;

        // From here on the guard owns the path, including partial downloads.
        let mut downloaded = DownloadedFile {
            path,
            created_at: Utc::now(),
            size: 0,
        };

        let response = self
            .client
            .get(&attachment.url)
            .send()
            .await
            .map_err(|e| fail(format!("download failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("download failed with HTTP {}", status)));
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fail(format!("download interrupted: {}", e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| fail(format!("write failed: {}", e)))?;
            downloaded.size += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| fail(format!("write failed: {}", e)))?;

        debug!(
            "Downloaded {} ({} bytes) to {}",
            attachment.filename,
            downloaded.size,
            downloaded.path.display()
        );
        Ok(downloaded)
    }

    /// Download `attachment` and upload it to `channel_id` on `destination`.
    /// The local copy is gone by the time this returns, whatever the outcome.
    pub async fn transfer(
        &self,
        attachment: &AttachmentRef,
        destination: &dyn ChatAdapter,
        channel_id: &str,
    ) -> Result<DestinationAttachmentHandle, MediaTransferError> {
        let downloaded = self.download(attachment).await?;

        let media = LocalMedia {
            path: downloaded.path().to_path_buf(),
            filename: attachment.filename.clone(),
            kind: attachment.kind,
            size: downloaded.size(),
        };

        let result = destination
            .send_attachment(channel_id, &media)
            .await
            .map_err(|e| MediaTransferError {
                filename: attachment.filename.clone(),
                reason: e.to_string(),
            });

        drop(downloaded);
        result
    }
}

/// File-system safe version of an attachment name.
fn stored_name(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return "attachment".to_string();
    }
    // Keep the tail so the extension survives.
    let skip = cleaned.len().saturating_sub(MAX_STORED_NAME_LEN);
    cleaned[skip..].to_string()
}
