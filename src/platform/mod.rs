pub mod discord;
pub mod kook;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AdapterSendError;

/// The chat services the relay connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Discord,
    Kook,
}

impl Platform {
    /// Where messages from this platform get forwarded to.
    pub fn counterpart(self) -> Platform {
        match self {
            Platform::Discord => Platform::Kook,
            Platform::Kook => Platform::Discord,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Discord => write!(f, "discord"),
            Platform::Kook => write!(f, "kook"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Video,
    Other,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "wmv", "flv", "webm", "mkv"];

impl AttachmentKind {
    /// Classify by file extension, falling back to the MIME type if the
    /// extension is unknown.
    pub fn classify(filename: &str, content_type: Option<&str>) -> Self {
        let ext = extension_of(filename);
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return AttachmentKind::Image;
        }
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            return AttachmentKind::Video;
        }
        match content_type {
            Some(ct) if ct.starts_with("image/") => AttachmentKind::Image,
            Some(ct) if ct.starts_with("video/") => AttachmentKind::Video,
            _ => AttachmentKind::Other,
        }
    }

    /// Media subdirectory this kind is stored under, if any.
    pub fn subdir(self) -> Option<&'static str> {
        match self {
            AttachmentKind::Image => Some("images"),
            AttachmentKind::Video => Some("videos"),
            AttachmentKind::Other => None,
        }
    }
}

/// Lowercased extension without the dot, empty if there is none.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// An attachment as referenced by the source platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub url: String,
    pub kind: AttachmentKind,
    pub filename: String,
}

/// A message received from either platform
#[derive(Debug, Clone)]
pub struct InboundMessageEvent {
    pub platform: Platform,
    pub channel_id: String,
    pub author_id: String,
    pub author_is_bot: bool,
    pub text: String,
    pub attachments: Vec<AttachmentRef>,
}

/// A downloaded attachment ready for upload to the destination.
#[derive(Debug, Clone)]
pub struct LocalMedia {
    pub path: PathBuf,
    /// Original file name, used for the upload.
    pub filename: String,
    pub kind: AttachmentKind,
    pub size: u64,
}

/// Reference to an attachment after it landed on the destination platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationAttachmentHandle {
    pub platform: Platform,
    pub channel_id: String,
    /// Message id or asset URL, whichever the platform hands back.
    pub reference: String,
}

/// The capability set the forwarding pipeline needs from a chat platform.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Connect and push inbound channel messages into `events` until the
    /// connection ends for good.
    async fn listen(&self, events: mpsc::Sender<InboundMessageEvent>) -> Result<()>;

    async fn send_text(&self, channel_id: &str, text: &str) -> Result<(), AdapterSendError>;

    async fn send_attachment(
        &self,
        channel_id: &str,
        media: &LocalMedia,
    ) -> Result<DestinationAttachmentHandle, AdapterSendError>;
}

/// Split long messages to fit a platform's per-message length limit
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}
