use thiserror::Error;

use crate::platform::Platform;
use crate::translate::BackendKind;

/// Bad or missing configuration. Only a missing platform token is fatal;
/// everything else degrades the feature it belongs to.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no platform token configured: set DISCORD_BOT_TOKEN and/or KOOK_BOT_TOKEN")]
    NoPlatformToken,
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("unknown translation service: {0:?}")]
    UnknownService(String),
    #[error("{backend} translation is missing {missing}")]
    MissingCredentials {
        backend: BackendKind,
        missing: &'static str,
    },
}

#[derive(Debug, Error)]
#[error("{backend} translation failed: {reason}")]
pub struct TranslationError {
    pub backend: BackendKind,
    pub reason: String,
}

impl TranslationError {
    pub fn new(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self {
            backend,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("transfer of {filename:?} failed: {reason}")]
pub struct MediaTransferError {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Error)]
#[error("send to {platform} channel {channel_id} failed: {reason}")]
pub struct AdapterSendError {
    pub platform: Platform,
    pub channel_id: String,
    pub reason: String,
}

impl AdapterSendError {
    pub fn new(platform: Platform, channel_id: &str, reason: impl Into<String>) -> Self {
        Self {
            platform,
            channel_id: channel_id.to_string(),
            reason: reason.into(),
        }
    }
}
