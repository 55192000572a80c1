use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serenity::all::{ChannelId, CreateAllowedMentions, CreateAttachment, CreateMessage};
use serenity::async_trait as serenity_async_trait;
use serenity::http::Http;
use serenity::model::channel::Message as DiscordMessage;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::AdapterSendError;
use crate::platform::{
    split_message, AttachmentKind, AttachmentRef, ChatAdapter, DestinationAttachmentHandle,
    InboundMessageEvent, LocalMedia, Platform,
};

const DISCORD_MESSAGE_LIMIT: usize = 2000;
const DISCORD_UPLOAD_LIMIT: u64 = 25 * 1024 * 1024;

struct Handler {
    events: mpsc::Sender<InboundMessageEvent>,
}

#[serenity_async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: DiscordMessage) {
        if msg.author.id == ctx.cache.current_user().id {
            return;
        }
        // Guild channels only
        if msg.guild_id.is_none() {
            return;
        }

        let event = to_event(&msg);
        debug!(
            "Discord message in {} from {} ({} attachment(s))",
            event.channel_id,
            event.author_id,
            event.attachments.len()
        );
        if let Err(e) = self.events.send(event).await {
            error!("Failed to queue Discord message: {}", e);
        }
    }

    async fn ready(&self, _: Context, ready: Ready) {
        info!(
            "Discord bot connected as {} (id: {})",
            ready.user.name, ready.user.id
        );
    }
}

fn to_event(msg: &DiscordMessage) -> InboundMessageEvent {
    InboundMessageEvent {
        platform: Platform::Discord,
        channel_id: msg.channel_id.to_string(),
        author_id: msg.author.id.to_string(),
        author_is_bot: msg.author.bot,
        text: msg.content.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(|a| AttachmentRef {
                url: a.url.clone(),
                kind: AttachmentKind::classify(&a.filename, a.content_type.as_deref()),
                filename: a.filename.clone(),
            })
            .collect(),
    }
}

/// Outgoing message with every mention kind disabled, so relayed
/// `@everyone`, role and user mentions stay plain text.
fn relay_message() -> CreateMessage {
    CreateMessage::new().allowed_mentions(CreateAllowedMentions::new())
}

pub struct DiscordAdapter {
    token: String,
    http: Arc<Http>,
}

impl DiscordAdapter {
    pub fn new(token: String) -> Self {
        let http = Arc::new(Http::new(&token));
        Self { token, http }
    }

    fn channel(&self, channel_id: &str) -> Result<ChannelId, AdapterSendError> {
        channel_id
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .map(ChannelId::new)
            .ok_or_else(|| {
                AdapterSendError::new(Platform::Discord, channel_id, "invalid channel id")
            })
    }
}

#[async_trait]
impl ChatAdapter for DiscordAdapter {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn listen(&self, events: mpsc::Sender<InboundMessageEvent>) -> Result<()> {
        info!("Connecting to Discord gateway...");
        let mut client = Client::builder(
            &self.token,
            GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT,
        )
        .event_handler(Handler { events })
        .await
        .context("Failed to create Discord client")?;

        // serenity reconnects on its own; start() only returns on a fatal error.
        client
            .start()
            .await
            .context("Discord gateway connection ended")?;
        Ok(())
    }

    async fn send_text(&self, channel_id: &str, text: &str) -> Result<(), AdapterSendError> {
        let channel = self.channel(channel_id)?;
        for chunk in split_message(text, DISCORD_MESSAGE_LIMIT) {
            channel
                .send_message(&*self.http, relay_message().content(chunk))
                .await
                .map_err(|e| AdapterSendError::new(Platform::Discord, channel_id, e.to_string()))?;
        }
        Ok(())
    }

    async fn send_attachment(
        &self,
        channel_id: &str,
        media: &LocalMedia,
    ) -> Result<DestinationAttachmentHandle, AdapterSendError> {
        let channel = self.channel(channel_id)?;
        if media.size > DISCORD_UPLOAD_LIMIT {
            return Err(AdapterSendError::new(
                Platform::Discord,
                channel_id,
                format!(
                    "{} is {} bytes, over the 25 MiB upload limit",
                    media.filename, media.size
                ),
            ));
        }

        let data = tokio::fs::read(&media.path)
            .await
            .map_err(|e| AdapterSendError::new(Platform::Discord, channel_id, e.to_string()))?;
        let message = channel
            .send_message(
                &*self.http,
                relay_message().add_file(CreateAttachment::bytes(data, media.filename.clone())),
            )
            .await
            .map_err(|e| AdapterSendError::new(Platform::Discord, channel_id, e.to_string()))?;

        Ok(DestinationAttachmentHandle {
            platform: Platform::Discord,
            channel_id: channel_id.to_string(),
            reference: message.id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_rejects_bad_channel_ids() {
        let adapter = DiscordAdapter::new("token".to_string());
        assert!(adapter.channel("123456789").is_ok());
        assert!(adapter.channel("0").is_err());
        let err = adapter.channel("general").unwrap_err();
        assert_eq!(err.platform, Platform::Discord);
        assert_eq!(err.channel_id, "general");
    }

    #[test]
    fn test_relayed_messages_allow_no_mentions() {
        let message =
            serde_json::to_value(relay_message().content("@everyone <@&42> hi")).unwrap();
        assert_eq!(message["content"], "@everyone <@&42> hi");
        let allowed = &message["allowed_mentions"];
        assert_eq!(allowed["parse"], serde_json::json!([]));
        assert_eq!(allowed["users"], serde_json::json!([]));
        assert_eq!(allowed["roles"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected_before_network() {
        let adapter = DiscordAdapter::new("token".to_string());
        let media = LocalMedia {
            path: PathBuf::from("/nonexistent/huge.mp4"),
            filename: "huge.mp4".to_string(),
            kind: AttachmentKind::Video,
            size: DISCORD_UPLOAD_LIMIT + 1,
        };
        let err = adapter.send_attachment("123", &media).await.unwrap_err();
        assert!(err.reason.contains("25 MiB"));
    }
}
