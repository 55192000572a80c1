use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ForwardConfig;
use crate::media::MediaTransfer;
use crate::platform::{ChatAdapter, InboundMessageEvent, Platform};
use crate::rules::ForwardRuleTable;
use crate::translate::Translator;

const UNTRANSLATED_FLAG: &str = "[untranslated]";
const ATTACHMENT_PLACEHOLDER: &str = "[attachment]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    BotMessage,
    NoRule,
    NoDestinationAdapter,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationStatus {
    NotAttempted,
    Translated,
    /// Whitelisted, code only, or the backend returned the input unchanged.
    Skipped,
    Failed,
}

/// How a single forward ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    Dropped(DropReason),
    Delivered {
        text_sent: bool,
        attachments_sent: usize,
        attachments_failed: usize,
        translated: TranslationStatus,
    },
}

#[derive(Debug, Clone)]
pub struct ForwardSettings {
    pub forward_bot_messages: bool,
    pub message_prefix: String,
    pub kook_message_prefix: String,
}

impl From<&ForwardConfig> for ForwardSettings {
    fn from(config: &ForwardConfig) -> Self {
        Self {
            forward_bot_messages: config.forward_bot_messages,
            message_prefix: config.message_prefix.clone(),
            kook_message_prefix: config.kook_message_prefix.clone(),
        }
    }
}

impl ForwardSettings {
    fn prefix_for(&self, origin: Platform) -> &str {
        match origin {
            Platform::Discord => &self.message_prefix,
            Platform::Kook => &self.kook_message_prefix,
        }
    }
}

/// The forwarding pipeline. Built once at startup and shared by every
/// forward task.
pub struct Forwarder {
    rules: ForwardRuleTable,
    settings: ForwardSettings,
    translator: Option<Translator>,
    media: MediaTransfer,
    adapters: HashMap<Platform, Arc<dyn ChatAdapter>>,
}

impl Forwarder {
    pub fn new(
        rules: ForwardRuleTable,
        settings: ForwardSettings,
        translator: Option<Translator>,
        media: MediaTransfer,
    ) -> Self {
        Self {
            rules,
            settings,
            translator,
            media,
            adapters: HashMap::new(),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ChatAdapter>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    /// Run one inbound event through filter, resolve, translate, compose
    /// and send.
    pub async fn forward(&self, event: InboundMessageEvent) -> ForwardOutcome {
        if event.author_is_bot && !self.settings.forward_bot_messages {
            debug!(
                "Dropping bot message from {} channel {}",
                event.platform, event.channel_id
            );
            return ForwardOutcome::Dropped(DropReason::BotMessage);
        }

        let Some(dest_channel) = self.rules.resolve(&event.channel_id) else {
            debug!(
                "No forward rule for {} channel {}",
                event.platform, event.channel_id
            );
            return ForwardOutcome::Dropped(DropReason::NoRule);
        };

        let dest_platform = event.platform.counterpart();
        let Some(destination) = self.adapters.get(&dest_platform) else {
            warn!(
                "Rule {} -> {} points at {}, which is not connected",
                event.channel_id, dest_channel, dest_platform
            );
            return ForwardOutcome::Dropped(DropReason::NoDestinationAdapter);
        };

        let text = event.text.trim();
        if text.is_empty() && event.attachments.is_empty() {
            return ForwardOutcome::Dropped(DropReason::Empty);
        }

        let prefix = self.settings.prefix_for(event.platform);
        let (body, translation) = self.compose_body(&event, text).await;
        let message = format!("{} {}", prefix, body);

        let text_sent = match destination.send_text(dest_channel, &message).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to forward text from {} channel {}: {}",
                    event.platform, event.channel_id, e
                );
                false
            }
        };

        let mut attachments_sent = 0;
        let mut attachments_failed = 0;
        for attachment in &event.attachments {
            match self
                .media
                .transfer(attachment, destination.as_ref(), dest_channel)
                .await
            {
                Ok(handle) => {
                    debug!(
                        "Attachment {} delivered as {}",
                        attachment.filename, handle.reference
                    );
                    attachments_sent += 1;
                }
                Err(e) => {
                    error!(
                        "Attachment from {} channel {} not forwarded: {}",
                        event.platform, event.channel_id, e
                    );
                    attachments_failed += 1;
                    let notice =
                        format!("{} attachment not forwarded: {}", prefix, attachment.filename);
                    if let Err(e) = destination.send_text(dest_channel, &notice).await {
                        error!("Failed to send attachment notice: {}", e);
                    }
                }
            }
        }

        info!(
            "Forwarded {} {} -> {} {} (text: {}, attachments: {}/{})",
            event.platform,
            event.channel_id,
            dest_platform,
            dest_channel,
            text_sent,
            attachments_sent,
            event.attachments.len()
        );

        ForwardOutcome::Delivered {
            text_sent,
            attachments_sent,
            attachments_failed,
            translated: translation,
        }
    }

    async fn compose_body(
        &self,
        event: &InboundMessageEvent,
        text: &str,
    ) -> (String, TranslationStatus) {
        if text.is_empty() {
            return (
                ATTACHMENT_PLACEHOLDER.to_string(),
                TranslationStatus::NotAttempted,
            );
        }

        let Some(translator) = &self.translator else {
            return (text.to_string(), TranslationStatus::NotAttempted);
        };

        match translator.bilingual(text).await {
            Ok(Some(block)) => (block, TranslationStatus::Translated),
            Ok(None) => (text.to_string(), TranslationStatus::Skipped),
            Err(e) => {
                error!(
                    "Translation failed for {} channel {}: {}",
                    event.platform, event.channel_id, e
                );
                (
                    format!("{}\n{}", text, UNTRANSLATED_FLAG),
                    TranslationStatus::Failed,
                )
            }
        }
    }

    /// Consume events from one listener, forwarding each in its own task.
    pub async fn dispatch(self: Arc<Self>, mut events: mpsc::Receiver<InboundMessageEvent>) {
        while let Some(event) = events.recv().await {
            let forwarder = Arc::clone(&self);
            tokio::spawn(async move {
                forwarder.forward(event).await;
            });
        }
        debug!("Event channel closed, dispatcher stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::RecordingAdapter;
    use crate::platform::{AttachmentKind, AttachmentRef};
    use crate::translate::testing::ScriptedBackend;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        forwarder: Forwarder,
        discord: Arc<RecordingAdapter>,
        kook: Arc<RecordingAdapter>,
        _dir: tempfile::TempDir,
    }

    fn settings() -> ForwardSettings {
        ForwardSettings {
            forward_bot_messages: false,
            message_prefix: "[Discord]".to_string(),
            kook_message_prefix: "[KOOK]".to_string(),
        }
    }

    fn harness(rules: &str, translator: Option<Translator>) -> Harness {
        harness_with(rules, translator, RecordingAdapter::new(Platform::Kook))
    }

    fn harness_with(rules: &str, translator: Option<Translator>, kook: RecordingAdapter) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let discord = Arc::new(RecordingAdapter::new(Platform::Discord));
        let kook = Arc::new(kook);
        let forwarder = Forwarder::new(
            ForwardRuleTable::parse(rules),
            settings(),
            translator,
            MediaTransfer::with_client(dir.path(), reqwest::Client::new()),
        )
        .with_adapter(discord.clone())
        .with_adapter(kook.clone());
        Harness {
            forwarder,
            discord,
            kook,
            _dir: dir,
        }
    }

    fn event(platform: Platform, channel: &str, text: &str) -> InboundMessageEvent {
        InboundMessageEvent {
            platform,
            channel_id: channel.to_string(),
            author_id: "u1".to_string(),
            author_is_bot: false,
            text: text.to_string(),
            attachments: vec![],
        }
    }

    fn zh_translator(pairs: &[(&str, &str)]) -> Translator {
        Translator::new(Box::new(ScriptedBackend::answering(pairs)), "auto", "zh-CN")
    }

    #[tokio::test]
    async fn test_forwards_plain_text() {
        let h = harness("111:222", None);
        let outcome = h.forwarder.forward(event(Platform::Discord, "111", "hello")).await;

        assert_eq!(
            outcome,
            ForwardOutcome::Delivered {
                text_sent: true,
                attachments_sent: 0,
                attachments_failed: 0,
                translated: TranslationStatus::NotAttempted,
            }
        );
        assert_eq!(
            h.kook.texts(),
            vec![("222".to_string(), "[Discord] hello".to_string())]
        );
        assert!(h.discord.texts().is_empty());
    }

    #[tokio::test]
    async fn test_forwards_translated_text() {
        let h = harness("111:222", Some(zh_translator(&[("hello", "你好")])));
        h.forwarder.forward(event(Platform::Discord, "111", "hello")).await;

        assert_eq!(
            h.kook.texts(),
            vec![("222".to_string(), "[Discord] hello\n🔤 你好".to_string())]
        );
    }

    #[tokio::test]
    async fn test_translation_failure_flags_untranslated() {
        let translator = Translator::new(Box::new(ScriptedBackend::failing()), "auto", "zh-CN");
        let h = harness("111:222", Some(translator));
        let outcome = h.forwarder.forward(event(Platform::Discord, "111", "hello")).await;

        assert!(matches!(
            outcome,
            ForwardOutcome::Delivered {
                translated: TranslationStatus::Failed,
                text_sent: true,
                ..
            }
        ));
        assert_eq!(
            h.kook.texts(),
            vec![("222".to_string(), "[Discord] hello\n[untranslated]".to_string())]
        );
    }

    #[tokio::test]
    async fn test_kook_origin_uses_kook_prefix() {
        let h = harness("333:444", None);
        h.forwarder.forward(event(Platform::Kook, "333", "hi there")).await;
        assert_eq!(
            h.discord.texts(),
            vec![("444".to_string(), "[KOOK] hi there".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unmapped_channel_sends_nothing() {
        let h = harness("111:222", None);
        let outcome = h.forwarder.forward(event(Platform::Discord, "999", "hello")).await;
        assert_eq!(outcome, ForwardOutcome::Dropped(DropReason::NoRule));
        assert!(h.kook.texts().is_empty());
        assert!(h.discord.texts().is_empty());
    }

    #[tokio::test]
    async fn test_bot_messages_follow_setting() {
        let h = harness("111:222", None);
        let mut bot_event = event(Platform::Discord, "111", "beep");
        bot_event.author_is_bot = true;
        assert_eq!(
            h.forwarder.forward(bot_event.clone()).await,
            ForwardOutcome::Dropped(DropReason::BotMessage)
        );
        assert!(h.kook.texts().is_empty());

        let mut h = harness("111:222", None);
        h.forwarder.settings.forward_bot_messages = true;
        h.forwarder.forward(bot_event).await;
        assert_eq!(h.kook.texts().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_destination_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let forwarder = Forwarder::new(
            ForwardRuleTable::parse("111:222"),
            settings(),
            None,
            MediaTransfer::with_client(dir.path(), reqwest::Client::new()),
        )
        .with_adapter(Arc::new(RecordingAdapter::new(Platform::Discord)));

        let outcome = forwarder.forward(event(Platform::Discord, "111", "hello")).await;
        assert_eq!(outcome, ForwardOutcome::Dropped(DropReason::NoDestinationAdapter));
    }

    #[tokio::test]
    async fn test_empty_event_dropped() {
        let h = harness("111:222", None);
        let outcome = h.forwarder.forward(event(Platform::Discord, "111", "   ")).await;
        assert_eq!(outcome, ForwardOutcome::Dropped(DropReason::Empty));
    }

    #[tokio::test]
    async fn test_partial_media_failure_keeps_text_and_survivor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.mp4"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let h = harness("111:222", None);
        let mut ev = event(Platform::Discord, "111", "look");
        ev.attachments = vec![
            AttachmentRef {
                url: format!("{}/ok.png", server.uri()),
                kind: AttachmentKind::Image,
                filename: "ok.png".to_string(),
            },
            AttachmentRef {
                url: format!("{}/broken.mp4", server.uri()),
                kind: AttachmentKind::Video,
                filename: "broken.mp4".to_string(),
            },
        ];

        let outcome = h.forwarder.forward(ev).await;
        assert_eq!(
            outcome,
            ForwardOutcome::Delivered {
                text_sent: true,
                attachments_sent: 1,
                attachments_failed: 1,
                translated: TranslationStatus::NotAttempted,
            }
        );

        let uploads = h.kook.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].filename, "ok.png");
        assert_eq!(uploads[0].channel_id, "222");
        assert_eq!(
            h.kook.texts(),
            vec![
                ("222".to_string(), "[Discord] look".to_string()),
                (
                    "222".to_string(),
                    "[Discord] attachment not forwarded: broken.mp4".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_attachment_only_event_uses_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
            .mount(&server)
            .await;

        let h = harness("111:222", Some(zh_translator(&[])));
        let mut ev = event(Platform::Discord, "111", "");
        ev.attachments = vec![AttachmentRef {
            url: format!("{}/cat.png", server.uri()),
            kind: AttachmentKind::Image,
            filename: "cat.png".to_string(),
        }];

        h.forwarder.forward(ev).await;
        assert_eq!(
            h.kook.texts(),
            vec![("222".to_string(), "[Discord] [attachment]".to_string())]
        );
        assert_eq!(h.kook.uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_text_send_failure_does_not_block_attachments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
            .mount(&server)
            .await;

        let mut kook = RecordingAdapter::new(Platform::Kook);
        kook.fail_text = true;
        let h = harness_with("111:222", None, kook);
        let mut ev = event(Platform::Discord, "111", "hello");
        ev.attachments = vec![AttachmentRef {
            url: format!("{}/cat.png", server.uri()),
            kind: AttachmentKind::Image,
            filename: "cat.png".to_string(),
        }];

        let outcome = h.forwarder.forward(ev).await;
        assert!(matches!(
            outcome,
            ForwardOutcome::Delivered {
                text_sent: false,
                attachments_sent: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_dispatch_forwards_every_event() {
        let h = harness("111:222", None);
        let kook = h.kook.clone();
        let forwarder = Arc::new(h.forwarder);

        let (tx, rx) = mpsc::channel(8);
        let dispatcher = tokio::spawn(forwarder.dispatch(rx));
        tx.send(event(Platform::Discord, "111", "one")).await.unwrap();
        tx.send(event(Platform::Discord, "111", "two")).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        // Forward tasks are detached; give them a moment to finish.
        for _ in 0..50 {
            if kook.texts().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let mut texts: Vec<String> = kook.texts().into_iter().map(|(_, t)| t).collect();
        texts.sort();
        assert_eq!(texts, vec!["[Discord] one", "[Discord] two"]);
    }
}
