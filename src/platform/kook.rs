use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::error::AdapterSendError;
use crate::platform::{
    extension_of, split_message, AttachmentKind, AttachmentRef, ChatAdapter,
    DestinationAttachmentHandle, InboundMessageEvent, LocalMedia, Platform,
};

const KOOK_API_BASE: &str = "https://www.kookapp.cn/api/v3";
const KOOK_MESSAGE_LIMIT: usize = 4000;
const KOOK_UPLOAD_LIMIT: u64 = 20 * 1024 * 1024;
const KOOK_UNSUPPORTED_EXTENSIONS: &[&str] = &["svg", "webp", "tiff", "tif", "psd"];

const PING_INTERVAL: Duration = Duration::from_secs(30);
const HELLO_TIMEOUT: Duration = Duration::from_secs(6);
const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_MAX_SECS: u64 = 60;
const SN_WINDOW: usize = 256;

// Gateway signals
const SIGNAL_EVENT: u8 = 0;
const SIGNAL_HELLO: u8 = 1;
const SIGNAL_PING: u8 = 2;
const SIGNAL_PONG: u8 = 3;
const SIGNAL_RECONNECT: u8 = 5;
const SIGNAL_RESUME_ACK: u8 = 6;

// Message types
const TYPE_TEXT: u8 = 1;
const TYPE_IMAGE: u8 = 2;
const TYPE_VIDEO: u8 = 3;
const TYPE_FILE: u8 = 4;
const TYPE_KMARKDOWN: u8 = 9;
const TYPE_SYSTEM: u8 = 255;

/// Exponential reconnect delay in seconds, capped at `max_delay_secs`.
fn exponential_backoff_delay(attempt: u32, base_delay_secs: u64, max_delay_secs: u64) -> u64 {
    let delay = (base_delay_secs as f64 * 2.0_f64.powi(attempt.min(16) as i32)) as u64;
    delay.min(max_delay_secs)
}

#[derive(Debug, Error)]
#[error("{reason}")]
struct KookError {
    unauthorized: bool,
    reason: String,
}

impl KookError {
    fn transient(reason: impl Into<String>) -> Self {
        Self {
            unauthorized: false,
            reason: reason.into(),
        }
    }

    fn unauthorized(reason: impl Into<String>) -> Self {
        Self {
            unauthorized: true,
            reason: reason.into(),
        }
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct CurrentUser {
    id: String,
}

#[derive(Deserialize)]
struct GatewayInfo {
    url: String,
}

#[derive(Deserialize)]
struct AssetInfo {
    url: String,
}

#[derive(Deserialize)]
struct CreatedMessage {
    msg_id: String,
}

#[derive(Serialize)]
struct CreateMessageRequest<'a> {
    #[serde(rename = "type")]
    kind: u8,
    target_id: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct Frame {
    s: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    sn: Option<u64>,
}

#[derive(Deserialize)]
struct KookEvent {
    channel_type: String,
    #[serde(rename = "type")]
    kind: u8,
    target_id: String,
    author_id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    extra: KookExtra,
}

#[derive(Deserialize, Default)]
struct KookExtra {
    #[serde(default)]
    author: Option<KookAuthor>,
    #[serde(default)]
    attachments: Option<KookAttachment>,
    #[serde(default)]
    kmarkdown: Option<KookKmarkdown>,
}

#[derive(Deserialize)]
struct KookAuthor {
    #[serde(default)]
    bot: bool,
}

#[derive(Deserialize)]
struct KookAttachment {
    url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
}

#[derive(Deserialize)]
struct KookKmarkdown {
    raw_content: String,
}

/// Turn the `d` payload of a gateway event into an inbound message.
///
/// Returns `None` for anything the relay does not forward: system events,
/// non-channel messages, our own messages and unknown message types.
pub fn parse_kook_event(d: &Value, self_id: &str) -> Option<InboundMessageEvent> {
    let event: KookEvent = serde_json::from_value(d.clone()).ok()?;
    if event.kind == TYPE_SYSTEM || event.channel_type != "GROUP" {
        return None;
    }
    if event.author_id == self_id {
        return None;
    }

    let (text, attachments) = match event.kind {
        TYPE_TEXT => (event.content, vec![]),
        TYPE_KMARKDOWN => {
            let text = event
                .extra
                .kmarkdown
                .map(|k| k.raw_content)
                .unwrap_or(event.content);
            (text, vec![])
        }
        TYPE_IMAGE | TYPE_VIDEO | TYPE_FILE => {
            let attachment = match event.extra.attachments {
                Some(a) => a,
                None => KookAttachment {
                    url: event.content.clone(),
                    name: None,
                    file_type: None,
                },
            };
            let filename = attachment
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| filename_from_url(&attachment.url));
            let kind = match event.kind {
                TYPE_IMAGE => AttachmentKind::Image,
                TYPE_VIDEO => AttachmentKind::Video,
                _ => AttachmentKind::classify(&filename, attachment.file_type.as_deref()),
            };
            (
                String::new(),
                vec![AttachmentRef {
                    url: attachment.url,
                    kind,
                    filename,
                }],
            )
        }
        _ => return None,
    };

    Some(InboundMessageEvent {
        platform: Platform::Kook,
        channel_id: event.target_id,
        author_id: event.author_id,
        author_is_bot: event.extra.author.map(|a| a.bot).unwrap_or(false),
        text,
        attachments,
    })
}

fn filename_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("attachment")
        .to_string()
}

fn message_type_for(kind: AttachmentKind) -> u8 {
    match kind {
        AttachmentKind::Image => TYPE_IMAGE,
        AttachmentKind::Video => TYPE_VIDEO,
        AttachmentKind::Other => TYPE_FILE,
    }
}

/// How a gateway session ended without an error.
enum SessionEnd {
    /// Server sent `s=5`; start over with a fresh gateway URL.
    Reconnect,
    /// Socket closed or stopped answering pings.
    Disconnected,
    /// Nobody is consuming events anymore.
    ReceiverGone,
}

/// Serial numbers of the events delivered in one gateway session.
///
/// The gateway may resend or reorder events. An sn still in the window is a
/// duplicate. An unseen sn below the highest one is late and still delivered.
#[derive(Default)]
struct SnWindow {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
    highest: u64,
}

impl SnWindow {
    /// Record `sn` and report whether its event should be delivered.
    fn accept(&mut self, sn: u64) -> bool {
        // No sn, nothing to dedupe against.
        if sn == 0 {
            return true;
        }
        if !self.seen.insert(sn) {
            debug!("Skipping duplicate KOOK event sn={}", sn);
            return false;
        }
        self.order.push_back(sn);
        if self.order.len() > SN_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        if sn < self.highest {
            debug!(
                "Late KOOK event sn={} ({} behind sn={})",
                sn,
                self.highest - sn,
                self.highest
            );
        } else {
            if self.highest != 0 && sn > self.highest.saturating_add(1) {
                debug!(
                    "KOOK event gap: {} sn(s) missing before sn={}",
                    sn - self.highest - 1,
                    sn
                );
            }
            self.highest = sn;
        }
        true
    }

    fn highest(&self) -> u64 {
        self.highest
    }
}

pub struct KookAdapter {
    token: String,
    client: reqwest::Client,
    api_base: String,
}

impl KookAdapter {
    pub fn new(token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            token,
            client,
            api_base: KOOK_API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.api_base, route)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, KookError> {
        let response = request
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await
            .map_err(|e| KookError::transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(KookError::unauthorized(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KookError::transient(format!("HTTP {}: {}", status, body)));
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| KookError::transient(format!("invalid response: {}", e)))?;
        if body.code == 401 {
            return Err(KookError::unauthorized(body.message));
        }
        if body.code != 0 {
            return Err(KookError::transient(format!(
                "code {}: {}",
                body.code, body.message
            )));
        }

        serde_json::from_value(body.data)
            .map_err(|e| KookError::transient(format!("unexpected data: {}", e)))
    }

    async fn current_user_id(&self) -> Result<String, KookError> {
        let user: CurrentUser = self.call(self.client.get(self.url("user/me"))).await?;
        Ok(user.id)
    }

    async fn gateway_url(&self) -> Result<String, KookError> {
        let gateway: GatewayInfo = self
            .call(
                self.client
                    .get(self.url("gateway/index"))
                    .query(&[("compress", "0")]),
            )
            .await?;
        Ok(gateway.url)
    }

    async fn create_message(
        &self,
        channel_id: &str,
        kind: u8,
        content: &str,
    ) -> Result<String, KookError> {
        let created: CreatedMessage = self
            .call(
                self.client
                    .post(self.url("message/create"))
                    .json(&CreateMessageRequest {
                        kind,
                        target_id: channel_id,
                        content,
                    }),
            )
            .await?;
        Ok(created.msg_id)
    }

    async fn upload_asset(&self, media: &LocalMedia) -> Result<String, KookError> {
        let data = tokio::fs::read(&media.path)
            .await
            .map_err(|e| KookError::transient(format!("cannot read {}: {}", media.path.display(), e)))?;
        let part = reqwest::multipart::Part::bytes(data).file_name(media.filename.clone());
        let form = reqwest::multipart::Form::new().part("file", part);

        let asset: AssetInfo = self
            .call(self.client.post(self.url("asset/create")).multipart(form))
            .await?;
        Ok(asset.url)
    }

    /// One gateway session, from fetching the URL to the socket closing.
    async fn session(
        &self,
        events: &mpsc::Sender<InboundMessageEvent>,
        attempt: &mut u32,
    ) -> Result<SessionEnd, KookError> {
        let self_id = self.current_user_id().await?;
        let url = self.gateway_url().await?;

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| KookError::transient(format!("websocket connect failed: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        let hello = tokio::time::timeout(HELLO_TIMEOUT, read.next())
            .await
            .map_err(|_| KookError::transient("no hello from gateway"))?;
        match hello {
            Some(Ok(WsMessage::Text(text))) => {
                let frame: Frame = serde_json::from_str(&text)
                    .map_err(|e| KookError::transient(format!("bad hello frame: {}", e)))?;
                if frame.s != SIGNAL_HELLO {
                    return Err(KookError::transient(format!(
                        "expected hello, got signal {}",
                        frame.s
                    )));
                }
                let code = frame.d.get("code").and_then(Value::as_i64).unwrap_or(0);
                match code {
                    0 => {}
                    40101 | 40102 => {
                        return Err(KookError::unauthorized(format!(
                            "gateway rejected token (code {})",
                            code
                        )))
                    }
                    _ => {
                        return Err(KookError::transient(format!(
                            "gateway hello failed (code {})",
                            code
                        )))
                    }
                }
            }
            Some(Ok(other)) => {
                return Err(KookError::transient(format!(
                    "unexpected first frame: {:?}",
                    other
                )))
            }
            Some(Err(e)) => return Err(KookError::transient(e.to_string())),
            None => return Ok(SessionEnd::Disconnected),
        }

        info!("Connected to KOOK gateway as {}", self_id);
        *attempt = 0;

        let mut window = SnWindow::default();
        let mut awaiting_pong = false;
        let mut ping = tokio::time::interval(PING_INTERVAL);
        // The first tick completes immediately.
        ping.tick().await;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    if awaiting_pong {
                        warn!("KOOK gateway missed a pong, reconnecting");
                        return Ok(SessionEnd::Disconnected);
                    }
                    let frame = json!({"s": SIGNAL_PING, "sn": window.highest()});
                    if let Err(e) = write.send(WsMessage::Text(frame.to_string().into())).await {
                        return Err(KookError::transient(format!("ping failed: {}", e)));
                    }
                    awaiting_pong = true;
                }
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Ping(data))) => {
                            if let Err(e) = write.send(WsMessage::Pong(data)).await {
                                return Err(KookError::transient(format!("pong failed: {}", e)));
                            }
                            continue;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return Ok(SessionEnd::Disconnected),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(KookError::transient(e.to_string())),
                    };

                    let frame: Frame = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!("Ignoring unparseable KOOK frame: {}", e);
                            continue;
                        }
                    };

                    match frame.s {
                        SIGNAL_EVENT => {
                            if !window.accept(frame.sn.unwrap_or(0)) {
                                continue;
                            }

                            if let Some(event) = parse_kook_event(&frame.d, &self_id) {
                                debug!(
                                    "KOOK message in {} from {} ({} attachment(s))",
                                    event.channel_id,
                                    event.author_id,
                                    event.attachments.len()
                                );
                                if events.send(event).await.is_err() {
                                    return Ok(SessionEnd::ReceiverGone);
                                }
                            }
                        }
                        SIGNAL_PONG => awaiting_pong = false,
                        SIGNAL_RECONNECT => return Ok(SessionEnd::Reconnect),
                        SIGNAL_RESUME_ACK => debug!("KOOK session resumed"),
                        other => debug!("Ignoring KOOK signal {}", other),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ChatAdapter for KookAdapter {
    fn platform(&self) -> Platform {
        Platform::Kook
    }

    async fn listen(&self, events: mpsc::Sender<InboundMessageEvent>) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.session(&events, &mut attempt).await {
                Ok(SessionEnd::ReceiverGone) => return Ok(()),
                Ok(SessionEnd::Reconnect) => {
                    info!("KOOK gateway requested a reconnect");
                    continue;
                }
                Ok(SessionEnd::Disconnected) => warn!("KOOK gateway connection closed"),
                Err(e) if e.unauthorized => {
                    error!("KOOK authentication failed: {}", e);
                    return Err(anyhow!("KOOK authentication failed: {}", e));
                }
                Err(e) => warn!("KOOK gateway error: {}", e),
            }

            let delay = exponential_backoff_delay(attempt, BACKOFF_BASE_SECS, BACKOFF_MAX_SECS);
            attempt = attempt.saturating_add(1);
            info!("Reconnecting to KOOK in {}s (attempt {})", delay, attempt);
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
    }

    async fn send_text(&self, channel_id: &str, text: &str) -> Result<(), AdapterSendError> {
        for chunk in split_message(text, KOOK_MESSAGE_LIMIT) {
            self.create_message(channel_id, TYPE_TEXT, &chunk)
                .await
                .map_err(|e| AdapterSendError::new(Platform::Kook, channel_id, e.reason))?;
        }
        Ok(())
    }

    async fn send_attachment(
        &self,
        channel_id: &str,
        media: &LocalMedia,
    ) -> Result<DestinationAttachmentHandle, AdapterSendError> {
        let ext = extension_of(&media.filename);
        if KOOK_UNSUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(AdapterSendError::new(
                Platform::Kook,
                channel_id,
                format!("KOOK does not accept .{} files", ext),
            ));
        }
        if media.size > KOOK_UPLOAD_LIMIT {
            return Err(AdapterSendError::new(
                Platform::Kook,
                channel_id,
                format!(
                    "{} is {} bytes, over the 20 MiB upload limit",
                    media.filename, media.size
                ),
            ));
        }

        let send_err = |e: KookError| AdapterSendError::new(Platform::Kook, channel_id, e.reason);
        let asset_url = self.upload_asset(media).await.map_err(send_err)?;
        self.create_message(channel_id, message_type_for(media.kind), &asset_url)
            .await
            .map_err(send_err)?;

        Ok(DestinationAttachmentHandle {
            platform: Platform::Kook,
            channel_id: channel_id.to_string(),
            reference: asset_url,
        })
    }
}
