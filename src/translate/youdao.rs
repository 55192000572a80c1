use async_trait::async_trait;
use serde::Deserialize;

use super::sign::sha256_hex;
use super::{decode_response, BackendKind, Translated, TranslationBackend};
use crate::error::TranslationError;

const YOUDAO_API_BASE: &str = "https://openapi.youdao.com";

/// Youdao text translation (v3 sha256 signature).
pub struct YoudaoBackend {
    client: reqwest::Client,
    base_url: String,
    app_key: String,
    app_secret: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    error_code: String,
    #[serde(default)]
    translation: Vec<String>,
    /// Direction like `en2zh-CHS`.
    #[serde(default)]
    l: Option<String>,
}

fn map_lang(code: &str) -> &str {
    match code {
        "zh-CN" | "zh-Hans" => "zh-CHS",
        "zh-TW" | "zh-Hant" => "zh-CHT",
        other => other,
    }
}

/// Signing input: texts over 20 chars are shortened to
/// first 10 + char count + last 10.
pub fn truncate_input(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len <= 20 {
        return text.to_string();
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[len - 10..].iter().collect();
    format!("{}{}{}", head, len, tail)
}

/// `sha256(appKey + input + salt + curtime + appSecret)`
pub fn sign(app_key: &str, text: &str, salt: &str, curtime: &str, app_secret: &str) -> String {
    sha256_hex(
        format!(
            "{}{}{}{}{}",
            app_key,
            truncate_input(text),
            salt,
            curtime,
            app_secret
        )
        .as_bytes(),
    )
}

impl YoudaoBackend {
    pub fn new(client: reqwest::Client, app_key: String, app_secret: String) -> Self {
        Self {
            client,
            base_url: YOUDAO_API_BASE.to_string(),
            app_key,
            app_secret,
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TranslationBackend for YoudaoBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Youdao
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translated, TranslationError> {
        let salt = uuid::Uuid::new_v4().to_string();
        let curtime = chrono::Utc::now().timestamp().to_string();
        let signature = sign(&self.app_key, text, &salt, &curtime, &self.app_secret);

        let response: TranslateResponse = decode_response(
            self.kind(),
            self.client
                .post(format!("{}/api", self.base_url))
                .form(&[
                    ("q", text),
                    ("from", map_lang(source_lang)),
                    ("to", map_lang(target_lang)),
                    ("appKey", self.app_key.as_str()),
                    ("salt", salt.as_str()),
                    ("sign", signature.as_str()),
                    ("signType", "v3"),
                    ("curtime", curtime.as_str()),
                ])
                .send()
                .await,
        )
        .await?;

        if response.error_code != "0" {
            return Err(TranslationError::new(
                self.kind(),
                format!("errorCode {}", response.error_code),
            ));
        }

        let text = response
            .translation
            .into_iter()
            .next()
            .ok_or_else(|| TranslationError::new(self.kind(), "empty translation list"))?;

        Ok(Translated {
            text,
            detected_source: response
                .l
                .and_then(|l| l.split_once('2').map(|(from, _)| from.to_string())),
        })
    }
}
