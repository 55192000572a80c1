use async_trait::async_trait;
use serde::Deserialize;

use super::sign::md5_hex;
use super::{decode_response, BackendKind, Translated, TranslationBackend};
use crate::error::TranslationError;

const BAIDU_API_BASE: &str = "https://fanyi-api.baidu.com";

/// Baidu general text translation (app id + md5 signed request).
pub struct BaiduBackend {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
    app_key: String,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    trans_result: Vec<TransResult>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_msg: Option<String>,
}

#[derive(Deserialize)]
struct TransResult {
    dst: String,
}

/// Baidu uses its own codes for a handful of languages.
fn map_lang(code: &str) -> &str {
    match code {
        "zh-CN" | "zh-Hans" => "zh",
        "zh-TW" | "zh-Hant" => "cht",
        "ja" => "jp",
        "ko" => "kor",
        "fr" => "fra",
        "es" => "spa",
        other => other,
    }
}

/// `md5(appid + q + salt + key)`
pub fn sign(app_id: &str, text: &str, salt: &str, app_key: &str) -> String {
    md5_hex(format!("{}{}{}{}", app_id, text, salt, app_key).as_bytes())
}

impl BaiduBackend {
    pub fn new(client: reqwest::Client, app_id: String, app_key: String) -> Self {
        Self {
            client,
            base_url: BAIDU_API_BASE.to_string(),
            app_id,
            app_key,
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TranslationBackend for BaiduBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Baidu
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translated, TranslationError> {
        let salt = fastrand::u32(32768..65536).to_string();
        let signature = sign(&self.app_id, text, &salt, &self.app_key);

        let response: TranslateResponse = decode_response(
            self.kind(),
            self.client
                .get(format!("{}/api/trans/vip/translate", self.base_url))
                .query(&[
                    ("q", text),
                    ("from", map_lang(source_lang)),
                    ("to", map_lang(target_lang)),
                    ("appid", self.app_id.as_str()),
                    ("salt", salt.as_str()),
                    ("sign", signature.as_str()),
                ])
                .send()
                .await,
        )
        .await?;

        if let Some(code) = response.error_code.filter(|c| c != "52000") {
            return Err(TranslationError::new(
                self.kind(),
                format!(
                    "error {}: {}",
                    code,
                    response.error_msg.unwrap_or_default()
                ),
            ));
        }
        if response.trans_result.is_empty() {
            return Err(TranslationError::new(self.kind(), "empty trans_result"));
        }

        // One entry per input line.
        let text = response
            .trans_result
            .into_iter()
            .map(|r| r.dst)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Translated {
            text,
            detected_source: response.from,
        })
    }
}
