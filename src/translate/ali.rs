use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

use super::sign::{hmac_sha1, percent_encode};
use super::{decode_response, BackendKind, Translated, TranslationBackend};
use crate::error::TranslationError;

const ALI_VERSION: &str = "2018-10-12";

/// Alibaba Cloud Machine Translation (`TranslateGeneral`, RPC-style HMAC-SHA1 signing).
pub struct AliBackend {
    client: reqwest::Client,
    base_url: String,
    access_key_id: String,
    access_key_secret: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TranslateResponse {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<ResponseData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResponseData {
    translated: String,
}

fn map_lang(code: &str) -> &str {
    match code {
        "zh-CN" | "zh-Hans" => "zh",
        "zh-TW" | "zh-Hant" => "zh-tw",
        other => other,
    }
}

/// Sorted, RFC 3986 encoded `k=v&k=v`.
pub fn canonical_query(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Base64 HMAC-SHA1 over `GET&%2F&<encoded canonical query>`, keyed with `secret&`.
pub fn signature(secret: &str, canonical: &str) -> Result<String, String> {
    let string_to_sign = format!("GET&{}&{}", percent_encode("/"), percent_encode(canonical));
    let mac = hmac_sha1(format!("{}&", secret).as_bytes(), string_to_sign.as_bytes())?;
    Ok(base64::engine::general_purpose::STANDARD.encode(mac))
}

fn is_success(code: &Option<Value>) -> bool {
    match code {
        None => true,
        Some(Value::String(s)) => s == "200",
        Some(Value::Number(n)) => n.as_u64() == Some(200),
        Some(_) => false,
    }
}

impl AliBackend {
    pub fn new(
        client: reqwest::Client,
        access_key_id: String,
        access_key_secret: String,
        region: &str,
    ) -> Self {
        Self {
            client,
            base_url: format!("https://mt.{}.aliyuncs.com", region),
            access_key_id,
            access_key_secret,
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TranslationBackend for AliBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ali
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translated, TranslationError> {
        let mut params: BTreeMap<&str, String> = BTreeMap::new();
        params.insert("Action", "TranslateGeneral".to_string());
        params.insert("Version", ALI_VERSION.to_string());
        params.insert("Format", "JSON".to_string());
        params.insert("FormatType", "text".to_string());
        params.insert("Scene", "general".to_string());
        params.insert("SourceLanguage", map_lang(source_lang).to_string());
        params.insert("TargetLanguage", map_lang(target_lang).to_string());
        params.insert("SourceText", text.to_string());
        params.insert("AccessKeyId", self.access_key_id.clone());
        params.insert("SignatureMethod", "HMAC-SHA1".to_string());
        params.insert("SignatureVersion", "1.0".to_string());
        params.insert("SignatureNonce", uuid::Uuid::new_v4().to_string());
        params.insert(
            "Timestamp",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );

        let canonical = canonical_query(&params);
        let sig = signature(&self.access_key_secret, &canonical)
            .map_err(|e| TranslationError::new(self.kind(), e))?;
        let url = format!(
            "{}/?{}&Signature={}",
            self.base_url,
            canonical,
            percent_encode(&sig)
        );

        let response: TranslateResponse =
            decode_response(self.kind(), self.client.get(&url).send().await).await?;

        if !is_success(&response.code) {
            return Err(TranslationError::new(
                self.kind(),
                format!(
                    "code {}: {}",
                    response.code.map(|c| c.to_string()).unwrap_or_default(),
                    response.message.unwrap_or_default()
                ),
            ));
        }

        let data = response
            .data
            .ok_or_else(|| TranslationError::new(self.kind(), "missing Data"))?;
        Ok(Translated {
            text: data.translated,
            detected_source: None,
        })
    }
}
