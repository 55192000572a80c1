use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sign::{hmac_sha256, sha256_hex};
use super::{decode_response, BackendKind, Translated, TranslationBackend};
use crate::error::TranslationError;

const TENCENT_HOST: &str = "tmt.tencentcloudapi.com";
const TENCENT_SERVICE: &str = "tmt";
const TENCENT_ACTION: &str = "TextTranslate";
const TENCENT_VERSION: &str = "2018-03-21";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Tencent Cloud Machine Translation, signed with TC3-HMAC-SHA256.
pub struct TencentBackend {
    client: reqwest::Client,
    base_url: String,
    secret_id: String,
    secret_key: String,
    region: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TranslateRequest<'a> {
    source_text: &'a str,
    source: &'a str,
    target: &'a str,
    project_id: i64,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: ResponseBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResponseBody {
    #[serde(default)]
    target_text: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    code: String,
    message: String,
}

fn map_lang(code: &str) -> &str {
    match code {
        "zh-CN" | "zh-Hans" => "zh",
        "zh-Hant" => "zh-TW",
        other => other,
    }
}

/// Build the `Authorization` header value for a TextTranslate call.
pub fn authorization(
    secret_id: &str,
    secret_key: &str,
    now: DateTime<Utc>,
    payload: &str,
) -> Result<String, String> {
    let timestamp = now.timestamp();
    let date = now.format("%Y-%m-%d").to_string();
    let signed_headers = "content-type;host;x-tc-action";

    let canonical_request = format!(
        "POST\n/\n\ncontent-type:{}\nhost:{}\nx-tc-action:{}\n\n{}\n{}",
        CONTENT_TYPE,
        TENCENT_HOST,
        TENCENT_ACTION.to_lowercase(),
        signed_headers,
        sha256_hex(payload.as_bytes())
    );

    let scope = format!("{}/{}/tc3_request", date, TENCENT_SERVICE);
    let string_to_sign = format!(
        "TC3-HMAC-SHA256\n{}\n{}\n{}",
        timestamp,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let secret_date = hmac_sha256(format!("TC3{}", secret_key).as_bytes(), date.as_bytes())?;
    let secret_service = hmac_sha256(&secret_date, TENCENT_SERVICE.as_bytes())?;
    let secret_signing = hmac_sha256(&secret_service, b"tc3_request")?;
    let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes())?);

    Ok(format!(
        "TC3-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        secret_id, scope, signed_headers, signature
    ))
}

impl TencentBackend {
    pub fn new(
        client: reqwest::Client,
        secret_id: String,
        secret_key: String,
        region: String,
    ) -> Self {
        Self {
            client,
            base_url: format!("https://{}", TENCENT_HOST),
            secret_id,
            secret_key,
            region,
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TranslationBackend for TencentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tencent
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translated, TranslationError> {
        let payload = serde_json::to_string(&TranslateRequest {
            source_text: text,
            source: map_lang(source_lang),
            target: map_lang(target_lang),
            project_id: 0,
        })
        .map_err(|e| TranslationError::new(self.kind(), e.to_string()))?;

        let now = Utc::now();
        let auth = authorization(&self.secret_id, &self.secret_key, now, &payload)
            .map_err(|e| TranslationError::new(self.kind(), e))?;

        let envelope: Envelope = decode_response(
            self.kind(),
            self.client
                .post(format!("{}/", self.base_url))
                .header("Authorization", auth)
                .header("Content-Type", CONTENT_TYPE)
                .header("X-TC-Action", TENCENT_ACTION)
                .header("X-TC-Timestamp", now.timestamp().to_string())
                .header("X-TC-Version", TENCENT_VERSION)
                .header("X-TC-Region", &self.region)
                .body(payload)
                .send()
                .await,
        )
        .await?;

        let body = envelope.response;
        if let Some(err) = body.error {
            return Err(TranslationError::new(
                self.kind(),
                format!("{}: {}", err.code, err.message),
            ));
        }

        let text = body
            .target_text
            .ok_or_else(|| TranslationError::new(self.kind(), "missing TargetText"))?;
        Ok(Translated {
            text,
            detected_source: body.source,
        })
    }
}
