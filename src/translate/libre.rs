use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{decode_response, BackendKind, Translated, TranslationBackend};
use crate::error::TranslationError;

/// LibreTranslate, self-hosted or public. `api_url` is the full `/translate` endpoint.
pub struct LibreBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    #[serde(default)]
    translated_text: Option<String>,
    #[serde(default)]
    detected_language: Option<DetectedLanguage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct DetectedLanguage {
    language: String,
}

fn map_lang(code: &str) -> &str {
    match code {
        "zh-CN" | "zh-Hans" => "zh",
        "zh-TW" | "zh-Hant" => "zt",
        other => other,
    }
}

impl LibreBackend {
    pub fn new(client: reqwest::Client, api_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url,
            api_key,
        }
    }
}

#[async_trait]
impl TranslationBackend for LibreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Libre
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translated, TranslationError> {
        let request = TranslateRequest {
            q: text,
            source: map_lang(source_lang),
            target: map_lang(target_lang),
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        let response: TranslateResponse = decode_response(
            self.kind(),
            self.client.post(&self.api_url).json(&request).send().await,
        )
        .await?;

        if let Some(error) = response.error {
            return Err(TranslationError::new(self.kind(), error));
        }

        Ok(Translated {
            text: response
                .translated_text
                .ok_or_else(|| TranslationError::new(self.kind(), "missing translatedText"))?,
            detected_source: response.detected_language.map(|d| d.language),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_translate_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/translate"))
            .and(body_json(json!({
                "q": "hello",
                "source": "auto",
                "target": "zh",
                "format": "text",
                "api_key": "k"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "translatedText": "你好",
                "detectedLanguage": {"confidence": 90.0, "language": "en"}
            })))
            .mount(&server)
            .await;

        let backend = LibreBackend::new(
            reqwest::Client::new(),
            format!("{}/translate", server.uri()),
            Some("k".into()),
        );
        let out = backend.translate("hello", "auto", "zh-CN").await.unwrap();
        assert_eq!(out.text, "你好");
        assert_eq!(out.detected_source.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({"error": "Too many requests"})),
            )
            .mount(&server)
            .await;

        let backend = LibreBackend::new(
            reqwest::Client::new(),
            format!("{}/translate", server.uri()),
            None,
        );
        let err = backend.translate("hello", "auto", "zh-CN").await.unwrap_err();
        assert!(err.reason.contains("429"));
    }
}
