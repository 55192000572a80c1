use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{decode_response, BackendKind, Translated, TranslationBackend};
use crate::error::TranslationError;

const GOOGLE_API_BASE: &str = "https://translation.googleapis.com";

/// Google Cloud Translation (v2, API key auth).
pub struct GoogleBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    data: ResponseData,
}

#[derive(Deserialize)]
struct ResponseData {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
    #[serde(default)]
    detected_source_language: Option<String>,
}

impl GoogleBackend {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self {
            client,
            base_url: GOOGLE_API_BASE.to_string(),
            api_key,
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TranslationBackend for GoogleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Google
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translated, TranslationError> {
        let request = TranslateRequest {
            q: text,
            target: target_lang,
            format: "text",
            source: (source_lang != "auto").then_some(source_lang),
        };

        let response: TranslateResponse = decode_response(
            self.kind(),
            self.client
                .post(format!("{}/language/translate/v2", self.base_url))
                .query(&[("key", self.api_key.as_str())])
                .json(&request)
                .send()
                .await,
        )
        .await?;

        let first = response
            .data
            .translations
            .into_iter()
            .next()
            .ok_or_else(|| TranslationError::new(self.kind(), "empty translations list"))?;

        Ok(Translated {
            text: first.translated_text,
            detected_source: first.detected_source_language,
        })
    }
}
