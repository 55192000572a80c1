use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{decode_response, BackendKind, Translated, TranslationBackend};
use crate::error::TranslationError;

const DEEPL_FREE_API_BASE: &str = "https://api-free.deepl.com";
const DEEPL_PRO_API_BASE: &str = "https://api.deepl.com";

/// DeepL API v2. Free-plan keys (suffix `:fx`) go to the free endpoint.
pub struct DeepLBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: [&'a str; 1],
    target_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_lang: Option<String>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
    #[serde(default)]
    detected_source_language: Option<String>,
}

/// Target codes are upper case and keep some regional variants.
fn target_code(code: &str) -> String {
    match code {
        "zh-CN" | "zh-Hans" | "zh" => "ZH-HANS".to_string(),
        "zh-TW" | "zh-Hant" => "ZH-HANT".to_string(),
        "en" => "EN-US".to_string(),
        "pt" => "PT-PT".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

/// Source codes are the bare language; `auto` means let DeepL detect.
fn source_code(code: &str) -> Option<String> {
    if code == "auto" {
        return None;
    }
    let primary = code.split('-').next().unwrap_or(code);
    Some(primary.to_ascii_uppercase())
}

impl DeepLBackend {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        let base_url = if api_key.ends_with(":fx") {
            DEEPL_FREE_API_BASE
        } else {
            DEEPL_PRO_API_BASE
        };
        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TranslationBackend for DeepLBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DeepL
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translated, TranslationError> {
        let request = TranslateRequest {
            text: [text],
            target_lang: target_code(target_lang),
            source_lang: source_code(source_lang),
        };

        let response: TranslateResponse = decode_response(
            self.kind(),
            self.client
                .post(format!("{}/v2/translate", self.base_url))
                .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
                .json(&request)
                .send()
                .await,
        )
        .await?;

        let first = response
            .translations
            .into_iter()
            .next()
            .ok_or_else(|| TranslationError::new(self.kind(), "empty translations list"))?;

        Ok(Translated {
            text: first.text,
            detected_source: first
                .detected_source_language
                .map(|l| l.to_ascii_lowercase()),
        })
    }
}
