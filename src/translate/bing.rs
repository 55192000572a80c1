use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{decode_response, BackendKind, Translated, TranslationBackend};
use crate::error::TranslationError;

const BING_API_BASE: &str = "https://api.cognitive.microsofttranslator.com";

/// Microsoft (Bing) Translator v3.
pub struct BingBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    region: Option<String>,
}

#[derive(Serialize)]
struct TextItem<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultItem {
    #[serde(default)]
    detected_language: Option<DetectedLanguage>,
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct DetectedLanguage {
    language: String,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

fn map_lang(code: &str) -> &str {
    match code {
        "zh-CN" | "zh" => "zh-Hans",
        "zh-TW" => "zh-Hant",
        other => other,
    }
}

impl BingBackend {
    pub fn new(client: reqwest::Client, api_key: String, region: Option<String>) -> Self {
        Self {
            client,
            base_url: BING_API_BASE.to_string(),
            api_key,
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
impl TranslationBackend for BingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Bing
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translated, TranslationError> {
        let mut query = vec![("api-version", "3.0"), ("to", map_lang(target_lang))];
        if source_lang != "auto" {
            query.push(("from", map_lang(source_lang)));
        }

        let mut request = self
            .client
            .post(format!("{}/translate", self.base_url))
            .query(&query)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .json(&[TextItem { text }]);
        if let Some(region) = &self.region {
            request = request.header("Ocp-Apim-Subscription-Region", region);
        }

        let items: Vec<ResultItem> = decode_response(self.kind(), request.send().await).await?;

        let item = items
            .into_iter()
            .next()
            .ok_or_else(|| TranslationError::new(self.kind(), "empty response"))?;
        let text = item
            .translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| TranslationError::new(self.kind(), "empty translations list"))?;

        Ok(Translated {
            text,
            detected_source: item.detected_language.map(|d| d.language),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_translate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/translate"))
            .and(query_param("api-version", "3.0"))
            .and(query_param("to", "zh-Hans"))
            .and(header("Ocp-Apim-Subscription-Key", "key"))
            .and(header("Ocp-Apim-Subscription-Region", "eastasia"))
            .and(body_json(json!([{"Text": "hello"}])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "detectedLanguage": {"language": "en", "score": 1.0},
                "translations": [{"text": "你好", "to": "zh-Hans"}]
            }])))
            .mount(&server)
            .await;

        let backend = BingBackend::new(
            reqwest::Client::new(),
            "key".into(),
            Some("eastasia".into()),
        )
        .with_base_url(&server.uri());
        let out = backend.translate("hello", "auto", "zh-CN").await.unwrap();
        assert_eq!(out.text, "你好");
        assert_eq!(out.detected_source.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"code": 401000, "message": "invalid key"}
            })))
            .mount(&server)
            .await;

        let backend =
            BingBackend::new(reqwest::Client::new(), "bad".into(), None).with_base_url(&server.uri());
        let err = backend.translate("hello", "en", "zh-CN").await.unwrap_err();
        assert!(err.reason.contains("401"));
    }
}
