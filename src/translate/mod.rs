pub mod ali;
pub mod baidu;
pub mod bing;
pub mod deepl;
pub mod format;
pub mod google;
pub mod libre;
pub mod sign;
pub mod tencent;
pub mod youdao;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::{TranslationConfig, TranslationCredentials};
use crate::error::{ConfigError, TranslationError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// The supported translation services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Google,
    Baidu,
    Youdao,
    Tencent,
    Libre,
    DeepL,
    Bing,
    Ali,
}

impl BackendKind {
    pub const ALL: [BackendKind; 8] = [
        BackendKind::Google,
        BackendKind::Baidu,
        BackendKind::Youdao,
        BackendKind::Tencent,
        BackendKind::Libre,
        BackendKind::DeepL,
        BackendKind::Bing,
        BackendKind::Ali,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Google => "google",
            BackendKind::Baidu => "baidu",
            BackendKind::Youdao => "youdao",
            BackendKind::Tencent => "tencent",
            BackendKind::Libre => "libre",
            BackendKind::DeepL => "deepl",
            BackendKind::Bing => "bing",
            BackendKind::Ali => "ali",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownService(s.to_string()))
    }
}

/// What a backend hands back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    pub text: String,
    /// Source language as detected by the service, when it reports one.
    pub detected_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    pub source_text: String,
    pub translated_text: String,
    pub source_lang: String,
    pub target_lang: String,
}

/// One translation service.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Translate `text` between generic language codes (`auto`, `en`, `zh-CN`, ...).
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translated, TranslationError>;
}

/// Build the configured backend, checking its credentials are present.
pub fn build_backend(
    kind: BackendKind,
    creds: &TranslationCredentials,
    client: reqwest::Client,
) -> Result<Box<dyn TranslationBackend>, ConfigError> {
    let missing = |missing: &'static str| ConfigError::MissingCredentials {
        backend: kind,
        missing,
    };

    let backend: Box<dyn TranslationBackend> = match kind {
        BackendKind::Google => Box::new(google::GoogleBackend::new(
            client,
            creds
                .google_api_key
                .clone()
                .ok_or_else(|| missing("GOOGLE_TRANSLATION_API_KEY"))?,
        )),
        BackendKind::Baidu => Box::new(baidu::BaiduBackend::new(
            client,
            creds.baidu_app_id.clone().ok_or_else(|| missing("BAIDU_APP_ID"))?,
            creds
                .baidu_app_key
                .clone()
                .ok_or_else(|| missing("BAIDU_APP_KEY"))?,
        )),
        BackendKind::Youdao => Box::new(youdao::YoudaoBackend::new(
            client,
            creds
                .youdao_app_key
                .clone()
                .ok_or_else(|| missing("YOUDAO_APP_KEY"))?,
            creds
                .youdao_app_secret
                .clone()
                .ok_or_else(|| missing("YOUDAO_APP_SECRET"))?,
        )),
        BackendKind::Tencent => Box::new(tencent::TencentBackend::new(
            client,
            creds
                .tencent_secret_id
                .clone()
                .ok_or_else(|| missing("TENCENT_SECRET_ID"))?,
            creds
                .tencent_secret_key
                .clone()
                .ok_or_else(|| missing("TENCENT_SECRET_KEY"))?,
            creds.tencent_region.clone(),
        )),
        BackendKind::Libre => Box::new(libre::LibreBackend::new(
            client,
            creds
                .libre_api_url
                .clone()
                .ok_or_else(|| missing("LIBRE_TRANSLATION_API_URL"))?,
            creds.libre_api_key.clone(),
        )),
        BackendKind::DeepL => {
            let key = creds
                .deepl_api_key
                .clone()
                .ok_or_else(|| missing("DEEPL_API_KEY"))?;
            let backend = deepl::DeepLBackend::new(client, key);
            match &creds.deepl_api_url {
                Some(url) => Box::new(backend.with_base_url(url)),
                None => Box::new(backend),
            }
        }
        BackendKind::Bing => Box::new(bing::BingBackend::new(
            client,
            creds
                .bing_api_key
                .clone()
                .ok_or_else(|| missing("BING_TRANSLATOR_KEY"))?,
            creds.bing_region.clone(),
        )),
        BackendKind::Ali => Box::new(ali::AliBackend::new(
            client,
            creds
                .ali_access_key_id
                .clone()
                .ok_or_else(|| missing("ALI_ACCESS_KEY_ID"))?,
            creds
                .ali_access_key_secret
                .clone()
                .ok_or_else(|| missing("ALI_ACCESS_KEY_SECRET"))?,
            &creds.ali_region,
        )),
    };

    Ok(backend)
}

/// HTTP client shared by all backends.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()
}

/// Check the HTTP status and decode the JSON body of a backend response.
pub(crate) async fn decode_response<T: DeserializeOwned>(
    kind: BackendKind,
    result: reqwest::Result<reqwest::Response>,
) -> Result<T, TranslationError> {
    let response =
        result.map_err(|e| TranslationError::new(kind, format!("request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TranslationError::new(
            kind,
            format!("HTTP {}: {}", status, body),
        ));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| TranslationError::new(kind, format!("invalid response: {}", e)))
}

/// The translation facade: one backend, fixed languages, chosen at startup.
pub struct Translator {
    backend: Box<dyn TranslationBackend>,
    source_language: String,
    target_language: String,
    whitelist: Vec<String>,
}

impl Translator {
    pub fn new(
        backend: Box<dyn TranslationBackend>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            source_language: source_language.into(),
            target_language: target_language.into(),
            whitelist: Vec::new(),
        }
    }

    pub fn with_whitelist(mut self, whitelist: Vec<String>) -> Self {
        self.whitelist = whitelist;
        self
    }

    /// Build from configuration. `Ok(None)` when translation is disabled.
    pub fn from_config(
        config: &TranslationConfig,
        client: reqwest::Client,
    ) -> Result<Option<Self>, ConfigError> {
        if !config.enabled {
            return Ok(None);
        }

        let kind: BackendKind = config.service.parse()?;
        let backend = build_backend(kind, &config.credentials, client)?;
        Ok(Some(
            Self::new(
                backend,
                config.source_language.clone(),
                config.target_language.clone(),
            )
            .with_whitelist(config.whitelist.clone()),
        ))
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    /// Whether the text contains a whitelisted term and should stay as-is.
    pub fn is_whitelisted(&self, text: &str) -> bool {
        self.whitelist.iter().any(|term| text.contains(term.as_str()))
    }

    pub async fn translate(&self, text: &str) -> Result<TranslationResult, TranslationError> {
        let translated = self
            .backend
            .translate(text, &self.source_language, &self.target_language)
            .await?;

        Ok(TranslationResult {
            source_text: text.to_string(),
            translated_text: translated.text,
            source_lang: translated
                .detected_source
                .unwrap_or_else(|| self.source_language.clone()),
            target_lang: self.target_language.clone(),
        })
    }

    /// Produce the bilingual block for `text`.
    ///
    /// `Ok(None)` means there is nothing to add: whitelisted text, nothing
    /// translatable outside code fences, or a translation identical to the input.
    pub async fn bilingual(&self, text: &str) -> Result<Option<String>, TranslationError> {
        if self.is_whitelisted(text) {
            debug!("Skipping translation: text contains a whitelisted term");
            return Ok(None);
        }

        let lines = format::classify_lines(text);
        let sources = format::translatable(&lines);
        if sources.is_empty() {
            return Ok(None);
        }

        let joined = sources.join("\n");
        let result = self.translate(&joined).await?;
        let translated = result.translated_text.trim();
        if translated.is_empty() || translated == joined.trim() {
            return Ok(None);
        }

        debug!(
            "Translated {} line(s) {} -> {} via {}",
            sources.len(),
            result.source_lang,
            result.target_lang,
            self.backend_kind()
        );

        let translated_lines: Vec<&str> = translated.split('\n').collect();
        Ok(Some(
            format::interleave(&lines, &translated_lines)
                .unwrap_or_else(|| format::whole_block(text, translated)),
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;

    fn translator(backend: ScriptedBackend) -> Translator {
        Translator::new(Box::new(backend), "auto", "zh-CN")
    }

    #[test]
    fn test_backend_kind_parsing() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!("DeepL".parse::<BackendKind>().unwrap(), BackendKind::DeepL);
        assert!(matches!(
            "papago".parse::<BackendKind>(),
            Err(ConfigError::UnknownService(_))
        ));
    }

    #[test]
    fn test_build_backend_requires_credentials() {
        let client = reqwest::Client::new();
        let creds = TranslationCredentials::default();
        for kind in BackendKind::ALL {
            let err = build_backend(kind, &creds, client.clone()).err().unwrap();
            assert!(matches!(err, ConfigError::MissingCredentials { backend, .. } if backend == kind));
        }

        let creds = TranslationCredentials {
            deepl_api_key: Some("k:fx".to_string()),
            ..Default::default()
        };
        let backend = build_backend(BackendKind::DeepL, &creds, client).unwrap();
        assert_eq!(backend.kind(), BackendKind::DeepL);
    }

    #[test]
    fn test_disabled_translation_builds_nothing() {
        let config = TranslationConfig {
            enabled: false,
            service: "nonsense".to_string(),
            source_language: "auto".to_string(),
            target_language: "zh-CN".to_string(),
            whitelist: vec![],
            credentials: TranslationCredentials::default(),
        };
        assert!(Translator::from_config(&config, reqwest::Client::new())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_translate_reports_detected_language() {
        let t = translator(ScriptedBackend::answering(&[("hello", "你好")]));
        let result = t.translate("hello").await.unwrap();
        assert_eq!(
            result,
            TranslationResult {
                source_text: "hello".to_string(),
                translated_text: "你好".to_string(),
                source_lang: "en".to_string(),
                target_lang: "zh-CN".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_bilingual_single_line() {
        let t = translator(ScriptedBackend::answering(&[("hello", "你好")]));
        assert_eq!(
            t.bilingual("hello").await.unwrap().as_deref(),
            Some("hello\n🔤 你好")
        );
    }

    #[tokio::test]
    async fn test_bilingual_falls_back_to_whole_block() {
        let t = translator(ScriptedBackend::answering(&[("a\nb", "甲乙")]));
        assert_eq!(
            t.bilingual("a\nb").await.unwrap().as_deref(),
            Some("a\nb\n\n🔤 甲乙")
        );
    }

    #[tokio::test]
    async fn test_bilingual_skips_whitelisted_and_identical() {
        let t = translator(ScriptedBackend::answering(&[("gg wp", "gg wp")]))
            .with_whitelist(vec!["!raw".to_string()]);
        assert!(t.bilingual("!raw keep me").await.unwrap().is_none());
        assert!(t.bilingual("gg wp").await.unwrap().is_none());
        assert!(t.bilingual("```\ncode\n```").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bilingual_propagates_failure() {
        let t = translator(ScriptedBackend::failing());
        let err = t.bilingual("hello").await.unwrap_err();
        assert_eq!(err.backend, BackendKind::Libre);
    }
}
