use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: Option<String>,
    pub kook_token: Option<String>,
    pub forward: ForwardConfig,
    pub translation: TranslationConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Raw `src:dst,src:dst` rule string, parsed by `ForwardRuleTable`.
    pub rules: String,
    pub forward_bot_messages: bool,
    /// Prefix for messages coming from Discord.
    pub message_prefix: String,
    /// Prefix for messages coming from KOOK.
    pub kook_message_prefix: String,
}

#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub enabled: bool,
    pub service: String,
    pub source_language: String,
    pub target_language: String,
    /// Texts containing any of these terms are forwarded untranslated.
    pub whitelist: Vec<String>,
    pub credentials: TranslationCredentials,
}

/// One credential group per translation backend. Empty values read as `None`.
#[derive(Debug, Clone, Default)]
pub struct TranslationCredentials {
    pub google_api_key: Option<String>,
    pub baidu_app_id: Option<String>,
    pub baidu_app_key: Option<String>,
    pub youdao_app_key: Option<String>,
    pub youdao_app_secret: Option<String>,
    pub tencent_secret_id: Option<String>,
    pub tencent_secret_key: Option<String>,
    pub tencent_region: String,
    pub libre_api_url: Option<String>,
    pub libre_api_key: Option<String>,
    pub deepl_api_key: Option<String>,
    pub deepl_api_url: Option<String>,
    pub bing_api_key: Option<String>,
    pub bing_region: Option<String>,
    pub ali_access_key_id: Option<String>,
    pub ali_access_key_secret: Option<String>,
    pub ali_region: String,
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub download_dir: PathBuf,
    pub interval_hours: u64,
    pub max_file_age_hours: u64,
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }

    pub fn max_file_age(&self) -> Duration {
        Duration::from_secs(self.max_file_age_hours.saturating_mul(3600))
    }
}

fn default_message_prefix() -> String {
    "[Discord]".to_string()
}

fn default_kook_message_prefix() -> String {
    "[KOOK]".to_string()
}

fn default_translation_service() -> String {
    "libre".to_string()
}

fn default_source_language() -> String {
    "auto".to_string()
}

fn default_target_language() -> String {
    "zh-CN".to_string()
}

fn default_tencent_region() -> String {
    "ap-guangzhou".to_string()
}

fn default_ali_region() -> String {
    "cn-hangzhou".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

const DEFAULT_CLEANUP_INTERVAL_HOURS: u64 = 24;
const DEFAULT_MAX_FILE_AGE_HOURS: u64 = 72;
/// Ten years. Larger hour values are rejected.
const MAX_HOURS: u64 = 24 * 365 * 10;

/// Environment-style key/value source.
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value, `None` when unset or blank.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: fn() -> String) -> String {
        self.get(key).unwrap_or_else(default)
    }

    fn bool_or(&self, key: &'static str, default: bool) -> bool {
        let Some(raw) = self.get(key) else {
            return default;
        };
        match parse_bool(&raw) {
            Some(value) => value,
            None => {
                let err = ConfigError::InvalidValue {
                    key,
                    value: raw,
                    reason: "expected true/false".to_string(),
                };
                warn!("{}; using default {}", err, default);
                default
            }
        }
    }

    fn hours_or(&self, keys: &[&'static str], default: u64) -> u64 {
        for &key in keys {
            let Some(raw) = self.get(key) else {
                continue;
            };
            return match raw.parse::<u64>() {
                Ok(hours) if hours > 0 && hours <= MAX_HOURS => hours,
                _ => {
                    let err = ConfigError::InvalidValue {
                        key,
                        value: raw,
                        reason: format!("expected between 1 and {} hours", MAX_HOURS),
                    };
                    warn!("{}; using default {}", err, default);
                    default
                }
            };
        }
        default
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load from the process environment. Call `dotenvy` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value lookup. Fails only when no platform token is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let discord_token = vars.get("DISCORD_BOT_TOKEN");
        let kook_token = vars.get("KOOK_BOT_TOKEN");
        if discord_token.is_none() && kook_token.is_none() {
            return Err(ConfigError::NoPlatformToken);
        }

        let forward = ForwardConfig {
            rules: vars.get("FORWARD_RULES").unwrap_or_default(),
            forward_bot_messages: vars.bool_or("FORWARD_BOT_MESSAGES", false),
            message_prefix: vars.string_or("MESSAGE_PREFIX", default_message_prefix),
            kook_message_prefix: vars
                .string_or("KOOK_MESSAGE_PREFIX", default_kook_message_prefix),
        };

        let credentials = TranslationCredentials {
            google_api_key: vars.get("GOOGLE_TRANSLATION_API_KEY"),
            baidu_app_id: vars.get("BAIDU_APP_ID"),
            baidu_app_key: vars.get("BAIDU_APP_KEY"),
            youdao_app_key: vars.get("YOUDAO_APP_KEY"),
            youdao_app_secret: vars.get("YOUDAO_APP_SECRET"),
            tencent_secret_id: vars.get("TENCENT_SECRET_ID"),
            tencent_secret_key: vars.get("TENCENT_SECRET_KEY"),
            tencent_region: vars.string_or("TENCENT_REGION", default_tencent_region),
            libre_api_url: vars.get("LIBRE_TRANSLATION_API_URL"),
            libre_api_key: vars.get("LIBRE_TRANSLATION_API_KEY"),
            deepl_api_key: vars.get("DEEPL_API_KEY"),
            deepl_api_url: vars.get("DEEPL_API_URL"),
            bing_api_key: vars.get("BING_TRANSLATOR_KEY"),
            bing_region: vars.get("BING_TRANSLATOR_REGION"),
            ali_access_key_id: vars.get("ALI_ACCESS_KEY_ID"),
            ali_access_key_secret: vars.get("ALI_ACCESS_KEY_SECRET"),
            ali_region: vars.string_or("ALI_REGION", default_ali_region),
        };

        let translation = TranslationConfig {
            enabled: vars.bool_or("TRANSLATION_ENABLED", false),
            service: vars
                .string_or("TRANSLATION_SERVICE", default_translation_service)
                .to_lowercase(),
            source_language: vars
                .string_or("TRANSLATION_SOURCE_LANGUAGE", default_source_language),
            target_language: vars
                .string_or("TRANSLATION_TARGET_LANGUAGE", default_target_language),
            whitelist: vars
                .get("TRANSLATION_WHITELIST")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            credentials,
        };

        let cleanup = CleanupConfig {
            download_dir: vars
                .get("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_download_dir),
            interval_hours: vars.hours_or(&["CLEANUP_INTERVAL"], DEFAULT_CLEANUP_INTERVAL_HOURS),
            max_file_age_hours: vars.hours_or(
                &["MAX_FILE_AGE", "CLEANUP_MAX_AGE"],
                DEFAULT_MAX_FILE_AGE_HOURS,
            ),
        };

        Ok(Config {
            discord_token,
            kook_token,
            forward,
            translation,
            cleanup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_no_tokens_is_fatal() {
        let err = load(&[("FORWARD_RULES", "1:2")]).unwrap_err();
        assert!(matches!(err, ConfigError::NoPlatformToken));
    }

    #[test]
    fn test_blank_token_counts_as_missing() {
        let err = load(&[("DISCORD_BOT_TOKEN", "   ")]).unwrap_err();
        assert!(matches!(err, ConfigError::NoPlatformToken));
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("KOOK_BOT_TOKEN", "kook")]).unwrap();
        assert!(config.discord_token.is_none());
        assert_eq!(config.kook_token.as_deref(), Some("kook"));
        assert!(!config.forward.forward_bot_messages);
        assert_eq!(config.forward.message_prefix, "[Discord]");
        assert_eq!(config.forward.kook_message_prefix, "[KOOK]");
        assert!(!config.translation.enabled);
        assert_eq!(config.translation.service, "libre");
        assert_eq!(config.translation.source_language, "auto");
        assert_eq!(config.translation.target_language, "zh-CN");
        assert_eq!(config.translation.credentials.tencent_region, "ap-guangzhou");
        assert_eq!(config.cleanup.download_dir, PathBuf::from("downloads"));
        assert_eq!(config.cleanup.interval(), Duration::from_secs(24 * 3600));
        assert_eq!(config.cleanup.max_file_age(), Duration::from_secs(72 * 3600));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DISCORD_BOT_TOKEN", "discord"),
            ("FORWARD_RULES", "111:222"),
            ("FORWARD_BOT_MESSAGES", "TRUE"),
            ("MESSAGE_PREFIX", "[DC]"),
            ("TRANSLATION_ENABLED", "true"),
            ("TRANSLATION_SERVICE", "DeepL"),
            ("TRANSLATION_WHITELIST", "GG, ,afk"),
            ("DEEPL_API_KEY", "key:fx"),
            ("CLEANUP_INTERVAL", "6"),
            ("CLEANUP_MAX_AGE", "12"),
        ])
        .unwrap();
        assert_eq!(config.forward.rules, "111:222");
        assert!(config.forward.forward_bot_messages);
        assert_eq!(config.forward.message_prefix, "[DC]");
        assert!(config.translation.enabled);
        assert_eq!(config.translation.service, "deepl");
        assert_eq!(config.translation.whitelist, vec!["GG", "afk"]);
        assert_eq!(
            config.translation.credentials.deepl_api_key.as_deref(),
            Some("key:fx")
        );
        assert_eq!(config.cleanup.interval_hours, 6);
        assert_eq!(config.cleanup.max_file_age_hours, 12);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = load(&[
            ("DISCORD_BOT_TOKEN", "discord"),
            ("FORWARD_BOT_MESSAGES", "maybe"),
            ("CLEANUP_INTERVAL", "0"),
            ("MAX_FILE_AGE", "soon"),
        ])
        .unwrap();
        assert!(!config.forward.forward_bot_messages);
        assert_eq!(config.cleanup.interval_hours, 24);
        assert_eq!(config.cleanup.max_file_age_hours, 72);
    }

    #[test]
    fn test_huge_hours_fall_back_to_defaults() {
        let config = load(&[
            ("DISCORD_BOT_TOKEN", "discord"),
            ("CLEANUP_INTERVAL", "6000000000000000"),
            ("MAX_FILE_AGE", "87601"),
        ])
        .unwrap();
        assert_eq!(config.cleanup.interval_hours, 24);
        assert_eq!(config.cleanup.max_file_age_hours, 72);
        assert_eq!(config.cleanup.interval(), Duration::from_secs(24 * 3600));

        let config = load(&[
            ("DISCORD_BOT_TOKEN", "discord"),
            ("CLEANUP_INTERVAL", "87600"),
        ])
        .unwrap();
        assert_eq!(config.cleanup.interval_hours, 87600);
        assert_eq!(
            config.cleanup.interval(),
            Duration::from_secs(87600 * 3600)
        );
    }

    #[test]
    fn test_accessors_saturate_instead_of_overflowing() {
        let cleanup = CleanupConfig {
            download_dir: PathBuf::from("downloads"),
            interval_hours: u64::MAX,
            max_file_age_hours: u64::MAX / 2,
        };
        assert_eq!(cleanup.interval(), Duration::from_secs(u64::MAX));
        assert_eq!(cleanup.max_file_age(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_max_file_age_wins_over_alias() {
        let config = load(&[
            ("DISCORD_BOT_TOKEN", "discord"),
            ("MAX_FILE_AGE", "5"),
            ("CLEANUP_MAX_AGE", "9"),
        ])
        .unwrap();
        assert_eq!(config.cleanup.max_file_age_hours, 5);
    }
}
