use anyhow::Result;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::io::{read_json, write_json, Storage};
use crate::core::models::IllustrationStyle;

pub const PROVIDERS: &[&str] = &["openai", "anthropic", "google"];

static KEY_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("openai", Regex::new(r"^sk-[A-Za-z0-9]{48}$").expect("openai key pattern")),
        ("anthropic", Regex::new(r"^sk-ant-[A-Za-z0-9-]{95}$").expect("anthropic key pattern")),
        ("google", Regex::new(r"^[A-Za-z0-9_-]{39}$").expect("google key pattern")),
    ]
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyValidationError {
    #[error("API key is required")]
    Missing,
    #[error("Invalid {0} API key format")]
    InvalidFormat(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_llm_provider")]
    pub default_llm_provider: String,
    /// `None` leaves the configured default in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_style: Option<IllustrationStyle>,
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            default_llm_provider: default_llm_provider(),
            default_style: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
    #[serde(default)]
    pub preferences: Preferences,
}

/// API keys and user preferences, persisted as JSON.
pub struct SettingsStore {
    storage: Arc<dyn Storage>,
    path: String,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    pub async fn open(storage: Arc<dyn Storage>, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let settings = match read_json::<Settings>(storage.as_ref(), &path).await {
            Ok(settings) => settings.unwrap_or_default(),
            Err(e) => {
                log::warn!("Ignoring unreadable settings in {}: {:#}", path, e);
                Settings::default()
            }
        };
        Ok(Self {
            storage,
            path,
            settings: RwLock::new(settings),
        })
    }

    /// The stored key, or an empty string when none is set.
    pub async fn get_api_key(&self, provider: &str) -> String {
        self.settings
            .read()
            .await
            .api_keys
            .get(provider)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn save_api_key(&self, provider: &str, key: &str) -> Result<()> {
        let mut settings = self.settings.write().await;
        let mut next = settings.clone();
        next.api_keys.insert(provider.to_string(), key.trim().to_string());
        write_json(self.storage.as_ref(), &self.path, &next).await?;
        *settings = next;
        debug!("Saved {} API key", provider);
        Ok(())
    }

    pub async fn clear_api_keys(&self) -> Result<()> {
        let mut settings = self.settings.write().await;
        let mut next = settings.clone();
        next.api_keys.clear();
        write_json(self.storage.as_ref(), &self.path, &next).await?;
        *settings = next;
        Ok(())
    }

    pub async fn preferences(&self) -> Preferences {
        self.settings.read().await.preferences.clone()
    }

    pub async fn save_preferences(&self, preferences: Preferences) -> Result<()> {
        let mut settings = self.settings.write().await;
        let mut next = settings.clone();
        next.preferences = preferences;
        write_json(self.storage.as_ref(), &self.path, &next).await?;
        *settings = next;
        Ok(())
    }

    /// Provider name when a key is stored for it, otherwise "mock".
    pub async fn llm_used(&self, provider: &str) -> String {
        if self.get_api_key(provider).await.is_empty() {
            "mock".to_string()
        } else {
            provider.to_string()
        }
    }
}

/// Format check only; unknown providers just need a non-blank key.
pub fn validate_api_key(provider: &str, key: &str) -> Result<(), KeyValidationError> {
    if key.trim().is_empty() {
        return Err(KeyValidationError::Missing);
    }

    let Some((_, pattern)) = KEY_PATTERNS.iter().find(|(name, _)| *name == provider) else {
        return Ok(());
    };

    if pattern.is_match(key) {
        Ok(())
    } else {
        Err(KeyValidationError::InvalidFormat(capitalize(provider)))
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    async fn open_store(dir: &tempfile::TempDir) -> Result<SettingsStore> {
        let path = dir.path().join("settings.json");
        SettingsStore::open(Arc::new(NativeStorage::new()), path.to_string_lossy().to_string()).await
    }

    #[test]
    fn test_validate_api_key_formats() {
        let openai = format!("sk-{}", "a1B2".repeat(12));
        assert_eq!(validate_api_key("openai", &openai), Ok(()));
        assert_eq!(
            validate_api_key("openai", "sk-short"),
            Err(KeyValidationError::InvalidFormat("Openai".to_string()))
        );

        let anthropic = format!("sk-ant-{}", "ab-cd".repeat(19));
        assert_eq!(validate_api_key("anthropic", &anthropic), Ok(()));

        let google = "AIza_".to_string() + &"x".repeat(34);
        assert_eq!(validate_api_key("google", &google), Ok(()));
        assert!(validate_api_key("google", &format!("{}!", &google[..38])).is_err());

        assert_eq!(validate_api_key("mistral", "anything"), Ok(()));
        assert_eq!(validate_api_key("mistral", "   "), Err(KeyValidationError::Missing));
    }

    #[tokio::test]
    async fn test_keys_persist_and_clear() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(&dir).await?;
        assert_eq!(store.get_api_key("openai").await, "");
        assert_eq!(store.llm_used("openai").await, "mock");

        store.save_api_key("openai", " sk-test ").await?;
        assert_eq!(store.llm_used("openai").await, "openai");

        let reopened = open_store(&dir).await?;
        assert_eq!(reopened.get_api_key("openai").await, "sk-test");

        reopened.clear_api_keys().await?;
        assert_eq!(reopened.get_api_key("openai").await, "");
        assert_eq!(open_store(&dir).await?.get_api_key("openai").await, "");
        Ok(())
    }

    #[tokio::test]
    async fn test_preferences_default_and_update() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(&dir).await?;
        let prefs = store.preferences().await;
        assert_eq!(prefs.default_llm_provider, "openai");
        assert_eq!(prefs.default_style, None);

        store
            .save_preferences(Preferences {
                default_llm_provider: "google".to_string(),
                default_style: Some(IllustrationStyle::Cartoon),
            })
            .await?;
        let reopened = open_store(&dir).await?;
        let prefs = reopened.preferences().await;
        assert_eq!(prefs.default_llm_provider, "google");
        assert_eq!(prefs.default_style, Some(IllustrationStyle::Cartoon));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_settings_fall_back_to_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("settings.json"), "{{")?;
        let store = open_store(&dir).await?;
        assert_eq!(store.preferences().await, Preferences::default());
        Ok(())
    }
}
