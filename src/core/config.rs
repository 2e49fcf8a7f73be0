use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::models::{
    AgeGroup, IllustrationStyle, DEFAULT_CHARACTER_COUNT, DEFAULT_ILLUSTRATION_COUNT,
};
use crate::services::llm::LlmConfig;

const CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_data")]
    pub data_folder: String,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub illustrations: IllustrationConfig,

    #[serde(default)]
    pub defaults: GenerationDefaults,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IllustrationConfig {
    #[serde(default = "default_image_base_url")]
    pub base_url: String,
    #[serde(default = "default_image_width")]
    pub width: u32,
    #[serde(default = "default_image_height")]
    pub height: u32,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationDefaults {
    #[serde(default = "default_character_count")]
    pub character_count: usize,
    #[serde(default = "default_illustration_count")]
    pub illustration_count: usize,
    #[serde(default)]
    pub style: IllustrationStyle,
    #[serde(default)]
    pub age_group: AgeGroup,
}

fn default_output() -> String {
    "output".to_string()
}
fn default_data() -> String {
    "data".to_string()
}
fn default_image_base_url() -> String {
    "https://picsum.photos".to_string()
}
fn default_image_width() -> u32 {
    400
}
fn default_image_height() -> u32 {
    300
}
fn default_fetch_timeout() -> u64 {
    20
}
fn default_fetch_concurrency() -> usize {
    4
}
fn default_character_count() -> usize {
    DEFAULT_CHARACTER_COUNT
}
fn default_illustration_count() -> usize {
    DEFAULT_ILLUSTRATION_COUNT
}

impl Default for IllustrationConfig {
    fn default() -> Self {
        Self {
            base_url: default_image_base_url(),
            width: default_image_width(),
            height: default_image_height(),
            fetch_timeout_seconds: default_fetch_timeout(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            character_count: default_character_count(),
            illustration_count: default_illustration_count(),
            style: IllustrationStyle::default(),
            age_group: AgeGroup::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            data_folder: default_data(),
            unattended: false,
            llm: LlmConfig::default(),
            illustrations: IllustrationConfig::default(),
            defaults: GenerationDefaults::default(),
        }
    }
}

impl Config {
    /// Reads `config.yml`; a missing file yields the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("{} not found, using default settings", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.data_folder)?;
        Ok(())
    }

    pub fn stories_path(&self) -> String {
        Path::new(&self.data_folder)
            .join("stories.json")
            .to_string_lossy()
            .to_string()
    }

    pub fn settings_path(&self) -> String {
        Path::new(&self.data_folder)
            .join("settings.json")
            .to_string_lossy()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() -> Result<()> {
        let yaml = r#"
output_folder: books
llm:
  provider: ollama
  ollama:
    base_url: http://localhost:11434
    model: llama3
illustrations:
  width: 640
defaults:
  age_group: "9-12"
  style: sketch
"#;
        let config: Config = serde_yaml_ng::from_str(yaml)?;
        assert_eq!(config.output_folder, "books");
        assert_eq!(config.data_folder, "data");
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.illustrations.width, 640);
        assert_eq!(config.illustrations.height, 300);
        assert_eq!(config.defaults.age_group, AgeGroup::MiddleGrade);
        assert_eq!(config.defaults.style, IllustrationStyle::Sketch);
        assert_eq!(config.defaults.character_count, DEFAULT_CHARACTER_COUNT);
        Ok(())
    }

    #[test]
    fn test_missing_file_uses_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config::load_from(&dir.path().join("config.yml"))?;
        assert_eq!(config.output_folder, "output");
        assert_eq!(config.illustrations.base_url, "https://picsum.photos");
        Ok(())
    }

    #[test]
    fn test_load_from_reports_parse_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(&path, "llm: [not, a, map]")?;
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse"));
        Ok(())
    }
}
