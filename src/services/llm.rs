use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use url::Url;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Initialization attempts before the enhancer settles on its template fallback.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_init_timeout")]
    pub init_timeout_seconds: u64,
    #[serde(default = "default_enhance_timeout")]
    pub enhance_timeout_seconds: u64,

    pub openai: Option<OpenAIConfig>,
    pub ollama: Option<OllamaConfig>,
    pub gemini: Option<GeminiConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    1000
}
fn default_backoff_cap() -> u64 {
    10_000
}
fn default_init_timeout() -> u64 {
    30
}
fn default_enhance_timeout() -> u64 {
    15
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_cap_ms: default_backoff_cap(),
            init_timeout_seconds: default_init_timeout(),
            enhance_timeout_seconds: default_enhance_timeout(),
            openai: None,
            ollama: None,
            gemini: None,
        }
    }
}

impl LlmConfig {
    /// Fills an empty key for the active provider, e.g. from the settings store.
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        if api_key.trim().is_empty() {
            return self;
        }
        match self.provider.as_str() {
            "openai" => {
                let cfg = self.openai.get_or_insert_with(|| OpenAIConfig {
                    api_key: String::new(),
                    model: default_openai_model(),
                    base_url: None,
                });
                if cfg.api_key.is_empty() {
                    cfg.api_key = api_key.to_string();
                }
            }
            "gemini" | "google" => {
                let cfg = self.gemini.get_or_insert_with(|| GeminiConfig {
                    api_key: String::new(),
                    model: default_gemini_model(),
                });
                if cfg.api_key.is_empty() {
                    cfg.api_key = api_key.to_string();
                }
            }
            _ => {}
        }
        self
    }

    /// The key the active provider would authenticate with; Ollama needs none.
    pub fn has_credentials(&self) -> bool {
        match self.provider.as_str() {
            "openai" => self.openai.as_ref().is_some_and(|c| !c.api_key.is_empty()),
            "gemini" | "google" => self.gemini.as_ref().is_some_and(|c| !c.api_key.is_empty()),
            "ollama" => self.ollama.is_some(),
            _ => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

pub fn create_llm(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    let timeout = Duration::from_secs(config.enhance_timeout_seconds);
    match config.provider.as_str() {
        "gemini" | "google" => {
            let cfg = config.gemini.as_ref().context("Gemini config missing")?;
            Ok(Box::new(GeminiClient::new(&cfg.api_key, &cfg.model, timeout)?))
        }
        "ollama" => {
            let cfg = config.ollama.as_ref().context("Ollama config missing")?;
            Ok(Box::new(OllamaClient::new(&cfg.base_url, &cfg.model, timeout)?))
        }
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI config missing")?;
            Ok(Box::new(OpenAIClient::new(
                &cfg.api_key,
                &cfg.model,
                cfg.base_url.as_deref(),
                timeout,
            )?))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response, provider: &str) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(anyhow!("{} API error ({}): {}", provider, status, body));
    }
    serde_json::from_str(&body)
        .with_context(|| format!("Failed to parse {} response. Body: {}", provider, body))
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            client: http_client(timeout)?,
        })
    }
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

impl OpenAIResponse {
    fn into_text(self) -> Result<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| anyhow!("OpenAI response empty or missing content"))
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let request = OpenAIRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature: 0.7,
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        read_json::<OpenAIResponse>(resp, "OpenAI").await?.into_text()
    }
}

// --- Ollama ---

#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: http_client(timeout)?,
        })
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let request = OllamaRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            stream: false,
        };

        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        let result: OllamaResponse = read_json(resp, "Ollama").await?;
        Ok(result.message.content)
    }
}

// --- Gemini ---

#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: http_client(timeout)?,
        })
    }
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    system_instruction: GeminiContent<'a>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Deserialize)]
struct GeminiCandidatePart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiError {
    message: String,
}

impl GeminiResponse {
    fn into_text(self) -> Result<String> {
        if let Some(err) = self.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        let first = self
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .ok_or_else(|| anyhow!("Gemini response has no candidates"))?;

        match first.content.and_then(|c| c.parts.into_iter().next()) {
            Some(part) => Ok(part.text),
            None => Err(anyhow!(
                "Gemini response empty. Finish reason: {}",
                first.finish_reason.as_deref().unwrap_or("UNKNOWN")
            )),
        }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let mut url = Url::parse(&format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        ))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user"),
                parts: vec![GeminiPart { text: user }],
            }],
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart { text: system }],
            },
        };

        let resp = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await?;

        read_json::<GeminiResponse>(resp, "Gemini").await?.into_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_response_text() -> Result<()> {
        let json = r#"{
            "id": "chatcmpl-123",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "A curious rabbit finds a glowing door." },
                "finish_reason": "stop"
            }]
        }"#;
        let result: OpenAIResponse = serde_json::from_str(json)?;
        assert_eq!(result.into_text()?, "A curious rabbit finds a glowing door.");
        Ok(())
    }

    #[test]
    fn test_openai_empty_choices_is_error() -> Result<()> {
        let result: OpenAIResponse = serde_json::from_str(r#"{"choices": []}"#)?;
        assert!(result.into_text().is_err());
        let result: OpenAIResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": "  "}}]}"#)?;
        assert!(result.into_text().is_err());
        Ok(())
    }

    #[test]
    fn test_gemini_safety_block_reports_finish_reason() -> Result<()> {
        let json = r#"{ "candidates": [ { "finishReason": "SAFETY", "index": 0 } ] }"#;
        let result: GeminiResponse = serde_json::from_str(json)?;
        let err = result.into_text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
        Ok(())
    }

    #[test]
    fn test_gemini_response_text() -> Result<()> {
        let json = r#"{
            "candidates": [{
                "content": { "parts": [ { "text": "Hello world" } ], "role": "model" },
                "finishReason": "STOP"
            }]
        }"#;
        let result: GeminiResponse = serde_json::from_str(json)?;
        assert_eq!(result.into_text()?, "Hello world");
        Ok(())
    }

    #[test]
    fn test_with_api_key_fills_only_empty_key() {
        let config = LlmConfig::default().with_api_key("sk-from-settings");
        assert!(config.has_credentials());
        assert_eq!(config.openai.as_ref().map(|c| c.api_key.as_str()), Some("sk-from-settings"));

        let config = config.with_api_key("sk-other");
        assert_eq!(config.openai.as_ref().map(|c| c.api_key.as_str()), Some("sk-from-settings"));

        assert!(!LlmConfig::default().with_api_key("  ").has_credentials());
    }

    #[test]
    fn test_create_llm_requires_provider_config() {
        assert!(create_llm(&LlmConfig::default()).is_err());

        let config = LlmConfig {
            provider: "carrier-pigeon".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_llm(&config).is_err());

        let config = LlmConfig {
            provider: "ollama".to_string(),
            ollama: Some(OllamaConfig {
                base_url: "http://localhost:11434/".to_string(),
                model: "llama3".to_string(),
            }),
            ..LlmConfig::default()
        };
        assert!(create_llm(&config).is_ok());
    }
}
