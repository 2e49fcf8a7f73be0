//! Prompt enhancement with a bounded initialization state machine.
//!
//! The backend gets `max_attempts` tries to come up, each under a timeout and
//! separated by capped exponential backoff. After that the enhancer stays on
//! the template fallback until `reset()`. `enhance` never returns an error.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use rand::seq::IndexedRandom;
use serde::Serialize;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::services::llm::{create_llm, LlmClient, LlmConfig};

const BLANK_PROMPT_REPLY: &str = "Tell a wonderful story for children.";
const FALLBACK_SUFFIX: &str = "Make it age-appropriate and full of wonder.";
const FALLBACK_OPENERS: &[&str] = &[
    "Create a vivid and engaging story about",
    "Tell an imaginative tale featuring",
    "Craft a wonderful story that includes",
    "Write a captivating story about",
];
const HEALTH_PROBE: &str = "test prompt";
const SAMPLE_LEN: usize = 50;

const SYSTEM_PROMPT: &str = "You rewrite short story ideas for children's picture books. \
Reply with a single improved prompt of one or two sentences, with no preamble.";

#[async_trait]
pub trait EnhancementBackend: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn enhance(&self, prompt: &str) -> Result<String>;
}

/// Enhancement through one of the configured chat providers.
pub struct LlmBackend {
    config: LlmConfig,
    client: OnceLock<Box<dyn LlmClient>>,
}

impl LlmBackend {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    pub fn with_client(client: Box<dyn LlmClient>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(client);
        Self {
            config: LlmConfig::default(),
            client: cell,
        }
    }
}

#[async_trait]
impl EnhancementBackend for LlmBackend {
    async fn initialize(&self) -> Result<()> {
        if self.client.get().is_some() {
            return Ok(());
        }
        if !self.config.has_credentials() {
            return Err(anyhow!("No credentials configured for {}", self.config.provider));
        }
        let client = create_llm(&self.config)?;
        let _ = self.client.set(client);
        Ok(())
    }

    async fn enhance(&self, prompt: &str) -> Result<String> {
        let client = self
            .client
            .get()
            .ok_or_else(|| anyhow!("LLM client not initialized"))?;
        let reply = client
            .chat(SYSTEM_PROMPT, &format!("enhance this story prompt: {}", prompt))
            .await?;
        Ok(reply.trim().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnhancerState {
    Uninitialized,
    Initializing,
    Ready,
    FallbackPermanent,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnhancerHealth {
    pub state: EnhancerState,
    pub using_fallback: bool,
    pub sample: String,
}

#[derive(Debug, Clone)]
pub struct EnhancerSettings {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub init_timeout: Duration,
    pub enhance_timeout: Duration,
}

impl From<&LlmConfig> for EnhancerSettings {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
            init_timeout: Duration::from_secs(config.init_timeout_seconds),
            enhance_timeout: Duration::from_secs(config.enhance_timeout_seconds),
        }
    }
}

impl EnhancerSettings {
    /// `min(base * 2^(attempt-1), cap)` for a 1-based attempt number.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

pub struct PromptEnhancer {
    backend: Option<Box<dyn EnhancementBackend>>,
    settings: EnhancerSettings,
    state: Mutex<EnhancerState>,
    init_lock: tokio::sync::Mutex<()>,
}

impl PromptEnhancer {
    pub fn new(backend: Box<dyn EnhancementBackend>, settings: EnhancerSettings) -> Self {
        Self {
            backend: Some(backend),
            settings,
            state: Mutex::new(EnhancerState::Uninitialized),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// An enhancer with no backend; every call uses the template fallback.
    pub fn fallback_only() -> Self {
        Self {
            backend: None,
            settings: EnhancerSettings::from(&LlmConfig::default()),
            state: Mutex::new(EnhancerState::FallbackPermanent),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(Box::new(LlmBackend::new(config.clone())), EnhancerSettings::from(config))
    }

    pub fn state(&self) -> EnhancerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: EnhancerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub async fn enhance(&self, prompt: &str) -> String {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return BLANK_PROMPT_REPLY.to_string();
        }

        let ready = self.ensure_ready().await;
        let backend = match self.backend.as_deref() {
            Some(backend) if ready => backend,
            _ => {
                debug!("Using fallback prompt enhancement");
                return fallback_enhancement(prompt);
            }
        };

        match tokio::time::timeout(self.settings.enhance_timeout, backend.enhance(prompt)).await {
            Ok(Ok(enhanced)) if !enhanced.trim().is_empty() => enhanced,
            Ok(Ok(_)) => {
                warn!("Prompt enhancement returned nothing, using fallback");
                fallback_enhancement(prompt)
            }
            Ok(Err(e)) => {
                warn!("Prompt enhancement failed, using fallback: {}", e);
                fallback_enhancement(prompt)
            }
            Err(_) => {
                warn!(
                    "Prompt enhancement timed out after {:?}, using fallback",
                    self.settings.enhance_timeout
                );
                fallback_enhancement(prompt)
            }
        }
    }

    /// Runs a probe enhancement and reports which path served it.
    pub async fn health(&self) -> EnhancerHealth {
        let result = self.enhance(HEALTH_PROBE).await;
        let state = self.state();
        let mut sample: String = result.chars().take(SAMPLE_LEN).collect();
        sample.push_str("...");
        EnhancerHealth {
            state,
            using_fallback: state != EnhancerState::Ready,
            sample,
        }
    }

    /// Forgets previous initialization outcomes so the backend is tried again.
    pub async fn reset(&self) {
        let _guard = self.init_lock.lock().await;
        if self.backend.is_some() {
            self.set_state(EnhancerState::Uninitialized);
        }
    }

    async fn ensure_ready(&self) -> bool {
        match self.state() {
            EnhancerState::Ready => return true,
            EnhancerState::FallbackPermanent => return false,
            _ => {}
        }

        // Concurrent callers queue here and observe the winner's outcome.
        let _guard = self.init_lock.lock().await;
        match self.state() {
            EnhancerState::Ready => return true,
            EnhancerState::FallbackPermanent => return false,
            _ => {}
        }

        let Some(backend) = self.backend.as_deref() else {
            self.set_state(EnhancerState::FallbackPermanent);
            return false;
        };

        self.set_state(EnhancerState::Initializing);
        let max_attempts = self.settings.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            info!("Initializing prompt enhancer (attempt {}/{})", attempt, max_attempts);
            match tokio::time::timeout(self.settings.init_timeout, backend.initialize()).await {
                Ok(Ok(())) => {
                    info!("Prompt enhancer ready");
                    self.set_state(EnhancerState::Ready);
                    return true;
                }
                Ok(Err(e)) => warn!("Prompt enhancer initialization failed (attempt {}): {}", attempt, e),
                Err(_) => warn!(
                    "Prompt enhancer initialization timed out after {:?} (attempt {})",
                    self.settings.init_timeout, attempt
                ),
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.settings.backoff(attempt)).await;
            }
        }

        info!("Prompt enhancer falling back to templates");
        self.set_state(EnhancerState::FallbackPermanent);
        false
    }
}

pub fn fallback_enhancement(prompt: &str) -> String {
    let opener = FALLBACK_OPENERS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(FALLBACK_OPENERS[0]);
    format!("{} {}. {}", opener, prompt, FALLBACK_SUFFIX)
}
