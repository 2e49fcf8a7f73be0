use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{Config, GenerationDefaults};
use crate::core::io::Storage;
use crate::core::models::{NewStory, Story, StoryPatch, StoryRequest};
use crate::services::book::{BookRenderer, StoryDocument};
use crate::services::character::synthesize;
use crate::services::composer::{compose, compose_title};
use crate::services::enhancer::PromptEnhancer;
use crate::services::extractor::extract_sources;
use crate::services::images::{HttpImageLoader, ImageLoader};
use crate::services::placeholder::{IllustrationResolver, PlaceholderResolver};
use crate::services::scenes::SceneSequencer;
use crate::services::settings::SettingsStore;
use crate::services::store::{JsonStoryStore, StoryStore};

const GENERATION_STEPS: u64 = 5;

/// Everything the workflow is assembled from. `StoryWorkflow::new` wires the
/// production pieces; tests swap in their own.
pub struct WorkflowParts {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub store: Arc<dyn StoryStore>,
    pub settings: Arc<SettingsStore>,
    pub enhancer: Arc<PromptEnhancer>,
    pub resolver: Box<dyn IllustrationResolver>,
    pub loader: Arc<dyn ImageLoader>,
    pub sequencer: SceneSequencer,
}

pub struct StoryWorkflow {
    config: Config,
    storage: Arc<dyn Storage>,
    store: Arc<dyn StoryStore>,
    settings: Arc<SettingsStore>,
    enhancer: Arc<PromptEnhancer>,
    resolver: Box<dyn IllustrationResolver>,
    renderer: BookRenderer,
    sequencer: SceneSequencer,
}

impl StoryWorkflow {
    pub async fn new(config: Config, storage: Arc<dyn Storage>) -> Result<Self> {
        let store = JsonStoryStore::open(storage.clone(), config.stories_path()).await?;
        let settings = SettingsStore::open(storage.clone(), config.settings_path()).await?;

        let provider_key = settings.get_api_key(settings_provider(&config.llm.provider)).await;
        let llm_config = config.llm.clone().with_api_key(&provider_key);
        let enhancer = if llm_config.has_credentials() {
            PromptEnhancer::from_config(&llm_config)
        } else {
            info!("No {} credentials, prompt enhancement uses templates", llm_config.provider);
            PromptEnhancer::fallback_only()
        };

        let resolver = PlaceholderResolver::new(&config.illustrations)?;
        let loader = HttpImageLoader::new(
            storage.clone(),
            Duration::from_secs(config.illustrations.fetch_timeout_seconds),
        )?;

        Ok(Self::from_parts(WorkflowParts {
            config,
            storage,
            store: Arc::new(store),
            settings: Arc::new(settings),
            enhancer: Arc::new(enhancer),
            resolver: Box::new(resolver),
            loader: Arc::new(loader),
            sequencer: SceneSequencer::default(),
        }))
    }

    pub fn from_parts(parts: WorkflowParts) -> Self {
        let renderer = BookRenderer::new(parts.loader, parts.config.illustrations.fetch_concurrency);
        Self {
            config: parts.config,
            storage: parts.storage,
            store: parts.store,
            settings: parts.settings,
            enhancer: parts.enhancer,
            resolver: parts.resolver,
            renderer,
            sequencer: parts.sequencer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StoryStore> {
        &self.store
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn enhancer(&self) -> &Arc<PromptEnhancer> {
        &self.enhancer
    }

    /// Form defaults from the config, with a saved style preference on top.
    pub async fn request_defaults(&self) -> GenerationDefaults {
        let mut defaults = self.config.defaults.clone();
        if let Some(style) = self.settings.preferences().await.default_style {
            defaults.style = style;
        }
        defaults
    }

    pub async fn enhance_prompt(&self, prompt: &str) -> String {
        self.enhancer.enhance(prompt).await
    }

    /// Runs the whole pipeline for one request and stores the result.
    pub async fn generate(&self, request: StoryRequest) -> Result<Story> {
        let request = request.normalized();
        request.validate()?;

        let pb = ProgressBar::new(GENERATION_STEPS);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );

        let age_group = request.target_age_group;
        let style = &request.illustration_style;

        pb.set_message("Reading the prompt");
        let features = extract_sources(&[Some(&request.prompt), request.enhanced_prompt.as_deref()]);
        debug!("Extracted features: {:?}", features);
        pb.inc(1);

        pb.set_message("Creating the main character");
        let profile = synthesize(
            &features,
            request.character_name.as_deref(),
            age_group,
            &mut rand::rng(),
        );
        pb.inc(1);

        pb.set_message("Writing the story");
        let story_text = compose(
            request.final_prompt(),
            request.target_character_count,
            age_group,
            &profile,
        );
        pb.inc(1);

        pb.set_message("Planning illustrations");
        let scenes = self
            .sequencer
            .sequence(&features, request.illustration_count, style, age_group, &profile);
        let illustrations = self.resolver.resolve_all(&scenes, style, age_group)?;
        pb.inc(1);

        pb.set_message("Saving");
        let llm_used = self.llm_used().await;
        let story = self
            .store
            .create(NewStory {
                title: compose_title(&request.prompt),
                prompt: request.prompt.clone(),
                enhanced_prompt: request
                    .enhanced_prompt
                    .clone()
                    .filter(|e| !e.trim().is_empty()),
                story_text,
                image_urls: illustrations.iter().map(|i| i.image_url.clone()).collect(),
                scene_captions: illustrations.iter().map(|i| i.caption.clone()).collect(),
                llm_used,
                character_count: request.target_character_count,
                illustration_count: request.illustration_count,
                illustration_style: request.illustration_style.clone(),
                target_age_group: age_group,
                character: profile,
            })
            .await?;
        pb.inc(1);
        pb.finish_with_message("Story ready");

        info!("Created story {} \"{}\"", story.id, story.title);
        Ok(story)
    }

    /// Replaces one illustration of a stored story with a freshly seeded one.
    /// `Ok(None)` when the story does not exist.
    pub async fn regenerate_illustration(&self, story_id: u64, index: usize) -> Result<Option<Story>> {
        let Some(story) = self.store.get_by_id(story_id).await? else {
            return Ok(None);
        };
        if index >= story.image_urls.len() {
            bail!(
                "Story {} has {} illustrations, no illustration {}",
                story.id,
                story.image_urls.len(),
                index + 1
            );
        }

        let features = extract_sources(&[Some(&story.prompt), story.enhanced_prompt.as_deref()]);
        let profile = story.character_profile();
        let scene = self.sequencer.scene(
            &features,
            index,
            &story.illustration_style,
            story.target_age_group,
            &profile,
        );
        let url = self
            .resolver
            .resolve(&scene, &story.illustration_style, story.target_age_group)?;

        let mut image_urls = story.image_urls.clone();
        image_urls[index] = url;
        let mut scene_captions: Vec<String> = story.illustrations().into_iter().map(|i| i.caption).collect();
        scene_captions[index] = scene.caption;

        let updated = self
            .store
            .update(
                story.id,
                StoryPatch {
                    image_urls: Some(image_urls),
                    scene_captions: Some(scene_captions),
                    ..StoryPatch::default()
                },
            )
            .await?;
        Ok(updated)
    }

    /// Renders a stored story without saving it.
    pub async fn render(&self, story: &Story) -> Result<StoryDocument> {
        self.renderer
            .render(&story.title, Some(&story.prompt), &story.story_text, &story.illustrations())
            .await
            .with_context(|| format!("Failed to render story {}", story.id))
    }

    /// Renders the story into the output folder and records where it went.
    pub async fn export_pdf(&self, story_id: u64) -> Result<Option<String>> {
        let Some(story) = self.store.get_by_id(story_id).await? else {
            return Ok(None);
        };

        println!("Rendering \"{}\"...", story.title);
        let document = self.render(&story).await?;
        let path = document
            .save(self.storage.as_ref(), &self.config.output_folder)
            .await?;

        self.store
            .update(
                story.id,
                StoryPatch {
                    pdf_url: Some(path.clone()),
                    ..StoryPatch::default()
                },
            )
            .await?;
        Ok(Some(path))
    }

    async fn llm_used(&self) -> String {
        let provider = &self.config.llm.provider;
        if self.config.llm.has_credentials() {
            return provider.clone();
        }
        if self.settings.llm_used(settings_provider(provider)).await != "mock" {
            return provider.clone();
        }
        let preferred = self.settings.preferences().await.default_llm_provider;
        self.settings.llm_used(&preferred).await
    }
}

/// Settings keys are stored per vendor rather than per client name.
fn settings_provider(provider: &str) -> &str {
    match provider {
        "gemini" => "google",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::models::{AgeGroup, IllustrationStyle};
    use crate::services::enhancer::{EnhancerSettings, LlmBackend};
    use crate::services::llm::LlmClient;
    use crate::services::placeholder::GenerationError;
    use crate::services::settings::Preferences;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct MockLlm {
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl LlmClient for MockLlm {
        async fn chat(&self, _system: &str, user: &str) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok(format!("A gentle tale: {}", user.trim_start_matches("enhance this story prompt: ")))
        }
    }

    struct MockLoader {
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl ImageLoader for MockLoader {
        async fn load(&self, reference: &str) -> Result<Vec<u8>> {
            *self.calls.lock().unwrap() += 1;
            if reference.is_empty() {
                return Err(anyhow!("empty reference"));
            }
            let mut buf = Vec::new();
            DynamicImage::ImageRgb8(RgbImage::new(8, 6))
                .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
            Ok(buf)
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        workflow: StoryWorkflow,
        llm_calls: Arc<Mutex<usize>>,
        image_calls: Arc<Mutex<usize>>,
    }

    struct OfflineResolver;

    impl IllustrationResolver for OfflineResolver {
        fn resolve(
            &self,
            _scene: &crate::core::models::SceneDescriptor,
            _style: &IllustrationStyle,
            _age_group: AgeGroup,
        ) -> Result<String, GenerationError> {
            Err(GenerationError::Unavailable("image service offline".to_string()))
        }
    }

    async fn harness() -> Result<Harness> {
        harness_with(None).await
    }

    async fn harness_with(resolver: Option<Box<dyn IllustrationResolver>>) -> Result<Harness> {
        let dir = tempfile::tempdir()?;
        let config = Config {
            output_folder: dir.path().join("output").to_string_lossy().to_string(),
            data_folder: dir.path().join("data").to_string_lossy().to_string(),
            ..Config::default()
        };
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let store = JsonStoryStore::open(storage.clone(), config.stories_path()).await?;
        let settings = SettingsStore::open(storage.clone(), config.settings_path()).await?;

        let llm_calls = Arc::new(Mutex::new(0));
        let backend = LlmBackend::with_client(Box::new(MockLlm {
            calls: llm_calls.clone(),
        }));
        let enhancer = PromptEnhancer::new(Box::new(backend), EnhancerSettings::from(&config.llm));

        let image_calls = Arc::new(Mutex::new(0));
        let workflow = StoryWorkflow::from_parts(WorkflowParts {
            resolver: match resolver {
                Some(resolver) => resolver,
                None => Box::new(PlaceholderResolver::new(&config.illustrations)?),
            },
            config,
            storage,
            store: Arc::new(store),
            settings: Arc::new(settings),
            enhancer: Arc::new(enhancer),
            loader: Arc::new(MockLoader {
                calls: image_calls.clone(),
            }),
            sequencer: SceneSequencer::default(),
        });

        Ok(Harness {
            _dir: dir,
            workflow,
            llm_calls,
            image_calls,
        })
    }

    fn bunny_request() -> StoryRequest {
        StoryRequest {
            character_name: Some("Benny".to_string()),
            illustration_count: 6,
            target_age_group: AgeGroup::Preschool,
            ..StoryRequest::new("A brave bunny who discovers a magical forest")
        }
    }

    #[tokio::test]
    async fn test_generate_stores_complete_story() -> Result<()> {
        let h = harness().await?;
        let story = h.workflow.generate(bunny_request()).await?;

        assert_eq!(story.id, 1);
        assert_eq!(story.title, "The Story of A brave bunny who");
        assert_eq!(story.story_text.chars().count(), 800);
        assert_eq!(story.image_urls.len(), 6);
        assert_eq!(story.scene_captions.len(), 6);
        assert_eq!(story.character_name, "Benny");
        assert!(story.character_appearance.contains("rabbit"));
        assert_eq!(story.llm_used, "mock");
        assert!(story.image_urls[0].contains("style=watercolor"));
        assert!(story.image_urls[0].contains("character=rabbit"));

        let stored = h.workflow.store().get_by_id(1).await?;
        assert_eq!(stored.as_ref(), Some(&story));
        Ok(())
    }

    #[tokio::test]
    async fn test_same_request_twice_same_text_new_seeds() -> Result<()> {
        let h = harness().await?;
        let first = h.workflow.generate(bunny_request()).await?;
        let second = h.workflow.generate(bunny_request()).await?;

        assert_eq!(first.story_text, second.story_text);
        assert_eq!(first.scene_captions, second.scene_captions);
        for (a, b) in first.image_urls.iter().zip(&second.image_urls) {
            assert_ne!(a, b);
        }
        assert_eq!(second.id, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_prompt_is_rejected_and_nothing_stored() -> Result<()> {
        let h = harness().await?;
        let request = StoryRequest::new("   ");
        assert!(h.workflow.generate(request).await.is_err());
        assert!(h.workflow.store().get_all().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_range_counts_are_clamped() -> Result<()> {
        let h = harness().await?;
        let request = StoryRequest {
            target_character_count: 5000,
            illustration_count: 1,
            illustration_style: IllustrationStyle::from_tag("Pixel Art"),
            ..StoryRequest::new("a robot in space")
        };
        let story = h.workflow.generate(request).await?;
        assert_eq!(story.story_text.chars().count(), 1500);
        assert_eq!(story.image_urls.len(), 5);
        assert_eq!(story.illustration_style.tag(), "pixel art");
        Ok(())
    }

    #[tokio::test]
    async fn test_llm_used_follows_saved_key() -> Result<()> {
        let h = harness().await?;
        h.workflow.settings().save_api_key("openai", "sk-test").await?;
        let story = h.workflow.generate(bunny_request()).await?;
        assert_eq!(story.llm_used, "openai");
        Ok(())
    }

    #[tokio::test]
    async fn test_llm_used_falls_back_to_preferred_provider() -> Result<()> {
        let h = harness().await?;
        h.workflow.settings().save_api_key("google", "g-key").await?;
        assert_eq!(h.workflow.generate(bunny_request()).await?.llm_used, "mock");

        h.workflow
            .settings()
            .save_preferences(Preferences {
                default_llm_provider: "google".to_string(),
                default_style: None,
            })
            .await?;
        assert_eq!(h.workflow.generate(bunny_request()).await?.llm_used, "google");
        Ok(())
    }

    #[tokio::test]
    async fn test_request_defaults_prefer_saved_style() -> Result<()> {
        let h = harness().await?;
        assert_eq!(h.workflow.request_defaults().await.style, IllustrationStyle::Watercolor);

        h.workflow
            .settings()
            .save_preferences(Preferences {
                default_style: Some(IllustrationStyle::Sketch),
                ..Preferences::default()
            })
            .await?;
        let defaults = h.workflow.request_defaults().await;
        assert_eq!(defaults.style, IllustrationStyle::Sketch);
        assert_eq!(defaults.character_count, h.workflow.config().defaults.character_count);
        Ok(())
    }

    #[tokio::test]
    async fn test_resolver_failure_stores_nothing() -> Result<()> {
        let h = harness_with(Some(Box::new(OfflineResolver))).await?;
        let err = h.workflow.generate(bunny_request()).await.unwrap_err();
        assert!(err.to_string().contains("image service offline"));
        assert!(h.workflow.store().get_all().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_enhance_prompt_uses_llm_client() -> Result<()> {
        let h = harness().await?;
        let enhanced = h.workflow.enhance_prompt("a sleepy dragon").await;
        assert_eq!(enhanced, "A gentle tale: a sleepy dragon");
        assert_eq!(*h.llm_calls.lock().unwrap(), 1);

        let request = StoryRequest {
            enhanced_prompt: Some(enhanced),
            ..StoryRequest::new("a sleepy dragon")
        };
        let story = h.workflow.generate(request).await?;
        assert!(story.story_text.contains("a gentle tale: a sleepy dragon"));
        assert_eq!(story.title, "The Story of a sleepy dragon");
        Ok(())
    }

    #[tokio::test]
    async fn test_regenerate_illustration_replaces_one_reference() -> Result<()> {
        let h = harness().await?;
        let story = h.workflow.generate(bunny_request()).await?;

        let updated = h
            .workflow
            .regenerate_illustration(story.id, 2)
            .await?
            .expect("story exists");
        assert_ne!(updated.image_urls[2], story.image_urls[2]);
        assert_eq!(updated.image_urls[0], story.image_urls[0]);
        assert_eq!(updated.image_urls[5], story.image_urls[5]);
        assert_eq!(updated.scene_captions[2], story.scene_captions[2]);
        assert_eq!(updated.story_text, story.story_text);

        assert!(h.workflow.regenerate_illustration(story.id, 6).await.is_err());
        assert!(h.workflow.regenerate_illustration(99, 0).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_export_pdf_writes_file_and_records_path() -> Result<()> {
        let h = harness().await?;
        let story = h.workflow.generate(bunny_request()).await?;

        let path = h.workflow.export_pdf(story.id).await?.expect("story exists");
        assert!(path.ends_with("the-story-of-a-brave-bunny-who.pdf"));
        let bytes = std::fs::read(&path)?;
        assert!(bytes.starts_with(b"%PDF"));

        let paragraphs = crate::services::book::split_paragraphs(&story.story_text).len();
        assert_eq!(*h.image_calls.lock().unwrap(), paragraphs.div_ceil(2).min(6));

        let stored = h.workflow.store().get_by_id(story.id).await?.expect("story exists");
        assert_eq!(stored.pdf_url.as_deref(), Some(path.as_str()));

        assert!(h.workflow.export_pdf(42).await?.is_none());
        Ok(())
    }
}
