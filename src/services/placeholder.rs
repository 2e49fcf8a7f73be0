use anyhow::{Context, Result};
use thiserror::Error;
use url::Url;

use crate::core::config::IllustrationConfig;
use crate::core::models::{AgeGroup, Illustration, IllustrationStyle, SceneDescriptor};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Illustration backend unavailable: {0}")]
    Unavailable(String),
}

/// Maps a planned scene to an image reference.
pub trait IllustrationResolver: Send + Sync {
    fn resolve(
        &self,
        scene: &SceneDescriptor,
        style: &IllustrationStyle,
        age_group: AgeGroup,
    ) -> Result<String, GenerationError>;

    fn resolve_all(
        &self,
        scenes: &[SceneDescriptor],
        style: &IllustrationStyle,
        age_group: AgeGroup,
    ) -> Result<Vec<Illustration>, GenerationError> {
        scenes
            .iter()
            .map(|scene| {
                Ok(Illustration {
                    scene_number: scene.scene_number,
                    description: scene.description.clone(),
                    illustration_prompt: scene.illustration_prompt.clone(),
                    image_url: self.resolve(scene, style, age_group)?,
                    caption: scene.caption.clone(),
                })
            })
            .collect()
    }
}

/// Stock-photo placeholder standing in for a real image generator.
pub struct PlaceholderResolver {
    base: Url,
}

impl PlaceholderResolver {
    pub fn new(config: &IllustrationConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid illustration base URL: {}", config.base_url))?;
        base.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Illustration base URL cannot carry a path: {}", config.base_url))?
            .pop_if_empty()
            .push(&config.width.to_string())
            .push(&config.height.to_string());
        Ok(Self { base })
    }
}

impl IllustrationResolver for PlaceholderResolver {
    fn resolve(
        &self,
        scene: &SceneDescriptor,
        style: &IllustrationStyle,
        age_group: AgeGroup,
    ) -> Result<String, GenerationError> {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("random", &scene.seed)
            .append_pair("style", style.tag())
            .append_pair("character", &scene.context_tags.character)
            .append_pair("age", age_group.label());
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::SceneContext;

    fn scene(seed: &str) -> SceneDescriptor {
        SceneDescriptor {
            scene_number: 1,
            description: "Benny the rabbit waves hello".to_string(),
            illustration_prompt: "prompt".to_string(),
            caption: "Hello, Benny!".to_string(),
            seed: seed.to_string(),
            context_tags: SceneContext {
                character: "little friend".to_string(),
                setting: "woodland".to_string(),
                action: "playing".to_string(),
                mood: "cheerful".to_string(),
                theme: "friendship".to_string(),
            },
        }
    }

    #[test]
    fn test_reference_carries_seed_and_traceability_params() -> Result<()> {
        let resolver = PlaceholderResolver::new(&IllustrationConfig::default())?;
        let url = resolver.resolve(&scene("benny-woodland-0"), &IllustrationStyle::Watercolor, AgeGroup::Toddler)?;
        assert_eq!(
            url,
            "https://picsum.photos/400/300?random=benny-woodland-0&style=watercolor&character=little+friend&age=1-2"
        );
        Ok(())
    }

    #[test]
    fn test_distinct_seeds_give_distinct_references() -> Result<()> {
        let resolver = PlaceholderResolver::new(&IllustrationConfig::default())?;
        let a = resolver.resolve(&scene("a"), &IllustrationStyle::Sketch, AgeGroup::Preschool)?;
        let b = resolver.resolve(&scene("b"), &IllustrationStyle::Sketch, AgeGroup::Preschool)?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn test_base_with_trailing_slash_and_bad_base() {
        let config = IllustrationConfig {
            base_url: "http://localhost:9000/images/".to_string(),
            width: 64,
            height: 48,
            ..IllustrationConfig::default()
        };
        let resolver = PlaceholderResolver::new(&config).unwrap();
        let url = resolver.resolve(&scene("s"), &IllustrationStyle::Digital, AgeGroup::MiddleGrade).unwrap();
        assert!(url.starts_with("http://localhost:9000/images/64/48?random=s"));

        let config = IllustrationConfig {
            base_url: "not a url".to_string(),
            ..IllustrationConfig::default()
        };
        assert!(PlaceholderResolver::new(&config).is_err());
    }

    #[test]
    fn test_resolve_all_keeps_order_and_captions() -> Result<()> {
        let resolver = PlaceholderResolver::new(&IllustrationConfig::default())?;
        let mut second = scene("two");
        second.scene_number = 2;
        second.caption = "Second".to_string();
        let illustrations = resolver.resolve_all(&[scene("one"), second], &IllustrationStyle::Cartoon, AgeGroup::Preschool)?;
        assert_eq!(illustrations.len(), 2);
        assert_eq!(illustrations[1].scene_number, 2);
        assert_eq!(illustrations[1].caption, "Second");
        assert!(illustrations[1].image_url.contains("random=two"));
        Ok(())
    }
}
