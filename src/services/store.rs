use anyhow::Result;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use log::{debug, info};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::io::{read_json, write_json, Storage};
use crate::core::models::{NewStory, Story, StoryPatch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to load stories from {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to save stories to {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

#[async_trait]
pub trait StoryStore: Send + Sync {
    async fn create(&self, story: NewStory) -> Result<Story, StoreError>;
    /// Every story, newest first.
    async fn get_all(&self) -> Result<Vec<Story>, StoreError>;
    async fn get_by_id(&self, id: u64) -> Result<Option<Story>, StoreError>;
    async fn update(&self, id: u64, patch: StoryPatch) -> Result<Option<Story>, StoreError>;
    /// `Ok(false)` when no story has this id.
    async fn delete(&self, id: u64) -> Result<bool, StoreError>;
    /// Case-insensitive match over title, prompt and story text.
    async fn search(&self, query: &str) -> Result<Vec<Story>, StoreError>;
    async fn recent(&self, limit: usize) -> Result<Vec<Story>, StoreError>;
}

/// Stories kept in memory and mirrored to a single JSON document.
pub struct JsonStoryStore {
    storage: Arc<dyn Storage>,
    path: String,
    stories: RwLock<Vec<Story>>,
}

impl JsonStoryStore {
    pub async fn open(storage: Arc<dyn Storage>, path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        let stories: Vec<Story> = read_json(storage.as_ref(), &path)
            .await
            .map_err(|source| StoreError::Load {
                path: path.clone(),
                source,
            })?
            .unwrap_or_default();
        info!("Loaded {} stories from {}", stories.len(), path);

        Ok(Self {
            storage,
            path,
            stories: RwLock::new(stories),
        })
    }

    async fn persist(&self, stories: &[Story]) -> Result<(), StoreError> {
        write_json(self.storage.as_ref(), &self.path, stories)
            .await
            .map_err(|source| StoreError::Persist {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl StoryStore for JsonStoryStore {
    async fn create(&self, story: NewStory) -> Result<Story, StoreError> {
        let mut stories = self.stories.write().await;
        let id = stories.iter().map(|s| s.id).max().unwrap_or(0) + 1;

        let created = Story {
            id,
            prompt: story.prompt,
            enhanced_prompt: story.enhanced_prompt,
            title: story.title,
            story_text: story.story_text,
            image_urls: story.image_urls,
            scene_captions: story.scene_captions,
            llm_used: story.llm_used,
            character_count: story.character_count,
            illustration_count: story.illustration_count,
            illustration_style: story.illustration_style,
            target_age_group: story.target_age_group,
            character_name: story.character.main_character,
            character_appearance: story.character.appearance,
            character_personality: story.character.personality,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            pdf_url: None,
        };

        let mut next = Vec::with_capacity(stories.len() + 1);
        next.push(created.clone());
        next.extend(stories.iter().cloned());
        self.persist(&next).await?;
        *stories = next;

        debug!("Created story {} \"{}\"", created.id, created.title);
        Ok(created)
    }

    async fn get_all(&self) -> Result<Vec<Story>, StoreError> {
        Ok(self.stories.read().await.clone())
    }

    async fn get_by_id(&self, id: u64) -> Result<Option<Story>, StoreError> {
        Ok(self.stories.read().await.iter().find(|s| s.id == id).cloned())
    }

    async fn update(&self, id: u64, patch: StoryPatch) -> Result<Option<Story>, StoreError> {
        let mut stories = self.stories.write().await;
        let Some(index) = stories.iter().position(|s| s.id == id) else {
            return Ok(None);
        };

        let mut next = stories.clone();
        let story = &mut next[index];
        if let Some(title) = patch.title {
            story.title = title;
        }
        if let Some(story_text) = patch.story_text {
            story.story_text = story_text;
        }
        if let Some(image_urls) = patch.image_urls {
            story.image_urls = image_urls;
        }
        if let Some(scene_captions) = patch.scene_captions {
            story.scene_captions = scene_captions;
        }
        if let Some(pdf_url) = patch.pdf_url {
            story.pdf_url = Some(pdf_url);
        }
        let updated = story.clone();

        self.persist(&next).await?;
        *stories = next;
        Ok(Some(updated))
    }

    async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let mut stories = self.stories.write().await;
        if !stories.iter().any(|s| s.id == id) {
            return Ok(false);
        }

        let next: Vec<Story> = stories.iter().filter(|s| s.id != id).cloned().collect();
        self.persist(&next).await?;
        *stories = next;
        Ok(true)
    }

    async fn search(&self, query: &str) -> Result<Vec<Story>, StoreError> {
        let needle = query.trim().to_lowercase();
        let stories = self.stories.read().await;
        if needle.is_empty() {
            return Ok(stories.clone());
        }
        Ok(stories
            .iter()
            .filter(|s| {
                s.title.to_lowercase().contains(&needle)
                    || s.prompt.to_lowercase().contains(&needle)
                    || s.story_text.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Story>, StoreError> {
        let mut stories = self.stories.read().await.clone();
        stories.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        stories.truncate(limit);
        Ok(stories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::models::{AgeGroup, CharacterProfile, IllustrationStyle};

    fn new_story(prompt: &str) -> NewStory {
        NewStory {
            prompt: prompt.to_string(),
            enhanced_prompt: None,
            title: format!("The Story of {}", prompt),
            story_text: format!("Once upon a time there was {}.", prompt),
            image_urls: vec!["https://picsum.photos/400/300?random=a".to_string()],
            scene_captions: vec!["A new day begins".to_string()],
            llm_used: "mock".to_string(),
            character_count: 800,
            illustration_count: 1,
            illustration_style: IllustrationStyle::Watercolor,
            target_age_group: AgeGroup::Preschool,
            character: CharacterProfile {
                main_character: "Benny".to_string(),
                appearance: "a small rabbit".to_string(),
                personality: "kind".to_string(),
            },
        }
    }

    async fn open_store(dir: &tempfile::TempDir) -> Result<JsonStoryStore> {
        let path = dir.path().join("stories.json");
        Ok(JsonStoryStore::open(Arc::new(NativeStorage::new()), path.to_string_lossy().to_string()).await?)
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_lists_newest_first() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(&dir).await?;

        let first = store.create(new_story("a bunny")).await?;
        let second = store.create(new_story("a dragon")).await?;
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(second.character_name, "Benny");
        assert!(second.pdf_url.is_none());

        let all = store.get_all().await?;
        assert_eq!(all.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn test_persists_across_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let store = open_store(&dir).await?;
            store.create(new_story("a bunny")).await?;
        }
        let store = open_store(&dir).await?;
        let story = store.get_by_id(1).await?.expect("story survives reopen");
        assert_eq!(story.prompt, "a bunny");

        let next = store.create(new_story("a fox")).await?;
        assert_eq!(next.id, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_patches_only_given_fields() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(&dir).await?;
        let created = store.create(new_story("a bunny")).await?;

        let patch = StoryPatch {
            pdf_url: Some("output/a-bunny.pdf".to_string()),
            ..StoryPatch::default()
        };
        let updated = store.update(created.id, patch).await?.expect("story exists");
        assert_eq!(updated.pdf_url.as_deref(), Some("output/a-bunny.pdf"));
        assert_eq!(updated.title, created.title);
        assert_eq!(updated.created_at, created.created_at);

        assert!(store.update(99, StoryPatch::default()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_missing_id_leaves_listing_unchanged() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(&dir).await?;
        store.create(new_story("a bunny")).await?;
        store.create(new_story("a dragon")).await?;
        let before = store.get_all().await?;

        assert!(!store.delete(42).await?);
        assert_eq!(store.get_all().await?, before);

        assert!(store.delete(1).await?);
        assert_eq!(store.get_all().await?.len(), 1);
        assert!(store.get_by_id(1).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(&dir).await?;
        store.create(new_story("a Brave Bunny")).await?;
        store.create(new_story("a sleepy dragon")).await?;

        let hits = store.search("BUNNY").await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].prompt, "a Brave Bunny");
        assert_eq!(store.search("once upon").await?.len(), 2);
        assert!(store.search("spaceship").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_recent_limits_newest_first() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(&dir).await?;
        for prompt in ["one", "two", "three"] {
            store.create(new_story(prompt)).await?;
        }
        let recent = store.recent(2).await?;
        assert_eq!(recent.iter().map(|s| s.id).collect::<Vec<_>>(), vec![3, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_file_is_load_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stories.json");
        std::fs::write(&path, "not json")?;
        let result = JsonStoryStore::open(Arc::new(NativeStorage::new()), path.to_string_lossy().to_string()).await;
        assert!(matches!(result, Err(StoreError::Load { .. })));
        Ok(())
    }
}
