use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Byte-level persistence used by the story and settings stores and for PDF export.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}

/// Loads a JSON document, or `None` when nothing has been written yet.
pub async fn read_json<T: DeserializeOwned>(storage: &dyn Storage, path: &str) -> Result<Option<T>> {
    if !storage.exists(path).await? {
        return Ok(None);
    }
    let bytes = storage.read(path).await?;
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse JSON in {}", path))?;
    Ok(Some(value))
}

pub async fn write_json<T: Serialize + ?Sized>(storage: &dyn Storage, path: &str, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    storage.write(path, content.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_json_helpers_round_trip_through_native_storage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("doc.json");
        let path_str = path.to_str().unwrap();
        let storage = NativeStorage::new();

        let missing: Option<HashMap<String, u32>> = read_json(&storage, path_str).await?;
        assert!(missing.is_none());

        let mut doc = HashMap::new();
        doc.insert("pages".to_string(), 3u32);
        write_json(&storage, path_str, &doc).await?;

        let loaded: Option<HashMap<String, u32>> = read_json(&storage, path_str).await?;
        assert_eq!(loaded, Some(doc));
        assert!(storage.exists(path_str).await?);
        Ok(())
    }
}
