use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::core::io::Storage;

/// Upper bound on the longest edge of an embedded image, in pixels.
const MAX_EDGE: u32 = 1200;

#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, reference: &str) -> Result<Vec<u8>>;
}

/// Fetches `http(s)` references over the network and everything else through storage.
pub struct HttpImageLoader {
    client: reqwest::Client,
    storage: Arc<dyn Storage>,
}

impl HttpImageLoader {
    pub fn new(storage: Arc<dyn Storage>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, storage })
    }
}

#[async_trait]
impl ImageLoader for HttpImageLoader {
    async fn load(&self, reference: &str) -> Result<Vec<u8>> {
        match Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let resp = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("Failed to fetch {}", reference))?;
                if !resp.status().is_success() {
                    return Err(anyhow!("Fetching {} returned {}", reference, resp.status()));
                }
                Ok(resp.bytes().await?.to_vec())
            }
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| anyhow!("Invalid file reference: {}", reference))?;
                self.storage.read(&path.to_string_lossy()).await
            }
            Ok(url) => Err(anyhow!("Unsupported image scheme: {}", url.scheme())),
            Err(_) => self.storage.read(reference).await,
        }
    }
}

/// Decodes PNG or JPEG bytes to RGB, shrinking oversized images.
pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("Unsupported or corrupt image data")?;
    let image = if image.width() > MAX_EDGE || image.height() > MAX_EDGE {
        image.thumbnail(MAX_EDGE, MAX_EDGE)
    } else {
        image
    };
    Ok(image.to_rgb8())
}
