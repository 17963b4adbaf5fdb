use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use sha1::{Digest, Sha1};

use crate::storage::Store;

/// Only straightforward image files are cached; anything else is declined.
pub const VALID_IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif"];

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub cache_dir: Option<PathBuf>,
    pub user_agent: String,
    pub http_client: Option<HttpClient>,
}

/// Content-addressed image cache: one file per post, named by the sha1 of
/// the source url. No eviction.
pub struct ImageCache {
    store: Arc<Store>,
    cache_dir: PathBuf,
    client: HttpClient,
    user_agent: String,
}

impl ImageCache {
    pub fn new(store: Arc<Store>, cfg: Config) -> Result<Self> {
        let cache_dir = cfg
            .cache_dir
            .or_else(default_cache_dir)
            .context("media: cache dir not configured")?;
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("media: create cache dir {}", cache_dir.display()))?;

        let client = match cfg.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("media: build http client")?,
        };

        Ok(Self {
            store,
            cache_dir,
            client,
            user_agent: cfg.user_agent,
        })
    }

    /// Download and cache a post's image. `None` for empty or non-image
    /// urls and for any download failure; a post that is already cached
    /// gets its stored path back without touching the network.
    pub fn cache_image(&self, post_id: &str, image_url: &str) -> Option<PathBuf> {
        let ext = allowed_extension(image_url)?;

        match self.store.cached_image_path(post_id) {
            Ok(Some(path)) => return Some(PathBuf::from(path)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(post_id, error = %err, "cached image lookup failed");
                return None;
            }
        }

        match self.fetch(post_id, image_url, ext) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(post_id, image_url, error = %err, "image cache failed");
                None
            }
        }
    }

    fn fetch(&self, post_id: &str, image_url: &str, ext: &str) -> Result<PathBuf> {
        let resp = self
            .client
            .get(image_url)
            .header(USER_AGENT, self.user_agent.clone())
            .send()
            .context("media: download")?;
        if !resp.status().is_success() {
            return Err(anyhow!("media: request failed: {}", resp.status()));
        }
        let bytes = resp.bytes().context("media: body")?;

        let filename = format!("{}{}", sha1_hex(image_url.as_bytes()), ext);
        let path = self.cache_dir.join(filename);
        fs::write(&path, &bytes).context("media: write")?;
        self.store
            .insert_cached_image(post_id, &path.to_string_lossy())?;
        Ok(path)
    }
}

fn allowed_extension(url: &str) -> Option<&'static str> {
    if url.is_empty() {
        return None;
    }
    let lower = url.to_lowercase();
    VALID_IMAGE_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| lower.ends_with(ext))
}

fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("redshelf").join("images"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Options;
    use tempfile::tempdir;

    #[test]
    fn extension_allow_list() {
        assert_eq!(
            allowed_extension("https://i.example.com/cat.PNG"),
            Some(".png")
        );
        assert_eq!(
            allowed_extension("https://i.example.com/dog.jpeg"),
            Some(".jpeg")
        );
        assert!(allowed_extension("https://example.com/page.html").is_none());
        assert!(allowed_extension("https://example.com/clip.mp4").is_none());
        assert!(allowed_extension("").is_none());
    }

    #[test]
    fn cached_posts_short_circuit_without_network() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            Store::open(Options {
                path: Some(dir.path().join("shelf.db")),
            })
            .unwrap(),
        );
        store.insert_cached_image("abc", "/tmp/existing.png").unwrap();

        let cache = ImageCache::new(
            store,
            Config {
                cache_dir: Some(dir.path().join("images")),
                user_agent: "test/1.0".to_string(),
                http_client: None,
            },
        )
        .unwrap();

        // A hit never reaches the (unroutable) network.
        let path = cache.cache_image("abc", "https://i.example.com/x.png");
        assert_eq!(path, Some(PathBuf::from("/tmp/existing.png")));
    }

    #[test]
    fn non_image_urls_are_declined() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            Store::open(Options {
                path: Some(dir.path().join("shelf.db")),
            })
            .unwrap(),
        );
        let cache = ImageCache::new(
            store,
            Config {
                cache_dir: Some(dir.path().join("images")),
                user_agent: "test/1.0".to_string(),
                http_client: None,
            },
        )
        .unwrap();
        assert!(cache.cache_image("abc", "https://example.com/video.mp4").is_none());
    }
}
