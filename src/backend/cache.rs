use image::DynamicImage;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::CacheConfig;

/// Decoded page images in memory, raw downloads on disk.
///
/// Image preloads decode into the memory side so the viewer can show them
/// without decoding again; body preloads only warm the disk side.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<RwLock<PageCacheInner>>,
}

struct PageCacheInner {
    pages: HashMap<String, DynamicImage>,
    access_order: VecDeque<String>,
    cache_dir: PathBuf,
    max_memory_pages: usize,
    max_disk_bytes: u64,
}

impl PageCache {
    pub fn new(cache_dir: PathBuf, config: &CacheConfig) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            log::warn!("Failed to create cache directory {}: {}", cache_dir.display(), e);
        }

        Self {
            inner: Arc::new(RwLock::new(PageCacheInner {
                pages: HashMap::new(),
                access_order: VecDeque::new(),
                cache_dir,
                max_memory_pages: config.max_memory_pages.max(1),
                max_disk_bytes: config.max_disk_cache_mb.saturating_mul(1024 * 1024),
            })),
        }
    }

    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vview-tui")
            .join("pages")
    }

    /// Return the decoded page, decoding it from the disk cache if needed.
    pub async fn get_page(&self, url: &str) -> Option<DynamicImage> {
        let mut inner = self.inner.write().await;

        if let Some(image) = inner.pages.get(url).cloned() {
            inner.touch(url);
            return Some(image);
        }

        let image = inner.load_from_disk(url)?;
        inner.insert_memory(url.to_string(), image.clone());
        Some(image)
    }

    pub async fn insert_page(&self, url: String, image: DynamicImage) {
        let mut inner = self.inner.write().await;
        inner.insert_memory(url, image);
    }

    /// Store a raw download on disk.
    pub async fn insert_bytes(&self, url: &str, bytes: &[u8]) {
        let inner = self.inner.read().await;
        inner.save_to_disk(url, bytes);
    }

    pub async fn has_page(&self, url: &str) -> bool {
        let inner = self.inner.read().await;
        if inner.pages.contains_key(url) {
            return true;
        }
        inner.disk_cache_exists(url)
    }
}

impl PageCacheInner {
    fn touch(&mut self, url: &str) {
        self.access_order.retain(|k| k != url);
        self.access_order.push_back(url.to_string());
    }

    fn insert_memory(&mut self, url: String, image: DynamicImage) {
        if !self.pages.contains_key(&url) && self.pages.len() >= self.max_memory_pages {
            if let Some(oldest) = self.access_order.pop_front() {
                self.pages.remove(&oldest);
            }
        }

        self.touch(&url);
        self.pages.insert(url, image);
    }

    fn url_to_filename(&self, url: &str) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        self.cache_dir.join(format!("{:016x}", hasher.finish()))
    }

    fn disk_cache_exists(&self, url: &str) -> bool {
        self.url_to_filename(url).exists()
    }

    fn load_from_disk(&self, url: &str) -> Option<DynamicImage> {
        let bytes = fs::read(self.url_to_filename(url)).ok()?;
        image::load_from_memory(&bytes).ok()
    }

    fn save_to_disk(&self, url: &str, bytes: &[u8]) {
        self.cleanup_old_cache();

        let path = self.url_to_filename(url);
        if let Err(e) = fs::write(&path, bytes) {
            log::debug!("Couldn't write {} to the page cache: {}", url, e);
        }
    }

    fn cleanup_old_cache(&self) {
        let entries: Vec<_> = fs::read_dir(&self.cache_dir)
            .ok()
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let meta = e.metadata().ok()?;
                        let modified = meta.modified().ok()?;
                        Some((e.path(), meta.len(), modified))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let total_size: u64 = entries.iter().map(|(_, size, _)| size).sum();

        if total_size > self.max_disk_bytes {
            let mut entries = entries;
            entries.sort_by_key(|(_, _, modified)| *modified);

            let mut current_size = total_size;
            for (path, size, _) in entries {
                if current_size <= self.max_disk_bytes / 100 * 80 {
                    break;
                }
                if fs::remove_file(&path).is_ok() {
                    current_size -= size;
                }
            }
        }
    }
}
