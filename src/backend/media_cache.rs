//! Media info lookups, cached per post.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, warn};
use parking_lot::Mutex;

use super::mangadex::Catalog;
use crate::media::{MediaId, MediaInfo, MediaInfoProvider, MediaKind, UrlGuesser};

/// Loads chapter info from the catalog and keeps it. Every page of a post
/// shares one entry.
pub struct MediaCache {
    catalog: Arc<dyn Catalog>,
    infos: Mutex<HashMap<MediaId, Arc<MediaInfo>>>,
}

impl MediaCache {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            infos: Mutex::new(HashMap::new()),
        }
    }
}

impl MediaInfoProvider for MediaCache {
    fn get_media_info<'a>(&'a self, media_id: &'a MediaId) -> BoxFuture<'a, Option<Arc<MediaInfo>>> {
        Box::pin(async move {
            if let Some(info) = self.get_media_info_sync(media_id) {
                return Some(info);
            }

            if media_id.kind() != MediaKind::Illust {
                debug!("No media info for {media_id}");
                return None;
            }

            let key = media_id.without_page();
            match self.catalog.chapter_info(key.id()).await {
                Ok(info) => {
                    let info = Arc::new(info);
                    self.infos.lock().insert(key, info.clone());
                    Some(info)
                }
                Err(e) => {
                    warn!("Couldn't load media info for {key}: {e}");
                    None
                }
            }
        })
    }

    fn get_media_info_sync(&self, media_id: &MediaId) -> Option<Arc<MediaInfo>> {
        self.infos.lock().get(&media_id.without_page()).cloned()
    }
}

/// Guesses a page's image URL from whatever info is already cached, without
/// making requests. Ids whose guesses turned out wrong aren't guessed again.
pub struct GuessImageUrl {
    media: Arc<dyn MediaInfoProvider>,
    incorrect: Mutex<HashSet<MediaId>>,
}

impl GuessImageUrl {
    pub fn new(media: Arc<dyn MediaInfoProvider>) -> Self {
        Self {
            media,
            incorrect: Mutex::new(HashSet::new()),
        }
    }
}

impl UrlGuesser for GuessImageUrl {
    fn guess_url<'a>(&'a self, media_id: &'a MediaId) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            if self.incorrect.lock().contains(media_id) {
                return None;
            }
            let info = self.media.get_media_info_sync(media_id)?;
            info.main_image_url(media_id.page()).map(str::to_string)
        })
    }

    fn guessed_url_incorrect(&self, media_id: &MediaId) {
        debug!("Guessed URL for {media_id} was wrong");
        self.incorrect.lock().insert(media_id.clone());
    }
}
