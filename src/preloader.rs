//! Image preloading.
//!
//! Preloading blindly works while the connection keeps up, but once loads back
//! up, stale preloads delay whatever the user actually wants to see next. The
//! preloader is told the media id that's currently displayed and the id that's
//! likely to be viewed next, keeps a short prioritized list of loads for them,
//! and cancels loads that are no longer wanted.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use log::{debug, error};
use parking_lot::Mutex;

use crate::backend::cache::PageCache;
use crate::config::{Config, PreloadConfig};
use crate::loader::{LoadOutcome, LoaderKind, ResourceLoader, Transport};
use crate::media::{
    should_preload_thumbs, MediaId, MediaInfo, MediaInfoProvider, MediaType, MutePolicy,
    UrlGuesser,
};

/// A load the preloader wants to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadRequest {
    pub kind: LoaderKind,
    pub url: String,
}

impl PreloadRequest {
    fn image(url: &str) -> Self {
        Self {
            kind: LoaderKind::Image,
            url: url.to_string(),
        }
    }

    fn fetch(url: &str) -> Self {
        Self {
            kind: LoaderKind::Fetch,
            url: url.to_string(),
        }
    }
}

/// Recently completed URLs, oldest evicted first.
struct RecentUrls {
    capacity: usize,
    order: VecDeque<String>,
    urls: HashSet<String>,
}

impl RecentUrls {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            urls: HashSet::new(),
        }
    }

    fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    fn push(&mut self, url: &str) {
        if !self.urls.insert(url.to_string()) {
            return;
        }
        self.order.push_back(url.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.urls.remove(&oldest);
            }
        }
    }
}

/// Where the preloader gets media info, URL guesses and mutes from, and how it
/// loads.
#[derive(Clone)]
pub struct PreloadDeps {
    pub media: Arc<dyn MediaInfoProvider>,
    pub guesser: Arc<dyn UrlGuesser>,
    pub muting: Arc<dyn MutePolicy>,
    pub transport: Arc<dyn Transport>,
    pub cache: Option<PageCache>,
}

struct PreloadState {
    current_media_id: Option<MediaId>,
    current_media_info: Option<Arc<MediaInfo>>,
    speculative_media_id: Option<MediaId>,
    speculative_media_info: Option<Arc<MediaInfo>>,

    /// Loaders we're running. Cancelled loaders stay here until they settle.
    preloads: Vec<Arc<ResourceLoader>>,
    recently_preloaded: RecentUrls,
    guessed_preload: Option<Arc<ResourceLoader>>,
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Current,
    Speculative,
}

/// Empties a slot if the update that set it is dropped before its info
/// arrives. Otherwise setting the same id again would be ignored and its
/// preloads would never start.
struct PendingSlot<'a> {
    state: &'a Mutex<PreloadState>,
    slot: Slot,
    media_id: MediaId,
    armed: bool,
}

impl<'a> PendingSlot<'a> {
    fn new(state: &'a Mutex<PreloadState>, slot: Slot, media_id: MediaId) -> Self {
        Self {
            state,
            slot,
            media_id,
            armed: true,
        }
    }

    fn finish(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let state = &mut *self.state.lock();
        let slot = match self.slot {
            Slot::Current => &mut state.current_media_id,
            Slot::Speculative => &mut state.speculative_media_id,
        };
        if slot.as_ref() == Some(&self.media_id) {
            debug!("{:?} image update for {} was dropped", self.slot, self.media_id);
            *slot = None;
        }
    }
}

struct PreloaderInner {
    config: PreloadConfig,
    mobile: bool,
    deps: PreloadDeps,
    state: Mutex<PreloadState>,
}

#[derive(Clone)]
pub struct ImagePreloader {
    inner: Arc<PreloaderInner>,
}

impl ImagePreloader {
    pub fn new(config: &Config, deps: PreloadDeps) -> Self {
        Self {
            inner: Arc::new(PreloaderInner {
                config: config.preload.clone(),
                mobile: config.mobile,
                deps,
                state: Mutex::new(PreloadState {
                    current_media_id: None,
                    current_media_info: None,
                    speculative_media_id: None,
                    speculative_media_info: None,
                    preloads: Vec::new(),
                    recently_preloaded: RecentUrls::new(config.preload.recent_capacity),
                    guessed_preload: None,
                }),
            }),
        }
    }

    /// Set the media id the user is viewing, or None if they aren't viewing an
    /// image.
    pub async fn set_current_image(&self, media_id: Option<MediaId>) {
        {
            let mut state = self.inner.state.lock();
            if state.current_media_id == media_id {
                return;
            }
            state.current_media_id = media_id.clone();
            state.current_media_info = None;
        }
        let pending = media_id
            .clone()
            .map(|id| PendingSlot::new(&self.inner.state, Slot::Current, id));

        self.guess_preload(media_id.as_ref()).await;

        let Some(media_id) = media_id else {
            return;
        };
        if !self.is_current(&media_id) {
            debug!("Current image changed while guessing {media_id}");
            return;
        }

        // This is usually already cached.
        let info = self.inner.deps.media.get_media_info(&media_id).await;

        if !self.is_current(&media_id) {
            debug!("Current image changed while loading {media_id}");
            return;
        }
        self.inner.state.lock().current_media_info = info;
        if let Some(pending) = pending {
            pending.finish();
        }

        self.check_fetch_queue();
    }

    /// Set the media id to load speculatively, usually the next image in the
    /// current search, or None to stop.
    pub async fn set_speculative_image(&self, media_id: Option<MediaId>) {
        {
            let mut state = self.inner.state.lock();
            if state.speculative_media_id == media_id {
                return;
            }
            state.speculative_media_id = media_id.clone();
            state.speculative_media_info = None;
        }

        let Some(media_id) = media_id else {
            return;
        };
        let pending = PendingSlot::new(&self.inner.state, Slot::Speculative, media_id.clone());

        let info = self.inner.deps.media.get_media_info(&media_id).await;

        {
            let mut state = self.inner.state.lock();
            if state.speculative_media_id.as_ref() != Some(&media_id) {
                debug!("Speculative image changed while loading {media_id}");
                return;
            }
            state.speculative_media_info = info;
        }
        pending.finish();

        self.check_fetch_queue();
    }

    fn is_current(&self, media_id: &MediaId) -> bool {
        self.inner.state.lock().current_media_id.as_ref() == Some(media_id)
    }

    /// Start or stop preloads. This runs when new media info arrives and when a
    /// preload finishes.
    fn check_fetch_queue(&self) {
        let mut state = self.inner.state.lock();

        // The loads we want, in priority order.
        let mut wanted = Vec::new();
        if let (Some(id), Some(info)) = (&state.current_media_id, &state.current_media_info) {
            wanted.extend(self.preloads_for_media(info, id));
        }
        if let (Some(id), Some(info)) = (&state.speculative_media_id, &state.speculative_media_info) {
            wanted.extend(self.preloads_for_media(info, id));
        }

        // Skip anything we've finished recently, and anything already listed.
        let mut seen = HashSet::new();
        wanted.retain(|request| {
            !state.recently_preloaded.contains(&request.url) && seen.insert(request.url.clone())
        });

        // If we don't want anything, let running preloads continue.
        if wanted.is_empty() {
            return;
        }

        // Loads past this point are started later, as these finish.
        wanted.truncate(self.inner.config.concurrent_preloads.max(1));

        // We only run one preload at a time. If a wanted one is running, let it
        // finish.
        let running = |url: &str| state.preloads.iter().any(|p| p.url() == url);
        if wanted.iter().any(|request| running(&request.url)) {
            return;
        }

        let request = &wanted[0];
        debug!("Starting preload: {}", request.url);
        let loader = Arc::new(self.create_loader(request));

        // Everything else that's running is either unwanted now or has been
        // pushed down the queue. Cancelled loaders stay listed until they settle.
        for preload in &state.preloads {
            debug!("Cancelling preload: {}", preload.url());
            preload.cancel();
        }
        state.preloads.push(loader.clone());
        drop(state);

        let preloader = self.clone();
        tokio::spawn(async move {
            let outcome = loader.start().await;
            preloader.preload_finished(&loader, outcome);
        });
    }

    fn preload_finished(
        &self,
        loader: &Arc<ResourceLoader>,
        outcome: Result<LoadOutcome, crate::error::LoadError>,
    ) {
        {
            let mut state = self.inner.state.lock();

            // Record the URL even if it failed, so failing images aren't retried
            // over and over. Cancellation just means the user navigated away.
            let cancelled = matches!(outcome, Ok(LoadOutcome::Cancelled));
            if !cancelled {
                state.recently_preloaded.push(loader.url());
            }

            match state.preloads.iter().position(|p| Arc::ptr_eq(p, loader)) {
                Some(idx) => {
                    state.preloads.remove(idx);
                }
                None => {
                    error!("Preload finished, but we weren't running it: {}", loader.url());
                    return;
                }
            }
        }

        self.check_fetch_queue();
    }

    fn create_loader(&self, request: &PreloadRequest) -> ResourceLoader {
        let deps = &self.inner.deps;
        ResourceLoader::new(request.kind, request.url.clone(), deps.transport.clone())
            .with_cache(deps.cache.clone())
    }

    /// The loads to run for a media item, in priority order.
    pub(crate) fn preloads_for_media(&self, info: &MediaInfo, media_id: &MediaId) -> Vec<PreloadRequest> {
        let muting = &self.inner.deps.muting;

        // Don't precache muted images.
        if muting.any_tag_muted(&info.tags) || muting.is_user_id_muted(&info.user_id) {
            return Vec::new();
        }

        let results = match &info.media_type {
            MediaType::Animation { archive_url } if !media_id.is_local() => {
                let mut results = Vec::new();
                if self.inner.config.preload_archives {
                    results.push(PreloadRequest::fetch(archive_url));
                }

                // The viewer shows the static frame until the archive is ready.
                if let Some(url) = info.main_image_url(0) {
                    results.push(PreloadRequest::image(url));
                }
                results
            }
            MediaType::Video => info
                .pages
                .first()
                .and_then(|page| page.poster_url.as_deref())
                .map(PreloadRequest::image)
                .into_iter()
                .collect(),
            _ => {
                // Thumbnails first, since they load much faster.
                let mut results: Vec<_> = info
                    .preview_urls
                    .iter()
                    .filter(|url| should_preload_thumbs(media_id, url))
                    .map(|url| PreloadRequest::image(url))
                    .collect();

                let page = media_id.page();
                if let Some(url) = info.main_image_url(page) {
                    results.push(PreloadRequest::image(url));
                }

                if !self.inner.mobile {
                    for (p, other) in info.pages.iter().enumerate() {
                        if p != page {
                            results.push(PreloadRequest::image(&other.url));
                        }
                    }
                }
                results
            }
        };

        results.into_iter().filter(|r| !r.url.is_empty()).collect()
    }

    /// Start loading a guessed URL before media info is available. If media_id
    /// is None, stop any running guessed preload.
    async fn guess_preload(&self, media_id: Option<&MediaId>) {
        if self.inner.mobile {
            return;
        }

        let deps = &self.inner.deps;
        let mut guessed_url = None;
        if let Some(media_id) = media_id {
            guessed_url = deps.guesser.guess_url(media_id).await;
        }

        let mut state = self.inner.state.lock();
        if let (Some(running), Some(url)) = (&state.guessed_preload, &guessed_url) {
            if running.url() == url {
                return;
            }
        }

        if let Some(previous) = state.guessed_preload.take() {
            previous.cancel();
        }

        let (Some(url), Some(media_id)) = (guessed_url, media_id) else {
            return;
        };

        debug!("Guessed {url} for {media_id}");
        let guesser = deps.guesser.clone();
        let guessed_id = media_id.clone();
        let loader = Arc::new(
            ResourceLoader::image(url, deps.transport.clone())
                .with_cache(deps.cache.clone())
                .on_error(move || guesser.guessed_url_incorrect(&guessed_id)),
        );
        state.guessed_preload = Some(loader.clone());
        drop(state);

        tokio::spawn(async move {
            let _ = loader.start().await;
        });
    }

    #[cfg(test)]
    fn running_urls(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        state.preloads.iter().map(|p| p.url().to_string()).collect()
    }

    #[cfg(test)]
    fn current_media_info(&self) -> Option<Arc<MediaInfo>> {
        self.inner.state.lock().current_media_info.clone()
    }

    #[cfg(test)]
    fn recently_preloaded(&self, url: &str) -> bool {
        self.inner.state.lock().recently_preloaded.contains(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::testing::FakeTransport;
    use crate::media::MediaPage;
    use futures::future::BoxFuture;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeMedia {
        infos: Mutex<HashMap<MediaId, Arc<MediaInfo>>>,
        /// Ids whose lookups wait until `gate` is notified.
        gated: Mutex<HashSet<MediaId>>,
        gate: Notify,
    }

    impl FakeMedia {
        fn add(&self, info: MediaInfo) {
            self.infos.lock().insert(info.media_id.without_page(), Arc::new(info));
        }
    }

    impl MediaInfoProvider for FakeMedia {
        fn get_media_info<'a>(&'a self, media_id: &'a MediaId) -> BoxFuture<'a, Option<Arc<MediaInfo>>> {
            Box::pin(async move {
                if self.gated.lock().contains(media_id) {
                    self.gate.notified().await;
                }
                self.get_media_info_sync(media_id)
            })
        }

        fn get_media_info_sync(&self, media_id: &MediaId) -> Option<Arc<MediaInfo>> {
            self.infos.lock().get(&media_id.without_page()).cloned()
        }
    }

    #[derive(Default)]
    struct FakeGuesser {
        guesses: Mutex<HashMap<MediaId, String>>,
        incorrect: Mutex<Vec<MediaId>>,
    }

    impl UrlGuesser for FakeGuesser {
        fn guess_url<'a>(&'a self, media_id: &'a MediaId) -> BoxFuture<'a, Option<String>> {
            Box::pin(async move { self.guesses.lock().get(media_id).cloned() })
        }

        fn guessed_url_incorrect(&self, media_id: &MediaId) {
            self.incorrect.lock().push(media_id.clone());
        }
    }

    #[derive(Default)]
    struct FakeMutes {
        tags: HashSet<String>,
        users: HashSet<String>,
    }

    impl MutePolicy for FakeMutes {
        fn any_tag_muted(&self, tags: &[String]) -> bool {
            tags.iter().any(|t| self.tags.contains(t))
        }

        fn is_user_id_muted(&self, user_id: &str) -> bool {
            self.users.contains(user_id)
        }
    }

    struct Fixture {
        media: Arc<FakeMedia>,
        guesser: Arc<FakeGuesser>,
        transport: Arc<FakeTransport>,
        preloader: ImagePreloader,
    }

    fn fixture_with(config: Config, mutes: FakeMutes, transport: FakeTransport) -> Fixture {
        let media = Arc::new(FakeMedia::default());
        let guesser = Arc::new(FakeGuesser::default());
        let transport = Arc::new(transport);
        let preloader = ImagePreloader::new(
            &config,
            PreloadDeps {
                media: media.clone(),
                guesser: guesser.clone(),
                muting: Arc::new(mutes),
                transport: transport.clone(),
                cache: None,
            },
        );
        Fixture {
            media,
            guesser,
            transport,
            preloader,
        }
    }

    fn fixture(transport: FakeTransport) -> Fixture {
        fixture_with(Config::default(), FakeMutes::default(), transport)
    }

    fn image_info(id: &str, pages: usize, previews: usize) -> MediaInfo {
        MediaInfo {
            media_id: id.parse().unwrap(),
            title: format!("Post {id}"),
            user_id: "artist".into(),
            user_name: "Artist".into(),
            tags: vec!["landscape".into()],
            media_type: MediaType::Image,
            preview_urls: (0..previews)
                .map(|p| format!("https://host/{id}/thumb{p}.jpg"))
                .collect(),
            pages: (0..pages)
                .map(|p| MediaPage {
                    url: format!("https://host/{id}/p{p}.png"),
                    poster_url: None,
                    width: 100,
                    height: 100,
                })
                .collect(),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    #[test]
    fn test_multi_page_requests() {
        let f = fixture(FakeTransport::default());
        let info = image_info("illust:100", 3, 2);
        let id: MediaId = "illust:100".parse().unwrap();

        let urls: Vec<_> = f
            .preloader
            .preloads_for_media(&info, &id)
            .into_iter()
            .map(|r| r.url)
            .collect();
        assert_eq!(
            urls,
            [
                "https://host/illust:100/thumb0.jpg",
                "https://host/illust:100/thumb1.jpg",
                "https://host/illust:100/p0.png",
                "https://host/illust:100/p1.png",
                "https://host/illust:100/p2.png",
            ]
        );
        let unique: HashSet<_> = urls.iter().collect();
        assert_eq!(unique.len(), urls.len());
    }

    #[test]
    fn test_requested_page_comes_first() {
        let f = fixture(FakeTransport::default());
        let info = image_info("illust:100", 3, 0);
        let id: MediaId = "illust:100-2".parse().unwrap();
        let urls: Vec<_> = f
            .preloader
            .preloads_for_media(&info, &id)
            .into_iter()
            .map(|r| r.url)
            .collect();
        assert_eq!(
            urls,
            [
                "https://host/illust:100/p2.png",
                "https://host/illust:100/p0.png",
                "https://host/illust:100/p1.png",
            ]
        );
    }

    #[test]
    fn test_mobile_only_preloads_requested_page() {
        let config = Config {
            mobile: true,
            ..Config::default()
        };
        let f = fixture_with(config, FakeMutes::default(), FakeTransport::default());
        let info = image_info("illust:100", 3, 1);
        let id: MediaId = "illust:100-1".parse().unwrap();
        let urls: Vec<_> = f
            .preloader
            .preloads_for_media(&info, &id)
            .into_iter()
            .map(|r| r.url)
            .collect();
        assert_eq!(
            urls,
            ["https://host/illust:100/thumb0.jpg", "https://host/illust:100/p1.png"]
        );
    }

    #[test]
    fn test_muted_media_has_no_preloads() {
        let mutes = FakeMutes {
            users: HashSet::from(["artist".to_string()]),
            ..Default::default()
        };
        let f = fixture_with(Config::default(), mutes, FakeTransport::default());

        let mut animation = image_info("illust:5", 1, 0);
        animation.media_type = MediaType::Animation {
            archive_url: "https://host/5.zip".into(),
        };
        let mut video = image_info("illust:6", 1, 0);
        video.media_type = MediaType::Video;

        for info in [image_info("illust:4", 3, 2), animation, video] {
            let id = info.media_id.clone();
            assert!(f.preloader.preloads_for_media(&info, &id).is_empty());
        }
    }

    #[test]
    fn test_animation_and_video_requests() {
        let f = fixture(FakeTransport::default());
        let mut animation = image_info("illust:5", 1, 1);
        animation.media_type = MediaType::Animation {
            archive_url: "https://host/5.zip".into(),
        };
        let id = animation.media_id.clone();
        assert_eq!(
            f.preloader.preloads_for_media(&animation, &id),
            [
                PreloadRequest::fetch("https://host/5.zip"),
                PreloadRequest::image("https://host/illust:5/p0.png"),
            ]
        );

        let mut video = image_info("illust:6", 1, 1);
        video.media_type = MediaType::Video;
        video.pages[0].poster_url = Some("https://host/6-poster.jpg".into());
        let id = video.media_id.clone();
        assert_eq!(
            f.preloader.preloads_for_media(&video, &id),
            [PreloadRequest::image("https://host/6-poster.jpg")]
        );

        let config = Config {
            preload: PreloadConfig {
                preload_archives: false,
                ..PreloadConfig::default()
            },
            ..Config::default()
        };
        let f = fixture_with(config, FakeMutes::default(), FakeTransport::default());
        let id = animation.media_id.clone();
        assert_eq!(
            f.preloader.preloads_for_media(&animation, &id),
            [PreloadRequest::image("https://host/illust:5/p0.png")]
        );
    }

    #[test]
    fn test_recent_urls_evict_oldest() {
        let mut recent = RecentUrls::new(1000);
        recent.push("first");
        for i in 0..999 {
            recent.push(&format!("url{i}"));
        }
        assert!(recent.contains("first"));

        recent.push("one more");
        assert!(!recent.contains("first"));
        assert!(recent.contains("url0"));
    }

    #[tokio::test]
    async fn test_runs_one_preload_at_a_time() {
        let f = fixture(FakeTransport::holding());
        f.media.add(image_info("illust:100", 3, 2));

        f.preloader.set_current_image(Some("illust:100".parse().unwrap())).await;
        assert_eq!(f.preloader.running_urls(), ["https://host/illust:100/thumb0.jpg"]);

        // Re-checking while the top request runs starts nothing new.
        f.preloader.check_fetch_queue();
        assert_eq!(f.preloader.running_urls().len(), 1);
    }

    #[tokio::test]
    async fn test_preloads_everything_in_priority_order() {
        let f = fixture(FakeTransport::default());
        f.media.add(image_info("illust:100", 3, 2));
        f.media.add(image_info("illust:101", 1, 0));

        f.preloader.set_current_image(Some("illust:100".parse().unwrap())).await;
        f.preloader
            .set_speculative_image(Some("illust:101".parse().unwrap()))
            .await;

        let transport = f.transport.clone();
        wait_until(|| transport.requested().len() == 6).await;
        wait_until(|| f.preloader.running_urls().is_empty()).await;

        assert_eq!(
            f.transport.requested(),
            [
                "https://host/illust:100/thumb0.jpg",
                "https://host/illust:100/thumb1.jpg",
                "https://host/illust:100/p0.png",
                "https://host/illust:100/p1.png",
                "https://host/illust:100/p2.png",
                "https://host/illust:101/p0.png",
            ]
        );
        assert!(f.preloader.recently_preloaded("https://host/illust:101/p0.png"));

        // Completed URLs aren't scheduled again.
        f.preloader.check_fetch_queue();
        assert!(f.preloader.running_urls().is_empty());
        assert_eq!(f.transport.requested().len(), 6);
    }

    #[tokio::test]
    async fn test_failed_loads_are_not_retried() {
        let transport = FakeTransport::default();
        transport
            .failing
            .lock()
            .insert("https://host/illust:7/p0.png".into());
        let f = fixture(transport);
        f.media.add(image_info("illust:7", 1, 0));

        f.preloader.set_current_image(Some("illust:7".parse().unwrap())).await;
        wait_until(|| f.preloader.recently_preloaded("https://host/illust:7/p0.png")).await;

        f.preloader.check_fetch_queue();
        assert_eq!(f.transport.requested().len(), 1);
    }

    #[tokio::test]
    async fn test_changing_image_cancels_stale_preload() {
        let f = fixture(FakeTransport::holding());
        f.media.add(image_info("illust:1", 1, 0));
        f.media.add(image_info("illust:2", 1, 0));

        f.preloader.set_current_image(Some("illust:1".parse().unwrap())).await;
        assert_eq!(f.preloader.running_urls(), ["https://host/illust:1/p0.png"]);

        f.preloader.set_current_image(Some("illust:2".parse().unwrap())).await;

        // The cancelled load settles and is dropped without being recorded.
        wait_until(|| f.preloader.running_urls() == ["https://host/illust:2/p0.png"]).await;
        assert!(!f.preloader.recently_preloaded("https://host/illust:1/p0.png"));

        f.transport.release_all();
        wait_until(|| f.preloader.recently_preloaded("https://host/illust:2/p0.png")).await;
    }

    #[tokio::test]
    async fn test_stale_media_info_is_discarded() {
        let f = fixture(FakeTransport::holding());
        f.media.add(image_info("illust:1", 1, 0));
        f.media.add(image_info("illust:2", 1, 0));
        let first: MediaId = "illust:1".parse().unwrap();
        f.media.gated.lock().insert(first.clone());

        let preloader = f.preloader.clone();
        let stale = tokio::spawn(async move { preloader.set_current_image(Some(first)).await });
        tokio::task::yield_now().await;

        f.preloader.set_current_image(Some("illust:2".parse().unwrap())).await;
        f.media.gate.notify_waiters();
        stale.await.unwrap();

        let info = f.preloader.current_media_info().unwrap();
        assert_eq!(info.media_id.to_string(), "illust:2");
        assert_eq!(f.preloader.running_urls(), ["https://host/illust:2/p0.png"]);
    }

    #[tokio::test]
    async fn test_dropped_speculative_update_can_be_repeated() {
        let f = fixture(FakeTransport::default());
        f.media.add(image_info("illust:50", 1, 0));
        let next: MediaId = "illust:50".parse().unwrap();
        f.media.gated.lock().insert(next.clone());

        let preloader = f.preloader.clone();
        let id = next.clone();
        let task = tokio::spawn(async move { preloader.set_speculative_image(Some(id)).await });
        tokio::task::yield_now().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        f.media.gated.lock().clear();
        f.preloader.set_speculative_image(Some(next)).await;

        let transport = f.transport.clone();
        wait_until(|| !transport.requested().is_empty()).await;
        assert_eq!(f.transport.requested(), ["https://host/illust:50/p0.png"]);
    }

    #[tokio::test]
    async fn test_dropped_current_update_can_be_repeated() {
        let f = fixture(FakeTransport::default());
        f.media.add(image_info("illust:51", 1, 0));
        let id: MediaId = "illust:51".parse().unwrap();
        f.media.gated.lock().insert(id.clone());

        let preloader = f.preloader.clone();
        let current = id.clone();
        let task = tokio::spawn(async move { preloader.set_current_image(Some(current)).await });
        tokio::task::yield_now().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        f.media.gated.lock().clear();
        f.preloader.set_current_image(Some(id)).await;

        let transport = f.transport.clone();
        wait_until(|| !transport.requested().is_empty()).await;
        assert_eq!(f.transport.requested(), ["https://host/illust:51/p0.png"]);
    }

    #[tokio::test]
    async fn test_guessed_preload_reports_bad_guess() {
        let transport = FakeTransport::default();
        transport.failing.lock().insert("https://host/guess.png".into());
        let f = fixture(transport);
        let id: MediaId = "illust:9".parse().unwrap();
        f.guesser
            .guesses
            .lock()
            .insert(id.clone(), "https://host/guess.png".into());

        // No media info: only the guess runs.
        f.preloader.set_current_image(Some(id.clone())).await;

        let guesser = f.guesser.clone();
        wait_until(|| !guesser.incorrect.lock().is_empty()).await;
        assert_eq!(f.guesser.incorrect.lock().clone(), [id]);
        assert_eq!(f.transport.requested(), ["https://host/guess.png"]);
    }

    #[tokio::test]
    async fn test_mobile_skips_guessing() {
        let config = Config {
            mobile: true,
            ..Config::default()
        };
        let f = fixture_with(config, FakeMutes::default(), FakeTransport::default());
        let id: MediaId = "illust:9".parse().unwrap();
        f.guesser
            .guesses
            .lock()
            .insert(id.clone(), "https://host/guess.png".into());

        f.preloader.set_current_image(Some(id)).await;
        tokio::task::yield_now().await;
        assert!(f.transport.requested().is_empty());
    }

    #[tokio::test]
    async fn test_muted_tags_yield_no_loads() {
        let mutes = FakeMutes {
            tags: HashSet::from(["landscape".to_string()]),
            ..Default::default()
        };
        let f = fixture_with(Config::default(), mutes, FakeTransport::default());
        f.media.add(image_info("illust:200", 2, 1));

        f.preloader.set_current_image(Some("illust:200".parse().unwrap())).await;

        assert!(f.preloader.current_media_info().is_some());
        assert!(f.preloader.running_urls().is_empty());
        tokio::task::yield_now().await;
        assert!(f.transport.requested().is_empty());
    }
}
