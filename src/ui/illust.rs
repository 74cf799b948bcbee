//! The image viewer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent};
use futures::future::BoxFuture;
use image::DynamicImage;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::screen::{ActivateParams, Screen, ScreenName};
use crate::actor::{Actor, ActorOptions, ActorRegistry};
use crate::app::App;
use crate::backend::cache::PageCache;
use crate::backend::muting::MuteList;
use crate::data_source::DataSource;
use crate::error::{AppError, LoadError};
use crate::loader::Transport;
use crate::media::{MediaId, MediaInfo, MediaInfoProvider, MutePolicy};
use crate::preloader::ImagePreloader;
use crate::signal::AbortController;

/// What the viewer loads images with.
pub struct IllustDeps {
    pub preloader: ImagePreloader,
    pub media: Arc<dyn MediaInfoProvider>,
    pub transport: Arc<dyn Transport>,
    pub cache: Option<PageCache>,
    pub mutes: Arc<MuteList>,
}

#[derive(Default)]
struct IllustState {
    data_source: Option<Arc<dyn DataSource>>,
    media_id: Option<MediaId>,
    info: Option<Arc<MediaInfo>>,
    image: Option<DynamicImage>,
    /// Bumped whenever `image` changes.
    image_version: u64,
    loading: bool,
    muted: bool,
    error: Option<String>,
    image_load: Option<AbortController>,
    slideshow: Option<AbortController>,
    /// The last speculative preload update. It isn't aborted: the preloader
    /// discards stale results itself, and each update waits for the one
    /// before it so an older id can't land last.
    speculative: Option<JoinHandle<()>>,
    /// Clearing the preloader after deactivation. Activation waits for this so
    /// it can't clear the next image.
    preloader_clear: Option<JoinHandle<()>>,
}

impl IllustState {
    fn stop_tasks(&mut self) {
        if let Some(load) = self.image_load.take() {
            load.abort();
        }
        if let Some(slideshow) = self.slideshow.take() {
            slideshow.abort();
        }
    }
}

/// What the renderer needs to draw the viewer.
#[derive(Debug, Clone, Default)]
pub struct IllustView {
    pub title: String,
    pub user_name: String,
    pub page: usize,
    pub page_count: usize,
    pub loading: bool,
    pub muted: bool,
    pub error: Option<String>,
    pub image_version: u64,
}

pub struct IllustScreen {
    me: Weak<IllustScreen>,
    actor: Actor,
    app: Weak<App>,
    deps: IllustDeps,
    slideshow_interval: Duration,
    active: AtomicBool,
    state: Mutex<IllustState>,
}

impl IllustScreen {
    pub fn new(
        registry: &ActorRegistry,
        app: &Arc<App>,
        deps: IllustDeps,
        slideshow_interval: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            actor: Actor::new(registry, ActorOptions::named("illust").parent(app.actor())),
            app: Arc::downgrade(app),
            deps,
            slideshow_interval,
            active: AtomicBool::new(false),
            state: Mutex::new(IllustState::default()),
        })
    }

    pub fn view(&self) -> IllustView {
        let state = self.state.lock();
        let (title, user_name, page_count) = match &state.info {
            Some(info) => (info.title.clone(), info.user_name.clone(), info.page_count()),
            None => (String::new(), String::new(), 0),
        };
        IllustView {
            title,
            user_name,
            page: state.media_id.as_ref().map_or(0, MediaId::page),
            page_count,
            loading: state.loading,
            muted: state.muted,
            error: state.error.clone(),
            image_version: state.image_version,
        }
    }

    /// The displayed image, if it changed since `version`.
    pub fn image_if_newer(&self, version: u64) -> Option<(u64, Option<DynamicImage>)> {
        let state = self.state.lock();
        if state.image_version == version {
            return None;
        }
        Some((state.image_version, state.image.clone()))
    }

    fn current(&self) -> Option<(MediaId, Arc<MediaInfo>)> {
        let state = self.state.lock();
        Some((state.media_id.clone()?, state.info.clone()?))
    }

    fn data_source(&self) -> Option<Arc<dyn DataSource>> {
        self.state.lock().data_source.clone()
    }

    /// The page after `media_id`, continuing into the next chapter.
    fn next_page(&self, media_id: &MediaId, info: &MediaInfo) -> Option<MediaId> {
        if media_id.page() + 1 < info.page_count() {
            return Some(media_id.with_page(media_id.page() + 1));
        }
        self.data_source()?.neighbor(media_id, 1).map(|id| id.with_page(0))
    }

    fn previous_page(&self, media_id: &MediaId) -> Option<MediaId> {
        if media_id.page() > 0 {
            return Some(media_id.with_page(media_id.page() - 1));
        }
        self.data_source()?.neighbor(media_id, -1).map(|id| id.with_page(0))
    }

    fn show(&self, media_id: Option<MediaId>, add_to_history: bool) -> bool {
        let (Some(app), Some(media_id)) = (self.app.upgrade(), media_id) else {
            return false;
        };
        app.show_media_id(&media_id, ScreenName::Illust, add_to_history);
        true
    }

    fn start_image_load(&self, media_id: MediaId, url: String) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let controller = AbortController::derived_from(&self.actor.signal());
        let signal = controller.signal();
        {
            let mut state = self.state.lock();
            if let Some(previous) = state.image_load.replace(controller) {
                previous.abort();
            }
            state.loading = true;
        }

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = signal.cancelled() => return,
                result = me.load_image(&url) => result,
            };

            let mut state = me.state.lock();
            if state.media_id.as_ref() != Some(&media_id) {
                debug!("Discarding image for {media_id}, the viewer moved on");
                return;
            }
            state.loading = false;
            match result {
                Ok(image) => {
                    state.image = Some(image);
                    state.image_version += 1;
                }
                Err(e) => {
                    warn!("Couldn't load {media_id}: {e}");
                    state.error = Some(e.to_string());
                }
            }
        });
    }

    async fn load_image(&self, url: &str) -> Result<DynamicImage, LoadError> {
        if let Some(cache) = &self.deps.cache {
            if let Some(image) = cache.get_page(url).await {
                return Ok(image);
            }
        }

        let bytes = self.deps.transport.fetch(url).await?;
        let image = image::load_from_memory(&bytes).map_err(|source| LoadError::Decode {
            url: url.to_string(),
            source,
        })?;
        if let Some(cache) = &self.deps.cache {
            cache.insert_page(url.to_string(), image.clone()).await;
        }
        Ok(image)
    }

    fn update_slideshow(&self, mode: Option<&str>) {
        let mut state = self.state.lock();
        if let Some(slideshow) = state.slideshow.take() {
            slideshow.abort();
        }
        let (Some(mode), Some(me)) = (mode, self.me.upgrade()) else {
            return;
        };

        // Each activation runs one step. Advancing re-activates the viewer,
        // which schedules the next one.
        let controller = AbortController::derived_from(&self.actor.signal());
        let signal = controller.signal();
        state.slideshow = Some(controller);
        let looping = mode == "loop";
        let interval = self.slideshow_interval;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = signal.cancelled() => {}
                _ = tokio::time::sleep(interval) => me.advance_slideshow(looping),
            }
        });
    }

    fn advance_slideshow(&self, looping: bool) {
        if !self.actor.visible_recursively() {
            debug!("Not advancing the slideshow while hidden");
            return;
        }
        let Some((media_id, info)) = self.current() else {
            return;
        };
        let next = if looping && media_id.page() + 1 >= info.page_count() {
            Some(media_id.with_page(0))
        } else {
            self.next_page(&media_id, &info)
        };
        if !self.show(next, false) {
            debug!("Slideshow reached the end at {media_id}");
        }
    }

    fn toggle_mute(&self) {
        let Some((media_id, info)) = self.current() else {
            return;
        };
        if info.user_id.is_empty() {
            return;
        }

        let user_muted = self.deps.mutes.toggle_user(&info.user_id);
        info!(
            "{} uploader {}",
            if user_muted { "Muted" } else { "Unmuted" },
            info.user_name
        );

        let muted = user_muted || self.deps.mutes.any_tag_muted(&info.tags);
        let reload = {
            let mut state = self.state.lock();
            state.muted = muted;
            !muted && state.image.is_none()
        };
        if reload {
            if let Some(url) = info.main_image_url(media_id.page()) {
                self.start_image_load(media_id.clone(), url.to_string());
            }
        }
    }

    fn open_in_browser(&self) {
        let Some(media_id) = self.state.lock().media_id.clone() else {
            return;
        };
        let url = format!(
            "https://mangadex.org/chapter/{}/{}",
            media_id.id(),
            media_id.page() + 1
        );
        if let Err(e) = webbrowser::open(&url) {
            error!("Couldn't open {url}: {e}");
        }
    }

    fn leave(&self) -> bool {
        let Some(app) = self.app.upgrade() else {
            return false;
        };
        if app.navigator().back() {
            return true;
        }
        let media_id = self.state.lock().media_id.clone();
        match media_id {
            Some(media_id) => {
                app.show_media_id(&media_id, ScreenName::Search, true);
                true
            }
            None => false,
        }
    }

    async fn activate_media(&self, media_id: MediaId) -> Result<(), AppError> {
        let pending_clear = {
            let mut state = self.state.lock();
            state.stop_tasks();
            if state.media_id.as_ref() != Some(&media_id) {
                state.image = None;
                state.image_version += 1;
            }
            state.media_id = Some(media_id.clone());
            state.loading = true;
            state.muted = false;
            state.error = None;
            state.preloader_clear.take()
        };
        if let Some(pending_clear) = pending_clear {
            let _ = pending_clear.await;
        }

        let signal = self.actor.signal();
        let info = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(AppError::Cancelled),
            info = self.deps.media.get_media_info(&media_id) => info,
        };
        let info = info.ok_or_else(|| AppError::MissingMedia(media_id.clone()))?;
        let url = info
            .main_image_url(media_id.page())
            .ok_or_else(|| AppError::MissingPage {
                media_id: media_id.without_page(),
                page: media_id.page(),
            })?
            .to_string();

        // The info is cached now, so this only starts the preloads.
        self.deps.preloader.set_current_image(Some(media_id.clone())).await;

        let muted = self.deps.mutes.is_user_id_muted(&info.user_id)
            || self.deps.mutes.any_tag_muted(&info.tags);
        {
            let mut state = self.state.lock();
            state.info = Some(info.clone());
            state.muted = muted;
            if muted {
                state.loading = false;
            }
        }
        if !muted {
            self.start_image_load(media_id.clone(), url);
        }

        // Preload what's likely to be viewed next. This can need another info
        // request, so it isn't waited for.
        let next = self.next_page(&media_id, &info);
        let preloader = self.deps.preloader.clone();
        {
            let mut state = self.state.lock();
            let previous = state.speculative.take();
            state.speculative = Some(tokio::spawn(async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                preloader.set_speculative_image(next).await;
            }));
        }

        let slideshow = self
            .app
            .upgrade()
            .and_then(|app| app.navigator().location().get("slideshow").map(str::to_string));
        self.update_slideshow(slideshow.as_deref());
        Ok(())
    }
}

impl Screen for IllustScreen {
    fn name(&self) -> ScreenName {
        ScreenName::Illust
    }

    fn actor(&self) -> &Actor {
        &self.actor
    }

    fn activate(&self, params: ActivateParams) -> BoxFuture<'_, Result<(), AppError>> {
        Box::pin(async move {
            let media_id = params.media_id.ok_or(AppError::NoMedia)?;
            self.active.store(true, Ordering::SeqCst);

            let result = self.activate_media(media_id).await;
            if let Err(e) = &result {
                let mut state = self.state.lock();
                state.loading = false;
                state.error = Some(e.to_string());
            }
            result
        })
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);

        let mut state = self.state.lock();
        state.stop_tasks();
        let speculative = state.speculative.take();

        let preloader = self.deps.preloader.clone();
        state.preloader_clear = Some(tokio::spawn(async move {
            if let Some(speculative) = speculative {
                let _ = speculative.await;
            }
            preloader.set_current_image(None).await;
            preloader.set_speculative_image(None).await;
        }));
    }

    fn active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn displayed_media_id(&self) -> Option<MediaId> {
        self.state.lock().media_id.clone()
    }

    fn set_data_source(&self, data_source: Arc<dyn DataSource>) {
        self.state.lock().data_source = Some(data_source);
    }

    fn handle_key(&self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Right | KeyCode::Char('l') | KeyCode::Char(' ') | KeyCode::Enter => {
                let Some((media_id, info)) = self.current() else {
                    return false;
                };
                self.show(self.next_page(&media_id, &info), false)
            }
            KeyCode::Left | KeyCode::Char('h') => {
                let Some(media_id) = self.displayed_media_id() else {
                    return false;
                };
                self.show(self.previous_page(&media_id), false)
            }
            KeyCode::Char('n') | KeyCode::Char('p') => {
                let step = if key.code == KeyCode::Char('n') { 1 } else { -1 };
                let (Some(media_id), Some(data_source)) = (self.displayed_media_id(), self.data_source())
                else {
                    return false;
                };
                let chapter = data_source.neighbor(&media_id, step).map(|id| id.with_page(0));
                self.show(chapter, true)
            }
            KeyCode::Char('m') => {
                self.toggle_mute();
                true
            }
            KeyCode::Char('o') => {
                self.open_in_browser();
                true
            }
            KeyCode::Char('s') | KeyCode::Char('L') => {
                if let Some(app) = self.app.upgrade() {
                    if key.code == KeyCode::Char('s') {
                        app.toggle_slideshow();
                    } else {
                        app.loop_slideshow();
                    }
                }
                true
            }
            KeyCode::Esc | KeyCode::Backspace => self.leave(),
            _ => false,
        }
    }
}
