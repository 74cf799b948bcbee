//! The app controller: owns the screens and switches data sources and screens
//! when the location changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossterm::event::KeyEvent;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::actor::{Actor, ActorOptions, ActorRegistry};
use crate::data_source::{same_data_source, DataSource, DataSourceFactory};
use crate::error::AppError;
use crate::media::{MediaId, MediaKind};
use crate::navigation::{Args, NavigateOptions, NavigationCause, Navigator};
use crate::ui::screen::{ActivateParams, Screen, ScreenName};

/// Clicks arriving this soon after entering the search screen are ignored.
/// Pointer release from the viewer can land on a listing row that appeared
/// underneath it.
pub const IGNORE_CLICKS_AFTER_SEARCH: Duration = Duration::from_millis(100);

/// Something outside the screens that follows the current data source, like
/// the status bar.
pub trait DataSourceObserver: Send + Sync {
    fn set_data_source(&self, data_source: &Arc<dyn DataSource>);
    fn set_media_id(&self, media_id: Option<&MediaId>);
}

#[derive(Default)]
struct CoordinatorState {
    data_source: Option<Arc<dyn DataSource>>,
    current_screen: Option<ScreenName>,
    ignore_clicks_until: Option<Instant>,
}

pub struct App {
    actor: Actor,
    navigator: Arc<Navigator>,
    data_sources: Arc<dyn DataSourceFactory>,
    screens: Mutex<HashMap<ScreenName, Arc<dyn Screen>>>,
    observers: Mutex<Vec<Arc<dyn DataSourceObserver>>>,
    state: Mutex<CoordinatorState>,

    /// Held for the duration of a transition.
    transition_lock: tokio::sync::Mutex<()>,
    /// The token of the most recent transition request.
    latest_token: AtomicU64,
    screen_changed: broadcast::Sender<ScreenName>,
}

impl App {
    pub fn new(
        registry: &ActorRegistry,
        navigator: Arc<Navigator>,
        data_sources: Arc<dyn DataSourceFactory>,
    ) -> Self {
        let (screen_changed, _) = broadcast::channel(16);
        Self {
            actor: Actor::new(registry, ActorOptions::named("app")),
            navigator,
            data_sources,
            screens: Mutex::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
            state: Mutex::new(CoordinatorState::default()),
            transition_lock: tokio::sync::Mutex::new(()),
            latest_token: AtomicU64::new(0),
            screen_changed,
        }
    }

    /// The root of the screen actors.
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn navigator(&self) -> &Arc<Navigator> {
        &self.navigator
    }

    /// Screens start hidden until a transition shows them.
    pub fn register_screen(&self, screen: Arc<dyn Screen>) {
        screen.actor().set_visible(false);
        self.screens.lock().insert(screen.name(), screen);
    }

    pub fn add_observer(&self, observer: Arc<dyn DataSourceObserver>) {
        self.observers.lock().push(observer);
    }

    pub fn subscribe_screen_changed(&self) -> broadcast::Receiver<ScreenName> {
        self.screen_changed.subscribe()
    }

    pub fn current_data_source(&self) -> Option<Arc<dyn DataSource>> {
        self.state.lock().data_source.clone()
    }

    pub fn current_screen_name(&self) -> Option<ScreenName> {
        self.state.lock().current_screen
    }

    pub fn displayed_screen(&self) -> Option<Arc<dyn Screen>> {
        let name = self.current_screen_name()?;
        self.screen(name)
    }

    fn screen(&self, name: ScreenName) -> Option<Arc<dyn Screen>> {
        self.screens.lock().get(&name).cloned()
    }

    /// Create the data source for the current location and show it.
    ///
    /// If a transition is already running, this waits for it to finish first.
    /// If another request arrives while we're waiting, this one is dropped in
    /// favor of it.
    pub async fn set_current_data_source(&self, cause: NavigationCause) -> Result<(), AppError> {
        let token = self.latest_token.fetch_add(1, Ordering::SeqCst) + 1;

        let _guard = self.transition_lock.lock().await;
        if self.latest_token.load(Ordering::SeqCst) != token {
            debug!("Transition for {cause} was superseded");
            return Ok(());
        }

        self.transition(&cause).await
    }

    async fn transition(&self, cause: &NavigationCause) -> Result<(), AppError> {
        // Remember what we were displaying before we change anything.
        let old_screen_name = self.current_screen_name();
        let old_screen = old_screen_name.and_then(|name| self.screen(name));
        let old_media_id = old_screen.as_ref().and_then(|s| s.displayed_media_id());

        let args = self.navigator.location();
        let data_source = self.data_sources.create_data_source_for_url(&args, false);

        let new_screen_name = match args.get("view") {
            None => data_source.default_screen(),
            Some(view) => view.parse().unwrap_or_else(|e| {
                warn!("{e}, showing the default screen");
                data_source.default_screen()
            }),
        };

        // If the data source is changing, set it up.
        let replaced = {
            let mut state = self.state.lock();
            match &state.data_source {
                Some(current) if same_data_source(current, &data_source) => None,
                _ => Some(state.data_source.replace(data_source.clone())),
            }
        };
        if let Some(previous) = replaced {
            if let Some(previous) = previous {
                previous.shutdown();
                if previous.is_transient() {
                    self.data_sources.discard_data_source(&previous);
                }
            }
            data_source.startup();
        }

        // Only the viewer displays a specific media id.
        let media_id = match new_screen_name {
            ScreenName::Illust => data_source.current_media_id(&args),
            ScreenName::Search => None,
        };

        if new_screen_name == ScreenName::Search {
            self.state.lock().ignore_clicks_until = Some(Instant::now() + IGNORE_CLICKS_AFTER_SEARCH);
        }

        info!(
            "Showing screen: {}, data source: {}, cause: {}, media ID: {}",
            new_screen_name,
            data_source.name(),
            cause,
            media_id
                .as_ref()
                .map_or_else(|| "(none)".to_string(), |id| id.to_string())
        );

        let new_screen = self
            .screen(new_screen_name)
            .ok_or_else(|| AppError::UnknownScreen(new_screen_name.to_string()))?;
        self.state.lock().current_screen = Some(new_screen_name);

        let screen_changed = old_screen_name != Some(new_screen_name);
        if screen_changed {
            self.show_screen(old_screen.as_ref(), &new_screen);
        }

        new_screen.set_data_source(data_source.clone());

        let displayed_media_id = media_id.clone().or_else(|| new_screen.displayed_media_id());
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer.set_data_source(&data_source);
            observer.set_media_id(displayed_media_id.as_ref());
        }

        let params = ActivateParams {
            media_id,
            old_media_id,
            restore_history: cause.restores_history(),
        };
        if let Err(source) = new_screen.activate(params).await {
            error!("Activating the {new_screen_name} screen failed: {source}");

            // The old screen was never deactivated, so go back to it.
            if screen_changed {
                new_screen.deactivate();
                if let Some(old_screen) = &old_screen {
                    self.show_screen(Some(&new_screen), old_screen);
                } else {
                    new_screen.actor().set_visible(false);
                }
                self.state.lock().current_screen = old_screen_name;
            }

            return Err(AppError::ScreenActivation {
                screen: new_screen_name.to_string(),
                source: Box::new(source),
            });
        }

        if screen_changed {
            if let Some(old_screen) = old_screen {
                old_screen.deactivate();
            }
        }
        Ok(())
    }

    fn show_screen(&self, old: Option<&Arc<dyn Screen>>, new: &Arc<dyn Screen>) {
        if let Some(old) = old {
            old.actor().set_visible(false);
        }
        new.actor().set_visible(true);
        let _ = self.screen_changed.send(new.name());
    }

    /// Recreate the data source for the current location and show it again.
    pub async fn refresh_current_data_source(&self) -> Result<(), AppError> {
        if self.current_data_source().is_none() {
            return Ok(());
        }

        let args = self.navigator.location();
        info!("Refreshing data source for {args}");
        self.data_sources.create_data_source_for_url(&args, true);
        self.set_current_data_source(NavigationCause::Refresh).await
    }

    /// The location that displays `media_id` on `screen`.
    pub fn media_url(&self, media_id: &MediaId, screen: ScreenName) -> Args {
        // Series open their chapter listing.
        if media_id.kind() == MediaKind::Manga {
            return Args::new(format!("/manga/{}", urlencoding::encode(media_id.id())));
        }

        let mut args = self.navigator.location();
        let mut screen = screen;

        // Folders always open on the search screen, without the current filters.
        if media_id.kind() == MediaKind::Folder {
            screen = ScreenName::Search;
            args = Args::new("/");
        }

        let data_source = self
            .current_data_source()
            .unwrap_or_else(|| self.data_sources.create_data_source_for_url(&args, false));

        if screen == data_source.default_screen() {
            args.remove("view");
        } else {
            args.set("view", screen.as_str());
        }

        match screen {
            ScreenName::Search => {
                args.remove("page");
                args.remove("illust_id");
                args.remove("slideshow");
            }
            ScreenName::Illust => data_source.set_current_media_id(media_id, &mut args),
        }
        args
    }

    /// Show a media id. This only changes the location; the transition happens
    /// when the navigation cause reaches the event loop.
    pub fn show_media_id(&self, media_id: &MediaId, screen: ScreenName, add_to_history: bool) {
        let args = self.media_url(media_id, screen);
        self.navigator.navigate(
            args,
            NavigateOptions {
                add_to_history,
                ..NavigateOptions::default()
            },
        );
    }

    /// Send a key press to the displayed screen.
    pub fn handle_key(&self, key: KeyEvent) -> bool {
        match self.displayed_screen() {
            Some(screen) => screen.handle_key(key),
            None => false,
        }
    }

    pub fn should_ignore_click(&self) -> bool {
        match self.state.lock().ignore_clicks_until {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }

    /// Turn the slideshow on or off while viewing an image.
    pub fn toggle_slideshow(&self) {
        self.set_slideshow_mode("1", "toggle slideshow");
    }

    pub fn loop_slideshow(&self) {
        self.set_slideshow_mode("loop", "loop");
    }

    fn set_slideshow_mode(&self, mode: &str, cause: &str) {
        if self.current_screen_name() != Some(ScreenName::Illust) {
            return;
        }

        let mut args = self.navigator.location();
        if args.get("slideshow") == Some(mode) {
            args.remove("slideshow");
        } else {
            args.set("slideshow", mode);
        }

        // This is a settings change on the current image, so it replaces the
        // history entry.
        self.navigator.navigate(
            args,
            NavigateOptions {
                add_to_history: false,
                cause: cause.into(),
                send_popstate: true,
            },
        );
    }

    /// Shut down every screen.
    pub fn shutdown(&self) {
        self.actor.shutdown();
    }
}
