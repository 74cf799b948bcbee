//! The listing screen: popular and recent series, search results and chapter
//! lists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crossterm::event::{KeyCode, KeyEvent};
use futures::future::BoxFuture;
use log::{debug, warn};
use parking_lot::Mutex;

use super::screen::{ActivateParams, Screen, ScreenName};
use crate::actor::{Actor, ActorOptions, ActorRegistry};
use crate::app::App;
use crate::data_source::{same_data_source, DataSource, ListingEntry};
use crate::error::AppError;
use crate::media::MediaId;
use crate::navigation::{Args, NavigateOptions};

#[derive(Default)]
struct SearchState {
    data_source: Option<Arc<dyn DataSource>>,
    entries: Vec<ListingEntry>,
    selected: usize,
    /// Selection to come back to, by data source location.
    saved_selections: HashMap<String, usize>,
    loading: bool,
    error: Option<String>,
    /// Search text being typed, if the prompt is open.
    prompt: Option<String>,
}

impl SearchState {
    fn save_selection(&mut self) {
        if let Some(data_source) = &self.data_source {
            self.saved_selections
                .insert(data_source.url().to_string(), self.selected);
        }
    }
}

/// What the renderer needs to draw the listing.
#[derive(Debug, Clone, Default)]
pub struct SearchView {
    pub title: String,
    pub entries: Vec<ListingEntry>,
    pub selected: usize,
    pub loading: bool,
    pub error: Option<String>,
    pub prompt: Option<String>,
}

pub struct SearchScreen {
    actor: Actor,
    app: Weak<App>,
    active: AtomicBool,
    state: Mutex<SearchState>,
}

impl SearchScreen {
    pub fn new(registry: &ActorRegistry, app: &Arc<App>) -> Arc<Self> {
        Arc::new(Self {
            actor: Actor::new(registry, ActorOptions::named("search").parent(app.actor())),
            app: Arc::downgrade(app),
            active: AtomicBool::new(false),
            state: Mutex::new(SearchState::default()),
        })
    }

    pub fn view(&self) -> SearchView {
        let state = self.state.lock();
        let title = match &state.data_source {
            Some(data_source) => data_source_title(data_source.as_ref()),
            None => String::new(),
        };
        SearchView {
            title,
            entries: state.entries.clone(),
            selected: state.selected,
            loading: state.loading,
            error: state.error.clone(),
            prompt: state.prompt.clone(),
        }
    }

    fn selected_entry(&self) -> Option<ListingEntry> {
        let state = self.state.lock();
        state.entries.get(state.selected).cloned()
    }

    fn move_selection(&self, step: isize) {
        let mut state = self.state.lock();
        if state.entries.is_empty() {
            return;
        }
        let last = state.entries.len() - 1;
        state.selected = state.selected.saturating_add_signed(step).min(last);
    }

    fn open_selected(&self) {
        let (Some(app), Some(entry)) = (self.app.upgrade(), self.selected_entry()) else {
            return;
        };
        app.show_media_id(&entry.media_id, ScreenName::Illust, true);
    }

    fn navigate(&self, path: String) {
        if let Some(app) = self.app.upgrade() {
            app.navigator().navigate(Args::new(path), NavigateOptions::default());
        }
    }

    fn refresh(&self) {
        let Some(app) = self.app.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = app.refresh_current_data_source().await {
                warn!("Refresh failed: {e}");
            }
        });
    }

    /// Keys while the search prompt is open.
    fn handle_prompt_key(&self, key: KeyEvent) {
        let mut state = self.state.lock();
        let Some(prompt) = state.prompt.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Char(c) => prompt.push(c),
            KeyCode::Backspace => {
                prompt.pop();
            }
            KeyCode::Esc => state.prompt = None,
            KeyCode::Enter => {
                let query = state.prompt.take().unwrap_or_default();
                let query = query.trim();
                if query.is_empty() {
                    return;
                }
                let path = format!("/search/{}", urlencoding::encode(query));
                drop(state);
                self.navigate(path);
            }
            _ => {}
        }
    }
}

fn data_source_title(data_source: &dyn DataSource) -> String {
    match data_source.name() {
        "popular" => "Popular Now".to_string(),
        "recent" => "Recently Updated".to_string(),
        "search" => {
            let query = Args::new(data_source.url()).segments().pop().unwrap_or_default();
            format!("Search: {query}")
        }
        "chapters" => "Chapters".to_string(),
        other => other.to_string(),
    }
}

/// Where the selection goes when the listing is shown.
fn initial_selection(
    entries: &[ListingEntry],
    old_media_id: Option<&MediaId>,
    saved: Option<usize>,
) -> usize {
    // Select whatever the viewer was showing.
    if let Some(old) = old_media_id {
        let old = old.without_page();
        if let Some(idx) = entries.iter().position(|e| e.media_id.without_page() == old) {
            return idx;
        }
    }
    saved.unwrap_or(0).min(entries.len().saturating_sub(1))
}

impl Screen for SearchScreen {
    fn name(&self) -> ScreenName {
        ScreenName::Search
    }

    fn actor(&self) -> &Actor {
        &self.actor
    }

    fn activate(&self, params: ActivateParams) -> BoxFuture<'_, Result<(), AppError>> {
        Box::pin(async move {
            self.active.store(true, Ordering::SeqCst);

            let data_source = {
                let mut state = self.state.lock();
                state.loading = true;
                state.error = None;
                state.data_source.clone().ok_or(AppError::NoMedia)?
            };

            let signal = self.actor.signal();
            let result = tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(AppError::Cancelled),
                result = data_source.load() => result,
            };

            let mut state = self.state.lock();
            let still_current = state
                .data_source
                .as_ref()
                .is_some_and(|current| same_data_source(current, &data_source));
            if !still_current {
                debug!("Listing for {} finished after the data source changed", data_source.url());
                return Ok(());
            }

            state.loading = false;
            match result {
                Ok(entries) => {
                    let saved = if params.restore_history {
                        state.saved_selections.get(data_source.url()).copied()
                    } else {
                        None
                    };
                    state.selected = initial_selection(&entries, params.old_media_id.as_ref(), saved);
                    state.entries = entries;
                }
                Err(e) => {
                    // Keep the screen up so the error is visible and the user can retry.
                    warn!("Loading {} failed: {}", data_source.url(), e);
                    state.entries.clear();
                    state.selected = 0;
                    state.error = Some(e.to_string());
                }
            }
            Ok(())
        })
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.save_selection();
        state.prompt = None;
    }

    fn active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn displayed_media_id(&self) -> Option<MediaId> {
        None
    }

    fn set_data_source(&self, data_source: Arc<dyn DataSource>) {
        let mut state = self.state.lock();
        let changed = !state
            .data_source
            .as_ref()
            .is_some_and(|current| same_data_source(current, &data_source));
        if !changed {
            return;
        }
        state.save_selection();
        state.entries = data_source.entries();
        state.selected = 0;
        state.data_source = Some(data_source);
    }

    fn handle_key(&self, key: KeyEvent) -> bool {
        if self.state.lock().prompt.is_some() {
            self.handle_prompt_key(key);
            return true;
        }

        match key.code {
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(10),
            KeyCode::PageUp => self.move_selection(-10),
            KeyCode::Enter => self.open_selected(),
            KeyCode::Char('/') => self.state.lock().prompt = Some(String::new()),
            KeyCode::Char('1') => self.navigate("/".to_string()),
            KeyCode::Char('2') => self.navigate("/recent".to_string()),
            KeyCode::Char('r') => self.refresh(),
            KeyCode::Esc | KeyCode::Backspace => {
                let Some(app) = self.app.upgrade() else {
                    return false;
                };
                return app.navigator().back();
            }
            _ => return false,
        }
        true
    }
}
