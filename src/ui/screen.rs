use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crossterm::event::KeyEvent;
use futures::future::BoxFuture;

use crate::actor::Actor;
use crate::data_source::DataSource;
use crate::error::AppError;
use crate::media::MediaId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenName {
    /// Listings and search results.
    Search,
    /// The image viewer.
    Illust,
}

impl ScreenName {
    pub fn as_str(self) -> &'static str {
        match self {
            ScreenName::Search => "search",
            ScreenName::Illust => "illust",
        }
    }
}

impl fmt::Display for ScreenName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScreenName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search" => Ok(ScreenName::Search),
            "illust" => Ok(ScreenName::Illust),
            other => Err(AppError::UnknownScreen(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActivateParams {
    /// The media to show, for the illust screen.
    pub media_id: Option<MediaId>,
    /// What the previous screen was showing.
    pub old_media_id: Option<MediaId>,
    pub restore_history: bool,
}

/// A full-window UI mode. Each screen is the root of an actor subtree; its
/// actor's `visible` flag says whether it's the current screen.
pub trait Screen: Send + Sync {
    fn name(&self) -> ScreenName;

    fn actor(&self) -> &Actor;

    fn activate(&self, params: ActivateParams) -> BoxFuture<'_, Result<(), AppError>>;

    fn deactivate(&self);

    fn active(&self) -> bool;

    fn displayed_media_id(&self) -> Option<MediaId>;

    fn set_data_source(&self, data_source: Arc<dyn DataSource>);

    /// Returns true if the key was used.
    fn handle_key(&self, key: KeyEvent) -> bool;
}
