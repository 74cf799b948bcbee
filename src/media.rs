//! Media ids, media info and the collaborator interfaces the preloader uses.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::MediaIdError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// A post with one or more pages. For MangaDex, a chapter.
    Illust,
    /// A series. Opening one lists its chapters.
    Manga,
    User,
    File,
    Folder,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Illust => "illust",
            MediaKind::Manga => "manga",
            MediaKind::User => "user",
            MediaKind::File => "file",
            MediaKind::Folder => "folder",
        }
    }
}

/// Identifies something viewable: `illust:<id>`, `illust:<id>-<page>`,
/// `manga:<id>`, `file:<path>` and so on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaId {
    kind: MediaKind,
    id: String,
    page: Option<usize>,
}

impl MediaId {
    pub fn new(kind: MediaKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            page: None,
        }
    }

    pub fn illust(id: impl Into<String>, page: usize) -> Self {
        Self {
            kind: MediaKind::Illust,
            id: id.into(),
            page: Some(page),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The page this id refers to, 0 if it doesn't name one.
    pub fn page(&self) -> usize {
        self.page.unwrap_or(0)
    }

    pub fn with_page(&self, page: usize) -> Self {
        Self {
            page: Some(page),
            ..self.clone()
        }
    }

    /// The id of the post as a whole.
    pub fn without_page(&self) -> Self {
        Self {
            page: None,
            ..self.clone()
        }
    }

    /// Local files and folders, served by a local host rather than the site.
    pub fn is_local(&self) -> bool {
        matches!(self.kind, MediaKind::File | MediaKind::Folder)
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)?;
        match self.page {
            Some(page) if self.kind == MediaKind::Illust => write!(f, "-{page}"),
            _ => Ok(()),
        }
    }
}

impl FromStr for MediaId {
    type Err = MediaIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| MediaIdError::MissingKind(s.to_string()))?;
        let kind = match kind {
            "illust" => MediaKind::Illust,
            "manga" => MediaKind::Manga,
            "user" => MediaKind::User,
            "file" => MediaKind::File,
            "folder" => MediaKind::Folder,
            other => return Err(MediaIdError::UnknownKind(other.to_string())),
        };
        if rest.is_empty() {
            return Err(MediaIdError::Empty(s.to_string()));
        }

        // Only illust ids carry a page suffix. Short numeric tails are pages;
        // anything longer is part of the id (MangaDex ids are UUIDs).
        if kind == MediaKind::Illust {
            if let Some((id, page)) = rest.rsplit_once('-') {
                if !id.is_empty() && page.len() <= 4 {
                    if let Ok(page) = page.parse() {
                        return Ok(MediaId::illust(id, page));
                    }
                }
            }
        }

        Ok(MediaId::new(kind, rest))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    Image,
    /// A frame sequence packed into an archive, with page 0 as a static
    /// fallback frame.
    Animation { archive_url: String },
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPage {
    pub url: String,
    pub poster_url: Option<String>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub media_id: MediaId,
    pub title: String,
    pub user_id: String,
    pub user_name: String,
    pub tags: Vec<String>,
    pub media_type: MediaType,
    pub preview_urls: Vec<String>,
    pub pages: Vec<MediaPage>,
}

impl MediaInfo {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn main_image_url(&self, page: usize) -> Option<&str> {
        self.pages.get(page).map(|p| p.url.as_str())
    }
}

/// Returns false for thumbnails a local host generates on demand, which cost
/// as much to load as the image itself.
pub fn should_preload_thumbs(media_id: &MediaId, url: &str) -> bool {
    if !media_id.is_local() {
        return true;
    }
    !url.contains("/thumb/")
}

/// Looks up media info by id.
pub trait MediaInfoProvider: Send + Sync {
    fn get_media_info<'a>(&'a self, media_id: &'a MediaId) -> BoxFuture<'a, Option<Arc<MediaInfo>>>;

    /// Return info only if it's already cached.
    fn get_media_info_sync(&self, media_id: &MediaId) -> Option<Arc<MediaInfo>>;
}

/// Guesses image URLs before media info is available.
pub trait UrlGuesser: Send + Sync {
    fn guess_url<'a>(&'a self, media_id: &'a MediaId) -> BoxFuture<'a, Option<String>>;

    /// A guessed URL for this id failed to load.
    fn guessed_url_incorrect(&self, media_id: &MediaId);
}

pub trait MutePolicy: Send + Sync {
    fn any_tag_muted(&self, tags: &[String]) -> bool;
    fn is_user_id_muted(&self, user_id: &str) -> bool;
}
