//! MangaDex listings as data sources.
//!
//! | path              | listing                     |
//! |-------------------|-----------------------------|
//! | `/`               | popular series              |
//! | `/recent`         | recently updated series     |
//! | `/search/<query>` | title search (transient)    |
//! | `/manga/<id>`     | chapters of a series        |

use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, warn};
use parking_lot::Mutex;

use super::mangadex::{Catalog, Chapter, Manga};
use crate::data_source::{DataSource, ListingEntry};
use crate::error::AppError;
use crate::media::{MediaId, MediaKind};
use crate::navigation::Args;
use crate::ui::screen::ScreenName;

/// Read the viewed media id from `illust_id` and the 1-based `page`.
fn media_id_from_args(args: &Args) -> Option<MediaId> {
    let id = args.get("illust_id").filter(|id| !id.is_empty())?;
    let page = args
        .get("page")
        .and_then(|p| p.parse::<usize>().ok())
        .unwrap_or(1);
    Some(MediaId::illust(id, page.saturating_sub(1)))
}

fn set_media_id_in_args(media_id: &MediaId, args: &mut Args) {
    args.set("illust_id", media_id.id());
    args.set("page", (media_id.page() + 1).to_string());
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MangaListKind {
    Popular,
    Recent,
    Search(String),
}

/// A list of series.
pub struct MangaListDataSource {
    url: String,
    kind: MangaListKind,
    catalog: Arc<dyn Catalog>,
    entries: Mutex<Option<Vec<ListingEntry>>>,
}

impl MangaListDataSource {
    fn new(url: &str, kind: MangaListKind, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            url: url.to_string(),
            kind,
            catalog,
            entries: Mutex::new(None),
        }
    }

    fn entry(manga: Manga) -> ListingEntry {
        let subtitle = if manga.author.is_empty() {
            manga.status
        } else {
            format!("{} · {}", manga.author, manga.status)
        };
        ListingEntry {
            media_id: MediaId::new(MediaKind::Manga, manga.id),
            title: manga.title,
            subtitle,
        }
    }
}

impl DataSource for MangaListDataSource {
    fn name(&self) -> &str {
        match self.kind {
            MangaListKind::Popular => "popular",
            MangaListKind::Recent => "recent",
            MangaListKind::Search(_) => "search",
        }
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn default_screen(&self) -> ScreenName {
        ScreenName::Search
    }

    fn current_media_id(&self, args: &Args) -> Option<MediaId> {
        media_id_from_args(args)
    }

    fn set_current_media_id(&self, media_id: &MediaId, args: &mut Args) {
        set_media_id_in_args(media_id, args);
    }

    fn is_transient(&self) -> bool {
        matches!(self.kind, MangaListKind::Search(_))
    }

    fn startup(&self) {
        debug!("Data source {} started", self.url);
    }

    fn shutdown(&self) {
        debug!("Data source {} shut down", self.url);
    }

    fn load(&self) -> BoxFuture<'_, Result<Vec<ListingEntry>, AppError>> {
        Box::pin(async move {
            if let Some(entries) = self.entries.lock().clone() {
                return Ok(entries);
            }

            let mangas = match &self.kind {
                MangaListKind::Popular => self.catalog.popular().await?,
                MangaListKind::Recent => self.catalog.recently_updated().await?,
                MangaListKind::Search(query) => self.catalog.search(query).await?,
            };
            let entries: Vec<_> = mangas.into_iter().map(Self::entry).collect();
            *self.entries.lock() = Some(entries.clone());
            Ok(entries)
        })
    }

    fn entries(&self) -> Vec<ListingEntry> {
        self.entries.lock().clone().unwrap_or_default()
    }
}

/// The chapters of one series, in reading order.
pub struct ChapterListDataSource {
    url: String,
    manga_id: String,
    catalog: Arc<dyn Catalog>,
    entries: Mutex<Option<Vec<ListingEntry>>>,
}

impl ChapterListDataSource {
    fn new(url: &str, manga_id: &str, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            url: url.to_string(),
            manga_id: manga_id.to_string(),
            catalog,
            entries: Mutex::new(None),
        }
    }

    fn entry(chapter: Chapter) -> ListingEntry {
        let title = match &chapter.volume {
            Some(volume) => format!("Vol. {} Ch. {}", volume, chapter.chapter),
            None => format!("Ch. {}", chapter.chapter),
        };
        ListingEntry {
            media_id: MediaId::new(MediaKind::Illust, chapter.id),
            title,
            subtitle: format!("{} ({} pages)", chapter.title, chapter.pages),
        }
    }
}

impl DataSource for ChapterListDataSource {
    fn name(&self) -> &str {
        "chapters"
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn default_screen(&self) -> ScreenName {
        ScreenName::Search
    }

    fn current_media_id(&self, args: &Args) -> Option<MediaId> {
        media_id_from_args(args)
    }

    fn set_current_media_id(&self, media_id: &MediaId, args: &mut Args) {
        set_media_id_in_args(media_id, args);
    }

    fn load(&self) -> BoxFuture<'_, Result<Vec<ListingEntry>, AppError>> {
        Box::pin(async move {
            if let Some(entries) = self.entries.lock().clone() {
                return Ok(entries);
            }

            // The feed is newest first.
            let chapters = self.catalog.manga_chapters(&self.manga_id).await?;
            let entries: Vec<_> = chapters.into_iter().rev().map(Self::entry).collect();
            *self.entries.lock() = Some(entries.clone());
            Ok(entries)
        })
    }

    fn entries(&self) -> Vec<ListingEntry> {
        self.entries.lock().clone().unwrap_or_default()
    }
}

/// Create the data source for a location.
pub fn create_data_source(catalog: &Arc<dyn Catalog>, args: &Args) -> Arc<dyn DataSource> {
    let segments = args.segments();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
    let catalog = catalog.clone();
    match segments.as_slice() {
        [] => Arc::new(MangaListDataSource::new(&args.path, MangaListKind::Popular, catalog)),
        ["recent"] => Arc::new(MangaListDataSource::new(&args.path, MangaListKind::Recent, catalog)),
        ["search", query] => Arc::new(MangaListDataSource::new(
            &args.path,
            MangaListKind::Search(query.to_string()),
            catalog,
        )),
        ["manga", manga_id] => Arc::new(ChapterListDataSource::new(&args.path, manga_id, catalog)),
        _ => {
            warn!("No data source for {}, showing popular", args.path);
            Arc::new(MangaListDataSource::new(&args.path, MangaListKind::Popular, catalog))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::media_cache::testing::FakeCatalog;

    fn catalog() -> (Arc<FakeCatalog>, Arc<dyn Catalog>) {
        let fake = Arc::new(FakeCatalog::default());
        (fake.clone(), fake)
    }

    #[tokio::test]
    async fn test_paths() {
        let (_, catalog) = catalog();
        let popular = create_data_source(&catalog, &Args::new("/"));
        assert_eq!(popular.name(), "popular");
        assert!(!popular.is_transient());

        let recent = create_data_source(&catalog, &Args::new("/recent"));
        assert_eq!(recent.name(), "recent");

        let search = create_data_source(&catalog, &Args::new("/search/blue%20sky"));
        assert_eq!(search.name(), "search");
        assert!(search.is_transient());
        assert_eq!(search.url(), "/search/blue%20sky");

        let chapters = create_data_source(&catalog, &Args::new("/manga/m1"));
        assert_eq!(chapters.name(), "chapters");
        assert_eq!(chapters.default_screen(), ScreenName::Search);

        let unknown = create_data_source(&catalog, &Args::new("/nowhere/a/b"));
        assert_eq!(unknown.name(), "popular");
    }

    #[tokio::test]
    async fn test_search_loads_once() {
        let (fake, catalog) = catalog();
        let search = create_data_source(&catalog, &Args::new("/search/blue%20sky"));
        assert!(search.entries().is_empty());

        let entries = search.load().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].media_id.kind(), MediaKind::Manga);
        assert_eq!(entries[0].subtitle, "Author · ongoing");
        search.load().await.unwrap();

        assert_eq!(*fake.searches.lock(), ["blue sky"]);
        assert_eq!(search.entries(), entries);
    }

    #[tokio::test]
    async fn test_chapters_in_reading_order() {
        let (_, catalog) = catalog();
        let chapters = create_data_source(&catalog, &Args::new("/manga/m1"));
        let entries = chapters.load().await.unwrap();

        let ids: Vec<_> = entries.iter().map(|e| e.media_id.to_string()).collect();
        assert_eq!(ids, ["illust:m1-c1", "illust:m1-c2", "illust:m1-c3"]);
        assert_eq!(entries[0].title, "Vol. 1 Ch. 1");
        assert_eq!(entries[0].subtitle, "Part 1 (10 pages)");

        let viewing = MediaId::illust("m1-c2", 4);
        assert_eq!(chapters.neighbor(&viewing, 1), Some(entries[2].media_id.clone()));
    }

    #[test]
    fn test_media_id_args() {
        let (_, catalog) = catalog();
        let chapters = create_data_source(&catalog, &Args::new("/manga/m1"));

        let mut args = Args::new("/manga/m1");
        assert_eq!(chapters.current_media_id(&args), None);

        chapters.set_current_media_id(&MediaId::illust("c9", 2), &mut args);
        assert_eq!(args.get("page"), Some("3"));
        assert_eq!(chapters.current_media_id(&args), Some(MediaId::illust("c9", 2)));

        args.remove("page");
        assert_eq!(chapters.current_media_id(&args), Some(MediaId::illust("c9", 0)));
    }
}
