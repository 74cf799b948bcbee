use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{BackendError, LoadError};
use crate::loader::Transport;
use crate::media::{MediaId, MediaInfo, MediaKind, MediaPage, MediaType};

const USER_AGENT: &str = "vview-tui/0.1.0";
const MANGA_INCLUDES: &str = "includes[]=author&includes[]=artist&includes[]=cover_art";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub id: String,
    pub chapter: String,
    pub title: String,
    pub volume: Option<String>,
    pub pages: usize,
}

#[derive(Debug, Deserialize)]
struct ChapterResponse {
    data: Vec<ChapterData>,
}

#[derive(Debug, Deserialize)]
struct SingleChapterResponse {
    data: ChapterData,
}

#[derive(Debug, Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct ChapterAttributes {
    chapter: Option<String>,
    title: Option<String>,
    volume: Option<String>,
    pages: usize,
}

#[derive(Debug, Deserialize)]
struct AtHomeResponse {
    #[serde(rename = "baseUrl")]
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Debug, Deserialize)]
struct AtHomeChapter {
    hash: String,
    data: Vec<String>,
    #[serde(rename = "dataSaver")]
    data_saver: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manga {
    pub id: String,
    pub title: String,
    pub author: String,
    pub artist: String,
    pub status: String,
    pub description: String,
    pub cover_url: String,
}

#[derive(Debug, Deserialize)]
struct MangaResponse {
    data: Vec<MangaData>,
}

#[derive(Debug, Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    title: HashMap<String, String>,
    status: Option<String>,
    description: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    id: String,
    #[serde(rename = "type")]
    rel_type: String,
    attributes: Option<RelationshipAttributes>,
}

/// Expanded relationship attributes. Which fields are present depends on the
/// relationship type.
#[derive(Debug, Deserialize)]
struct RelationshipAttributes {
    name: Option<String>,
    username: Option<String>,
    #[serde(rename = "fileName")]
    file_name: Option<String>,
    title: Option<HashMap<String, String>>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    attributes: TagAttributes,
}

#[derive(Debug, Deserialize)]
struct TagAttributes {
    name: HashMap<String, String>,
}

/// Pick the English string from a localized map, or any string if there's no
/// English one.
fn localized(map: &HashMap<String, String>) -> Option<&String> {
    map.get("en").or_else(|| map.values().next())
}

fn parse_manga_list(response: MangaResponse) -> Vec<Manga> {
    response
        .data
        .into_iter()
        .map(|m| {
            let mut author = String::new();
            let mut artist = String::new();
            let mut cover_filename = String::new();

            for rel in &m.relationships {
                let Some(attrs) = &rel.attributes else {
                    continue;
                };
                match rel.rel_type.as_str() {
                    "author" => author = attrs.name.clone().unwrap_or_default(),
                    "artist" => artist = attrs.name.clone().unwrap_or_default(),
                    "cover_art" => cover_filename = attrs.file_name.clone().unwrap_or_default(),
                    _ => {}
                }
            }

            let cover_url = if !cover_filename.is_empty() {
                format!(
                    "https://uploads.mangadex.org/covers/{}/{}",
                    m.id, cover_filename
                )
            } else {
                String::new()
            };

            let title = localized(&m.attributes.title)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string());

            let description = m
                .attributes
                .description
                .as_ref()
                .and_then(localized)
                .cloned()
                .unwrap_or_default();

            Manga {
                id: m.id,
                title,
                author,
                artist,
                status: m.attributes.status.unwrap_or_else(|| "Unknown".to_string()),
                description,
                cover_url,
            }
        })
        .collect()
}

fn parse_chapters(response: ChapterResponse) -> Vec<Chapter> {
    response
        .data
        .into_iter()
        // External chapters have no pages hosted on MangaDex.
        .filter(|c| c.attributes.pages > 0)
        .map(|c| Chapter {
            id: c.id,
            chapter: c.attributes.chapter.unwrap_or_else(|| "0".to_string()),
            title: c.attributes.title.unwrap_or_else(|| "No Title".to_string()),
            volume: c.attributes.volume,
            pages: c.attributes.pages,
        })
        .collect()
}

/// Build media info for a chapter. Full quality pages are the images; the
/// data saver versions serve as previews.
fn parse_chapter_info(chapter: SingleChapterResponse, at_home: AtHomeResponse) -> MediaInfo {
    let chapter = chapter.data;

    let mut manga_title = String::new();
    let mut tags = Vec::new();
    let mut user_id = String::new();
    let mut user_name = String::new();
    for rel in chapter.relationships {
        match rel.rel_type.as_str() {
            "manga" => {
                if let Some(attrs) = rel.attributes {
                    manga_title = attrs.title.as_ref().and_then(localized).cloned().unwrap_or_default();
                    tags = attrs
                        .tags
                        .iter()
                        .filter_map(|t| localized(&t.attributes.name).cloned())
                        .collect();
                }
            }
            "user" => {
                user_name = rel
                    .attributes
                    .and_then(|a| a.username)
                    .unwrap_or_default();
                user_id = rel.id;
            }
            _ => {}
        }
    }

    let number = chapter.attributes.chapter.unwrap_or_else(|| "0".to_string());
    let title = match (manga_title.is_empty(), chapter.attributes.title) {
        (false, Some(title)) if !title.is_empty() => format!("{manga_title} - Ch. {number}: {title}"),
        (false, _) => format!("{manga_title} - Ch. {number}"),
        (true, Some(title)) if !title.is_empty() => format!("Ch. {number}: {title}"),
        (true, _) => format!("Ch. {number}"),
    };

    let AtHomeResponse { base_url, chapter: files } = at_home;
    let pages = files
        .data
        .iter()
        .map(|filename| MediaPage {
            url: format!("{}/data/{}/{}", base_url, files.hash, filename),
            poster_url: None,
            width: 0,
            height: 0,
        })
        .collect();
    let preview_urls = files
        .data_saver
        .iter()
        .map(|filename| format!("{}/data-saver/{}/{}", base_url, files.hash, filename))
        .collect();

    MediaInfo {
        media_id: MediaId::new(MediaKind::Illust, chapter.id),
        title,
        user_id,
        user_name,
        tags,
        media_type: MediaType::Image,
        preview_urls,
        pages,
    }
}

/// The catalog queries the data sources and the media cache make.
pub trait Catalog: Send + Sync {
    fn popular(&self) -> BoxFuture<'_, Result<Vec<Manga>, BackendError>>;

    fn recently_updated(&self) -> BoxFuture<'_, Result<Vec<Manga>, BackendError>>;

    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<Manga>, BackendError>>;

    fn manga_chapters<'a>(&'a self, manga_id: &'a str) -> BoxFuture<'a, Result<Vec<Chapter>, BackendError>>;

    fn chapter_info<'a>(&'a self, chapter_id: &'a str) -> BoxFuture<'a, Result<MediaInfo, BackendError>>;
}

/// A MangaDex API client. It also serves raw downloads for the loaders.
pub struct MangaDexClient {
    http: reqwest::Client,
    base_url: String,
}

impl MangaDexClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, BackendError> {
        log::debug!("GET {url}");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    pub async fn recently_updated(&self) -> Result<Vec<Manga>, BackendError> {
        let url = format!(
            "{}/manga?{}&order[latestUploadedChapter]=desc&limit=20",
            self.base_url, MANGA_INCLUDES
        );
        let response: MangaResponse = self.get_json(&url).await?;
        Ok(parse_manga_list(response))
    }

    pub async fn popular(&self) -> Result<Vec<Manga>, BackendError> {
        let url = format!(
            "{}/manga?{}&order[followedCount]=desc&limit=20",
            self.base_url, MANGA_INCLUDES
        );
        let response: MangaResponse = self.get_json(&url).await?;
        Ok(parse_manga_list(response))
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Manga>, BackendError> {
        let url = format!(
            "{}/manga?title={}&{}&order[relevance]=desc&limit=20",
            self.base_url,
            urlencoding::encode(query),
            MANGA_INCLUDES
        );
        let response: MangaResponse = self.get_json(&url).await?;
        Ok(parse_manga_list(response))
    }

    pub async fn manga_chapters(&self, manga_id: &str) -> Result<Vec<Chapter>, BackendError> {
        let url = format!(
            "{}/manga/{}/feed?translatedLanguage[]=en&order[chapter]=desc&limit=100",
            self.base_url, manga_id
        );
        let response: ChapterResponse = self.get_json(&url).await?;
        Ok(parse_chapters(response))
    }

    /// Media info for a chapter: its metadata plus the page URLs from the
    /// at-home server.
    pub async fn chapter_info(&self, chapter_id: &str) -> Result<MediaInfo, BackendError> {
        let chapter_url = format!(
            "{}/chapter/{}?includes[]=manga&includes[]=user",
            self.base_url, chapter_id
        );
        let at_home_url = format!("{}/at-home/server/{}", self.base_url, chapter_id);

        let (chapter, at_home) = tokio::try_join!(
            self.get_json::<SingleChapterResponse>(&chapter_url),
            self.get_json::<AtHomeResponse>(&at_home_url),
        )?;
        Ok(parse_chapter_info(chapter, at_home))
    }
}

impl Catalog for MangaDexClient {
    fn popular(&self) -> BoxFuture<'_, Result<Vec<Manga>, BackendError>> {
        Box::pin(MangaDexClient::popular(self))
    }

    fn recently_updated(&self) -> BoxFuture<'_, Result<Vec<Manga>, BackendError>> {
        Box::pin(MangaDexClient::recently_updated(self))
    }

    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<Manga>, BackendError>> {
        Box::pin(MangaDexClient::search(self, query))
    }

    fn manga_chapters<'a>(&'a self, manga_id: &'a str) -> BoxFuture<'a, Result<Vec<Chapter>, BackendError>> {
        Box::pin(MangaDexClient::manga_chapters(self, manga_id))
    }

    fn chapter_info<'a>(&'a self, chapter_id: &'a str) -> BoxFuture<'a, Result<MediaInfo, BackendError>> {
        Box::pin(MangaDexClient::chapter_info(self, chapter_id))
    }
}

impl Transport for MangaDexClient {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoadError>> {
        Box::pin(async move {
            let http_error = |source| LoadError::Http {
                url: url.to_string(),
                source,
            };
            let response = self.http.get(url).send().await.map_err(http_error)?;
            let status = response.status();
            if !status.is_success() {
                return Err(LoadError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            let bytes = response.bytes().await.map_err(http_error)?;
            Ok(bytes.to_vec())
        })
    }
}
