//! Error types, one enum per concern.

use std::path::PathBuf;

use thiserror::Error;

use crate::media::MediaId;

/// Errors from the screen coordinator and the screens.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("No screen named '{0}' is registered")]
    UnknownScreen(String),

    /// A screen failed to activate during a transition.
    #[error("Activating the {screen} screen failed: {source}")]
    ScreenActivation {
        screen: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("No media to display")]
    NoMedia,

    #[error("Media info for {0} isn't available")]
    MissingMedia(MediaId),

    #[error("Page {page} of {media_id} doesn't exist")]
    MissingPage { media_id: MediaId, page: usize },

    #[error("Activation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from a single resource transfer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Loader for {0} was already started")]
    AlreadyStarted(String),

    #[error("Request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request for {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Couldn't decode image {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },
}

/// Errors from the MangaDex API.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Unsupported media id: {0}")]
    UnsupportedMedia(MediaId),
}

/// Errors reading or writing settings files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaIdError {
    #[error("Media id '{0}' has no type prefix")]
    MissingKind(String),

    #[error("Unknown media type '{0}'")]
    UnknownKind(String),

    #[error("Media id '{0}' is empty")]
    Empty(String),
}
