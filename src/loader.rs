//! Single-resource loads used by the preloader.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use log::debug;
use parking_lot::Mutex;

use crate::backend::cache::PageCache;
use crate::error::LoadError;
use crate::signal::AbortController;

/// Fetches the body of a URL.
pub trait Transport: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoadError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderKind {
    /// Fetch and decode an image.
    Image,
    /// Fetch the whole body and discard it, to warm the disk cache.
    Fetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed,
    Cancelled,
}

type ErrorCallback = Box<dyn FnOnce() + Send>;

pub struct ResourceLoader {
    kind: LoaderKind,
    url: String,
    transport: Arc<dyn Transport>,
    cache: Option<PageCache>,
    abort: AbortController,
    started: AtomicBool,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl ResourceLoader {
    pub fn new(kind: LoaderKind, url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let url = url.into();
        debug_assert!(!url.is_empty(), "resource loader needs a URL");
        Self {
            kind,
            url,
            transport,
            cache: None,
            abort: AbortController::new(),
            started: AtomicBool::new(false),
            on_error: Mutex::new(None),
        }
    }

    pub fn image(url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::new(LoaderKind::Image, url, transport)
    }

    pub fn fetch(url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::new(LoaderKind::Fetch, url, transport)
    }

    pub fn with_cache(mut self, cache: Option<PageCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Called if the load fails. Not called if it's cancelled.
    pub fn on_error(self, callback: impl FnOnce() + Send + 'static) -> Self {
        *self.on_error.lock() = Some(Box::new(callback));
        self
    }

    pub fn kind(&self) -> LoaderKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run the load. This can only be called once.
    pub async fn start(&self) -> Result<LoadOutcome, LoadError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LoadError::AlreadyStarted(self.url.clone()));
        }

        let signal = self.abort.signal();
        if signal.is_aborted() {
            return Ok(LoadOutcome::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = signal.cancelled() => return Ok(LoadOutcome::Cancelled),
            result = self.load() => result,
        };

        match result {
            Ok(()) => Ok(LoadOutcome::Loaded),
            Err(e) => {
                debug!("Preload of {} failed: {}", self.url, e);
                if !signal.is_aborted() {
                    if let Some(callback) = self.on_error.lock().take() {
                        callback();
                    }
                }
                Ok(LoadOutcome::Failed)
            }
        }
    }

    /// Abort the load if it's still running.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    async fn load(&self) -> Result<(), LoadError> {
        if self.kind == LoaderKind::Image {
            if let Some(cache) = &self.cache {
                if cache.has_page(&self.url).await {
                    debug!("{} is already cached", self.url);
                    return Ok(());
                }
            }
        }

        let bytes = self.transport.fetch(&self.url).await?;
        match self.kind {
            LoaderKind::Image => {
                let image = image::load_from_memory(&bytes).map_err(|source| LoadError::Decode {
                    url: self.url.clone(),
                    source,
                })?;
                if let Some(cache) = &self.cache {
                    cache.insert_page(self.url.clone(), image).await;
                }
            }
            LoaderKind::Fetch => {
                if let Some(cache) = &self.cache {
                    cache.insert_bytes(&self.url, &bytes).await;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLoader")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("cancelled", &self.abort.is_aborted())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use std::collections::HashSet;
    use std::io::Cursor;
    use tokio::sync::Notify;

    pub fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::new_rgb8(1, 1)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// Serves a tiny PNG for every URL, unless the URL is held (waits until
    /// released) or marked as failing.
    #[derive(Default)]
    pub struct FakeTransport {
        pub requested: Mutex<Vec<String>>,
        pub held: Mutex<bool>,
        pub failing: Mutex<HashSet<String>>,
        release: Notify,
    }

    impl FakeTransport {
        pub fn holding() -> Self {
            let transport = Self::default();
            *transport.held.lock() = true;
            transport
        }

        pub fn release_all(&self) {
            *self.held.lock() = false;
            self.release.notify_waiters();
        }

        pub fn requested(&self) -> Vec<String> {
            self.requested.lock().clone()
        }
    }

    impl Transport for FakeTransport {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoadError>> {
            Box::pin(async move {
                self.requested.lock().push(url.to_string());
                loop {
                    let released = self.release.notified();
                    tokio::pin!(released);
                    released.as_mut().enable();
                    if !*self.held.lock() {
                        break;
                    }
                    released.await;
                }
                if self.failing.lock().contains(url) {
                    return Err(LoadError::Status {
                        url: url.to_string(),
                        status: 404,
                    });
                }
                Ok(png_bytes())
            })
        }
    }
}
