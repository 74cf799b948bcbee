//! Data sources map a location to a list of results and a current item.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use log::debug;
use parking_lot::Mutex;

use crate::error::AppError;
use crate::media::MediaId;
use crate::navigation::Args;
use crate::ui::screen::ScreenName;

/// One row of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub media_id: MediaId,
    pub title: String,
    pub subtitle: String,
}

pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// The location path this data source was created for.
    fn url(&self) -> &str;

    fn default_screen(&self) -> ScreenName;

    /// The media id the location points at, if any.
    fn current_media_id(&self, args: &Args) -> Option<MediaId>;

    /// Point `args` at `media_id`.
    fn set_current_media_id(&self, media_id: &MediaId, args: &mut Args);

    /// Transient data sources are discarded when they stop being current.
    fn is_transient(&self) -> bool {
        false
    }

    fn startup(&self) {}

    fn shutdown(&self) {}

    /// Load the listing. Results are kept, so later calls are cheap.
    fn load(&self) -> BoxFuture<'_, Result<Vec<ListingEntry>, AppError>>;

    /// The entries loaded so far.
    fn entries(&self) -> Vec<ListingEntry>;

    /// The entry `step` positions away from `media_id`'s post.
    fn neighbor(&self, media_id: &MediaId, step: isize) -> Option<MediaId> {
        let entries = self.entries();
        let target = media_id.without_page();
        let idx = entries
            .iter()
            .position(|e| e.media_id.without_page() == target)?;
        let next = idx.checked_add_signed(step)?;
        entries.get(next).map(|e| e.media_id.clone())
    }
}

/// Compare data sources by identity.
pub fn same_data_source(a: &Arc<dyn DataSource>, b: &Arc<dyn DataSource>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

pub trait DataSourceFactory: Send + Sync {
    /// Return the data source for `args`, reusing the existing one for the same
    /// location unless `force` is set.
    fn create_data_source_for_url(&self, args: &Args, force: bool) -> Arc<dyn DataSource>;

    /// Forget a data source so the next request for its location creates a new
    /// one.
    fn discard_data_source(&self, data_source: &Arc<dyn DataSource>);
}

type Constructor = Box<dyn Fn(&Args) -> Arc<dyn DataSource> + Send + Sync>;

/// A `DataSourceFactory` that caches data sources by location path.
pub struct DataSourceRegistry {
    constructor: Constructor,
    data_sources: Mutex<HashMap<String, Arc<dyn DataSource>>>,
}

impl DataSourceRegistry {
    pub fn new(constructor: impl Fn(&Args) -> Arc<dyn DataSource> + Send + Sync + 'static) -> Self {
        Self {
            constructor: Box::new(constructor),
            data_sources: Mutex::new(HashMap::new()),
        }
    }
}

impl DataSourceFactory for DataSourceRegistry {
    fn create_data_source_for_url(&self, args: &Args, force: bool) -> Arc<dyn DataSource> {
        let mut data_sources = self.data_sources.lock();
        if !force {
            if let Some(existing) = data_sources.get(&args.path) {
                return existing.clone();
            }
        }

        debug!("Creating data source for {}", args.path);
        let data_source = (self.constructor)(args);
        data_sources.insert(args.path.clone(), data_source.clone());
        data_source
    }

    fn discard_data_source(&self, data_source: &Arc<dyn DataSource>) {
        let mut data_sources = self.data_sources.lock();
        let cached = data_sources
            .get(data_source.url())
            .is_some_and(|existing| same_data_source(existing, data_source));
        if cached {
            debug!("Discarding data source for {}", data_source.url());
            data_sources.remove(data_source.url());
        }
    }
}
