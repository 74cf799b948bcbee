use parking_lot::Mutex;
use std::sync::Arc;

use crate::app::DataSourceObserver;
use crate::data_source::DataSource;
use crate::media::MediaId;

#[derive(Default)]
struct StatusState {
    data_source: String,
    media_id: Option<String>,
    message: Option<String>,
}

/// The line under the content: where we are, and the last error.
#[derive(Default)]
pub struct StatusBar {
    state: Mutex<StatusState>,
}

impl StatusBar {
    pub fn set_message(&self, message: impl Into<String>) {
        self.state.lock().message = Some(message.into());
    }

    pub fn clear_message(&self) {
        self.state.lock().message = None;
    }

    /// The location summary and the message, if any.
    pub fn text(&self) -> (String, Option<String>) {
        let state = self.state.lock();
        let location = match &state.media_id {
            Some(media_id) => format!("{} · {}", state.data_source, media_id),
            None => state.data_source.clone(),
        };
        (location, state.message.clone())
    }
}

impl DataSourceObserver for StatusBar {
    fn set_data_source(&self, data_source: &Arc<dyn DataSource>) {
        self.state.lock().data_source = data_source.url().to_string();
    }

    fn set_media_id(&self, media_id: Option<&MediaId>) {
        self.state.lock().media_id = media_id.map(MediaId::to_string);
    }
}
