use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::config_dir;
use crate::error::ConfigError;
use crate::media::MutePolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct MutedItems {
    #[serde(default)]
    tags: HashSet<String>,
    #[serde(default)]
    user_ids: HashSet<String>,
}

/// Muted tags and uploaders. Tags are compared case-insensitively.
///
/// Changes are saved immediately when the list was loaded from a file.
#[derive(Debug, Default)]
pub struct MuteList {
    items: RwLock<MutedItems>,
    path: Option<PathBuf>,
}

pub fn default_path() -> PathBuf {
    config_dir().join("muted.json")
}

impl MuteList {
    /// Load the list from `path`. A missing file is an empty list.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let items = if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let mut items: MutedItems =
                serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            items.tags = items.tags.iter().map(|t| t.to_lowercase()).collect();
            items
        } else {
            MutedItems::default()
        };

        Ok(Self {
            items: RwLock::new(items),
            path: Some(path.to_path_buf()),
        })
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let content = match serde_json::to_string_pretty(&*self.items.read()) {
            Ok(content) => content,
            Err(e) => {
                log::error!("Couldn't serialize mutes: {}", e);
                return;
            }
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).ok();
        }
        if let Err(e) = fs::write(path, content) {
            log::error!("Couldn't save mutes to {}: {}", path.display(), e);
        }
    }

    /// Mute or unmute an uploader. Returns true if they're now muted.
    pub fn toggle_user(&self, user_id: &str) -> bool {
        let muted = {
            let mut items = self.items.write();
            if items.user_ids.remove(user_id) {
                false
            } else {
                items.user_ids.insert(user_id.to_string());
                true
            }
        };
        self.save();
        muted
    }

    pub fn is_tag_muted(&self, tag: &str) -> bool {
        self.items.read().tags.contains(&tag.to_lowercase())
    }
}

impl MutePolicy for MuteList {
    fn any_tag_muted(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.is_tag_muted(tag))
    }

    fn is_user_id_muted(&self, user_id: &str) -> bool {
        self.items.read().user_ids.contains(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muted.json");

        let mutes = MuteList::load(&path).unwrap();
        assert!(!mutes.is_user_id_muted("u1"));
        assert!(mutes.toggle_user("u1"));
        assert!(path.exists());

        let reloaded = MuteList::load(&path).unwrap();
        assert!(reloaded.is_user_id_muted("u1"));

        assert!(!reloaded.toggle_user("u1"));
        assert!(!MuteList::load(&path).unwrap().is_user_id_muted("u1"));
    }

    #[test]
    fn test_tags_ignore_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muted.json");
        fs::write(&path, r#"{ "tags": ["horror"] }"#).unwrap();

        let mutes = MuteList::load(&path).unwrap();
        assert!(mutes.is_tag_muted("HORROR"));
        assert!(mutes.any_tag_muted(&["Comedy".to_string(), "Horror".to_string()]));
        assert!(!mutes.any_tag_muted(&["Romance".to_string()]));

        // Tags survive saving after a user is muted.
        mutes.toggle_user("u1");
        assert!(MuteList::load(&path).unwrap().is_tag_muted("Horror"));
    }

    #[test]
    fn test_file_tags_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muted.json");
        fs::write(&path, r#"{ "tags": ["Slice of Life"] }"#).unwrap();

        let mutes = MuteList::load(&path).unwrap();
        assert!(mutes.is_tag_muted("slice of life"));
        assert!(!mutes.is_user_id_muted("anyone"));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muted.json");
        fs::write(&path, "[").unwrap();
        assert!(matches!(MuteList::load(&path), Err(ConfigError::Parse { .. })));
    }
}
