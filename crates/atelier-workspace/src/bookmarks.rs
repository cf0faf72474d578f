//! Per-user workspace bookmarks: pinned `{conversation, filename}` pairs so
//! a user can keep important artifacts reachable across conversations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub conv_id: String,
    pub filename: String,
    pub created_at: String,
}

/// Small JSON-file store: `{username: [bookmark, ...]}`, rewritten atomically
/// on every mutation.
pub struct BookmarkStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Vec<Bookmark>>>,
}

impl BookmarkStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn list(&self, username: &str) -> Vec<Bookmark> {
        self.entries
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .unwrap_or_default()
    }

    /// Pin a file. Re-pinning the same pair is a no-op.
    pub fn add(&self, username: &str, conv_id: &str, filename: &str, now: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        let user_marks = entries.entry(username.to_string()).or_default();
        if user_marks
            .iter()
            .any(|b| b.conv_id == conv_id && b.filename == filename)
        {
            return Ok(false);
        }
        user_marks.push(Bookmark {
            conv_id: conv_id.to_string(),
            filename: filename.to_string(),
            created_at: now.to_string(),
        });
        self.persist(&entries)?;
        debug!(username, conv_id, filename, "bookmark added");
        Ok(true)
    }

    pub fn remove(&self, username: &str, conv_id: &str, filename: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        let Some(user_marks) = entries.get_mut(username) else {
            return Ok(false);
        };
        let before = user_marks.len();
        user_marks.retain(|b| !(b.conv_id == conv_id && b.filename == filename));
        let removed = user_marks.len() != before;
        if removed {
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    fn persist(&self, entries: &BTreeMap<String, Vec<Bookmark>>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
