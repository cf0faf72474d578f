//! Per-conversation workspaces under `outputs/`.
//!
//! Each conversation owns exactly one flat directory of artifact files.
//! Artifact attribution works by snapshot diff: enumerate filenames and
//! mtimes before a tool runs, again after, and attribute the union of new
//! files and files touched since the start (minus a small clock-resolution
//! epsilon).

pub mod bookmarks;
pub mod error;

pub use bookmarks::BookmarkStore;
pub use error::{Result, WorkspaceError};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

/// Clock-resolution allowance when comparing mtimes to the snapshot start.
const MTIME_EPSILON_MS: u128 = 5;

/// Extensions the client UI can preview inline. Anything else is stored but
/// not announced via `files_generated`.
const PREVIEWABLE_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "svg", "gif", "webp", "avif",
    // spreadsheets and slides
    "xlsx", "pptx",
    // audio
    "mp3", "wav", "m4a", "aac", "ogg", "flac",
    // video
    "mp4", "webm", "mov",
    // documents
    "html", "pdf", "jsonl", "json", "md",
    // text and code
    "txt", "log", "yaml", "yml", "toml", "ini", "cfg", "conf", "xml", "py", "js", "ts", "tsx",
    "jsx", "java", "go", "rs", "c", "cpp", "h", "cs", "rb", "php", "sh", "bash", "zsh", "sql",
];

/// Root of all conversation workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    outputs_dir: PathBuf,
}

impl WorkspaceRoot {
    pub fn new(outputs_dir: impl Into<PathBuf>) -> Self {
        Self {
            outputs_dir: outputs_dir.into(),
        }
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs_dir
    }

    /// The directory for one conversation, identified by its fixed output
    /// dir name. Created on demand.
    pub fn workspace_dir(&self, output_dir_name: &str) -> Result<PathBuf> {
        let dir = self.outputs_dir.join(output_dir_name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Whether `filename` exists inside the given workspace. URLs count as
    /// existing so remote artifacts survive the filter.
    pub fn file_exists(&self, output_dir_name: &str, filename: &str) -> bool {
        if is_url(filename) {
            return true;
        }
        self.outputs_dir.join(output_dir_name).join(filename).is_file()
    }
}

/// Filename + mtime snapshot of a workspace, taken before a tool call.
#[derive(Debug, Clone)]
pub struct WorkspaceSnapshot {
    dir: PathBuf,
    taken_at: SystemTime,
    files: HashMap<String, SystemTime>,
}

impl WorkspaceSnapshot {
    /// Enumerate the workspace now. Unreadable entries are skipped rather
    /// than failing the whole snapshot.
    pub fn capture(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let mut files = HashMap::new();
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                let mtime = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                files.insert(name, mtime);
            }
        }
        Self {
            dir,
            taken_at: SystemTime::now(),
            files,
        }
    }

    /// Files that appeared or were modified since this snapshot, sorted.
    pub fn diff(&self) -> Vec<String> {
        let after = WorkspaceSnapshot::capture(&self.dir);
        let mut changed: Vec<String> = Vec::new();

        for (name, mtime) in &after.files {
            let is_new = !self.files.contains_key(name);
            let touched = mtime_at_or_after(*mtime, self.taken_at);
            if is_new || touched {
                changed.push(name.clone());
            }
        }

        changed.sort();
        debug!(dir = %self.dir.display(), count = changed.len(), "workspace diff");
        changed
    }
}

fn mtime_at_or_after(mtime: SystemTime, start: SystemTime) -> bool {
    match start.duration_since(mtime) {
        // mtime is before start: allowed only within the epsilon window.
        Ok(gap) => gap.as_millis() <= MTIME_EPSILON_MS,
        // mtime is at or after start.
        Err(_) => true,
    }
}

/// Keep only files the UI can preview. URLs always pass.
pub fn filter_previewable(files: &[String]) -> Vec<String> {
    files
        .iter()
        .filter(|f| {
            if is_url(f) {
                return true;
            }
            Path::new(f)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| PREVIEWABLE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

pub fn is_url(name: &str) -> bool {
    name.starts_with("http://") || name.starts_with("https://")
}

/// Union-merge two attribution sets, preserving first-seen order.
pub fn merge_generated_files(declared: &[String], observed: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for f in declared.iter().chain(observed.iter()) {
        if !merged.contains(f) {
            merged.push(f.clone());
        }
    }
    merged
}
