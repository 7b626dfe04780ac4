//! Persistent storage for layout cache, history, and delayed actions.
//!
//! Uses JSON files under a single data directory; history is sharded into
//! JSON-Lines files by year/month for efficient lookup. The hosting process
//! may be killed at any time, so whole-file writes go through a temp file and
//! rename, and history appends are single lines that a torn write can at
//! worst truncate (truncated tails are skipped on load).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::delivery::BackgroundInbox;
use crate::error::{BeckonError, Result};
use crate::history::HistoryEntry;
use crate::layout::CachedLayout;
use crate::scheduler::DelayedActionRecord;

/// Storage backend for beckon data.
#[derive(Debug, Clone)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance rooted at `data_dir`.
    #[must_use]
    pub const fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Get the default storage location.
    ///
    /// On Linux: `/var/lib/beckon/`
    /// Elsewhere (development): the platform data dir for `beckon`.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory can be determined.
    pub fn open_default() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            Ok(Self::new(PathBuf::from("/var/lib/beckon")))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "beckon").ok_or_else(|| {
                BeckonError::Persistence("Cannot determine data directory".into())
            })?;
            Ok(Self::new(dirs.data_dir().to_path_buf()))
        }
    }

    /// Root directory this storage writes under.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // =========================================================================
    // LAYOUT CACHE
    // =========================================================================

    /// Load the cached layout snapshot, if one has been persisted.
    pub fn load_cached_layout(&self) -> Result<Option<CachedLayout>> {
        self.load_json(&self.layout_path())
    }

    /// Persist the layout snapshot so a restart starts from the last fetch.
    pub fn save_cached_layout(&self, cached: &CachedLayout) -> Result<()> {
        self.save_json(&self.layout_path(), cached)
    }

    // =========================================================================
    // DELAYED ACTIONS
    // =========================================================================

    /// Load all pending delayed-action records.
    pub fn load_delayed(&self) -> Result<Vec<DelayedActionRecord>> {
        Ok(self.load_json(&self.delayed_path())?.unwrap_or_default())
    }

    /// Persist the full pending delayed-action set.
    pub fn save_delayed(&self, records: &[DelayedActionRecord]) -> Result<()> {
        self.save_json(&self.delayed_path(), &records)
    }

    // =========================================================================
    // HISTORY
    // =========================================================================

    /// Append one history entry to its month shard.
    pub fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        let path = self.month_path(entry.year(), entry.month());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry)
            .map_err(|e| BeckonError::Persistence(format!("encode history entry: {e}")))?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Load every history entry across all month shards, oldest shard first.
    pub fn load_history(&self) -> Result<Vec<HistoryEntry>> {
        let root = self.data_dir.join("history");
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut shards = Vec::new();
        for year in sorted_dir_entries(&root)? {
            if year.path().is_dir() {
                shards.extend(sorted_dir_entries(&year.path())?);
            }
        }

        let mut entries = Vec::new();
        for shard in shards {
            let content = fs::read_to_string(shard.path())?;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<HistoryEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        // A kill mid-append can leave one torn line at the tail.
                        warn!(
                            shard = %shard.path().display(),
                            error = %e,
                            "skipping unreadable history line"
                        );
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Replace a month shard wholesale (used by purge and upload marking).
    pub fn rewrite_history_month(
        &self,
        year: i32,
        month: u32,
        entries: &[HistoryEntry],
    ) -> Result<()> {
        let path = self.month_path(year, month);
        let mut buf = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| BeckonError::Persistence(format!("encode history entry: {e}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        self.write_atomic(&path, buf.as_bytes())
    }

    // =========================================================================
    // BACKGROUND INBOX
    // =========================================================================

    /// Load the background delivery inbox.
    pub fn load_inbox(&self) -> Result<BackgroundInbox> {
        Ok(self.load_json(&self.inbox_path())?.unwrap_or_default())
    }

    /// Persist the background delivery inbox.
    pub fn save_inbox(&self, inbox: &BackgroundInbox) -> Result<()> {
        self.save_json(&self.inbox_path(), inbox)
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn layout_path(&self) -> PathBuf {
        self.data_dir.join("layout.json")
    }

    fn delayed_path(&self) -> PathBuf {
        self.data_dir.join("delayed.json")
    }

    fn inbox_path(&self) -> PathBuf {
        self.data_dir.join("inbox.json")
    }

    fn month_path(&self, year: i32, month: u32) -> PathBuf {
        self.data_dir
            .join("history")
            .join(format!("{year}"))
            .join(format!("{month:02}.jsonl"))
    }

    fn load_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        let value = serde_json::from_str(&content).map_err(|e| {
            BeckonError::Persistence(format!("decode {}: {e}", path.display()))
        })?;
        Ok(Some(value))
    }

    fn save_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| BeckonError::Persistence(format!("encode {}: {e}", path.display())))?;
        self.write_atomic(path, content.as_bytes())
    }

    /// Write through a temp file and rename so a kill mid-write never
    /// truncates the previous contents.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn sorted_dir_entries(path: &Path) -> Result<Vec<fs::DirEntry>> {
    let mut entries: Vec<_> = fs::read_dir(path)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);
    Ok(entries)
}
