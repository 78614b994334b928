//! Viewer-side model of the index: newest-first ordering, clamped
//! navigation, swipe classification and media path lookup.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime};
use tracing::{info, warn};

use crate::config::FeedPaths;
use crate::index::{IndexEntry, VideoIndex};
use crate::preview;

/// Minimum vertical travel, in pixels, for a drag to count as a swipe.
pub const SWIPE_THRESHOLD: f64 = 50.0;

/// Vertical swipe direction in a y-up coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Swipe {
    /// Finger moved up: go back toward newer videos.
    Up,
    /// Finger moved down: go on to older videos.
    Down,
}

impl Swipe {
    pub fn from_vertical_drag(start_y: f64, end_y: f64) -> Option<Self> {
        let delta = end_y - start_y;
        if delta > SWIPE_THRESHOLD {
            Some(Swipe::Up)
        } else if delta < -SWIPE_THRESHOLD {
            Some(Swipe::Down)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub position: usize,
    pub filename: String,
    pub timestamp: String,
    pub video_path: PathBuf,
    /// Only set when the preview image exists on disk.
    pub preview_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Feed {
    entries: Vec<IndexEntry>,
    position: usize,
    inbox: PathBuf,
    previews: Option<PathBuf>,
}

impl Feed {
    /// Sorts `entries` newest-first and starts at the newest.
    pub fn new(mut entries: Vec<IndexEntry>, paths: &FeedPaths) -> Self {
        sort_newest_first(&mut entries);
        Self {
            entries,
            position: 0,
            inbox: paths.inbox.clone(),
            previews: paths.previews.clone(),
        }
    }

    /// Reads the index once. An unreadable index gives an empty feed.
    pub fn load(paths: &FeedPaths) -> Self {
        let entries = match VideoIndex::new(&paths.index).entries() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(index = %paths.index.display(), error = %err, "could not read index");
                Vec::new()
            }
        };
        if entries.is_empty() {
            info!(index = %paths.index.display(), "no videos found");
        }
        Self::new(entries, paths)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Moves one step toward older videos. Returns whether the position changed.
    pub fn advance(&mut self) -> bool {
        if self.position + 1 < self.entries.len() {
            self.position += 1;
            true
        } else {
            false
        }
    }

    /// Moves one step toward newer videos. Returns whether the position changed.
    pub fn retreat(&mut self) -> bool {
        if self.position > 0 {
            self.position -= 1;
            true
        } else {
            false
        }
    }

    pub fn swipe(&mut self, swipe: Swipe) -> bool {
        match swipe {
            Swipe::Up => self.retreat(),
            Swipe::Down => self.advance(),
        }
    }

    pub fn current(&self) -> Option<FeedItem> {
        self.item(self.position)
    }

    pub fn item(&self, position: usize) -> Option<FeedItem> {
        let entry = self.entries.get(position)?;
        let video_path = self.inbox.join(&entry.filename);
        let preview_path = Some(preview::preview_path(&video_path, self.previews.as_deref()))
            .filter(|path| path.is_file());
        Some(FeedItem {
            position,
            filename: entry.filename.clone(),
            timestamp: entry.timestamp.clone(),
            video_path,
            preview_path,
        })
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    pub fn preview_dir(&self) -> &Path {
        self.previews.as_deref().unwrap_or(&self.inbox)
    }
}

/// Stable sort by timestamp, newest first. Timestamps that do not parse go
/// last and keep their file order.
pub fn sort_newest_first(entries: &mut [IndexEntry]) {
    entries.sort_by(|a, b| {
        match (parse_timestamp(&a.timestamp), parse_timestamp(&b.timestamp)) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}

/// Accepts the recorder's naive format (with or without fractional seconds)
/// as well as RFC 3339 timestamps, which are compared in UTC.
fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|parsed| parsed.naive_utc())
        })
}
