use serde::{Deserialize, Serialize};
use std::fmt;

pub mod app;
pub mod cache;
pub mod database;
pub mod filter;
pub mod history;
pub mod loader;
pub mod request;
pub mod resolver;
pub mod schedule;
pub mod settings;
pub mod storage;

pub use crate::app::{CandidatePool, LoadOutcome, Notice, Session};
pub use crate::cache::{CacheEntry, CacheKey};
pub use crate::history::History;
pub use crate::loader::{LoadState, LoadTracker};
pub use crate::request::{FeedClient, FeedError, HttpProbe, ImageProbe, ProbeOutcome};
pub use crate::settings::{load_settings, parse_sources, save_settings, Settings};
pub use crate::storage::{Config, FileStore, KeyValueStore, MemoryStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Gif,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => f.write_str("image"),
            MediaKind::Gif => f.write_str("gif"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

/// A displayable wallpaper. `url` identifies it within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallpaper {
    pub url: String,
    pub title: String,
    pub permalink: String,
    pub author: String,
    #[serde(alias = "subreddit")]
    pub source: String,
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub kind: MediaKind,
}

impl Wallpaper {
    /// One-line attribution, e.g. `Lake at dawn by u/someone`.
    pub fn attribution(&self) -> String {
        if self.author.is_empty() {
            self.title.clone()
        } else {
            format!("{} by u/{}", self.title, self.author)
        }
    }
}
