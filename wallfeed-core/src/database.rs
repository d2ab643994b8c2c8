use anyhow::{Context, Result};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::history::History;
use crate::storage::KeyValueStore;
use crate::{MediaKind, Wallpaper};

pub const CURRENT_WALLPAPER_KEY: &str = "current_wallpaper";
pub const RECENT_SOURCES_KEY: &str = "recent_subreddits";
pub const FAVORITES_KEY: &str = "favorite_wallpapers";
pub const BLACKLIST_KEY: &str = "blacklisted_wallpapers";
pub const HISTORY_KEY: &str = "wallpaper_history";
pub const LOCAL_UPLOADS_KEY: &str = "local_wallpapers";

pub const MAX_RECENT_SOURCES: usize = 5;
pub const DEFAULT_RECENT_SOURCES: [&str; 3] = ["EarthPorn", "SpacePorn", "ArtPorn"];
/// A restored current-wallpaper snapshot older than this is ignored.
pub const CURRENT_WALLPAPER_TTL_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorite {
    #[serde(flatten)]
    pub wallpaper: Wallpaper,
    #[serde(rename = "savedAt")]
    pub saved_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentSnapshot {
    #[serde(flatten)]
    pub wallpaper: Wallpaper,
    pub timestamp: i64,
}

/// A user supplied image kept inline in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUpload {
    pub name: String,
    /// `data:` URL with the file contents.
    pub data: String,
    #[serde(rename = "addedAt")]
    pub added_at: i64,
}

impl LocalUpload {
    pub fn to_wallpaper(&self) -> Wallpaper {
        let kind = if self.data.starts_with("data:video/") {
            MediaKind::Video
        } else if self.data.starts_with("data:image/gif") {
            MediaKind::Gif
        } else {
            MediaKind::Image
        };
        Wallpaper {
            url: self.data.clone(),
            title: self.name.clone(),
            permalink: String::new(),
            author: String::new(),
            source: "local".to_string(),
            resolution: None,
            kind,
        }
    }
}

fn read<S, T>(store: &S, key: &str) -> Result<Option<T>>
where
    S: KeyValueStore + ?Sized,
    T: DeserializeOwned,
{
    let Some(value) = store.get(key).with_context(|| format!("Failed to read {}", key))? else {
        return Ok(None);
    };
    let decoded = serde_json::from_value(value).with_context(|| format!("Stored {} is malformed", key))?;
    Ok(Some(decoded))
}

fn entry<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<(String, Value)> {
    let value = serde_json::to_value(value).with_context(|| format!("Failed to encode {}", key))?;
    Ok((key.to_string(), value))
}

fn write<S, T>(store: &mut S, key: &str, value: &T) -> Result<()>
where
    S: KeyValueStore + ?Sized,
    T: Serialize + ?Sized,
{
    let (key, value) = entry(key, value)?;
    store.set(&key, value).with_context(|| format!("Failed to write {}", key))?;
    Ok(())
}

// Blacklist

pub fn load_blacklist<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<String>> {
    Ok(read(store, BLACKLIST_KEY)?.unwrap_or_default())
}

pub fn blacklist_set<S: KeyValueStore + ?Sized>(store: &S) -> HashSet<String> {
    match load_blacklist(store) {
        Ok(list) => list.into_iter().collect(),
        Err(e) => {
            warn!("Blacklist unavailable, filtering without it: {:#}", e);
            HashSet::new()
        }
    }
}

pub fn is_blacklisted<S: KeyValueStore + ?Sized>(store: &S, url: &str) -> Result<bool> {
    Ok(load_blacklist(store)?.iter().any(|u| u == url))
}

/// Blacklist entry with `url` appended, or `None` when it is already listed.
pub fn blacklist_entry<S: KeyValueStore + ?Sized>(store: &S, url: &str) -> Result<Option<(String, Value)>> {
    let mut blacklist = load_blacklist(store)?;
    if blacklist.iter().any(|u| u == url) {
        return Ok(None);
    }
    blacklist.push(url.to_string());
    entry(BLACKLIST_KEY, &blacklist).map(Some)
}

/// Returns false when the URL was already listed.
pub fn add_to_blacklist<S: KeyValueStore + ?Sized>(store: &mut S, url: &str) -> Result<bool> {
    let Some((key, value)) = blacklist_entry(store, url)? else {
        return Ok(false);
    };
    store.set(&key, value).with_context(|| format!("Failed to write {}", key))?;
    info!("Blacklisted {}", url);
    Ok(true)
}

pub fn remove_from_blacklist<S: KeyValueStore + ?Sized>(store: &mut S, url: &str) -> Result<bool> {
    let mut blacklist = load_blacklist(store)?;
    let before = blacklist.len();
    blacklist.retain(|u| u != url);
    if blacklist.len() == before {
        return Ok(false);
    }
    write(store, BLACKLIST_KEY, &blacklist)?;
    Ok(true)
}

pub fn clear_blacklist<S: KeyValueStore + ?Sized>(store: &mut S) -> Result<()> {
    store
        .remove(vec![BLACKLIST_KEY.to_string()])
        .context("Failed to clear blacklist")?;
    Ok(())
}

// Favorites

pub fn load_favorites<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<Favorite>> {
    Ok(read(store, FAVORITES_KEY)?.unwrap_or_default())
}

pub fn is_favorited<S: KeyValueStore + ?Sized>(store: &S, url: &str) -> Result<bool> {
    Ok(load_favorites(store)?.iter().any(|f| f.wallpaper.url == url))
}

/// Adds the wallpaper, or removes it when already a favorite. Returns true
/// when it was added.
pub fn toggle_favorite<S: KeyValueStore + ?Sized>(store: &mut S, wallpaper: &Wallpaper, now_ms: i64) -> Result<bool> {
    let mut favorites = load_favorites(store)?;
    let added = match favorites.iter().position(|f| f.wallpaper.url == wallpaper.url) {
        Some(index) => {
            favorites.remove(index);
            false
        }
        None => {
            favorites.push(Favorite {
                wallpaper: wallpaper.clone(),
                saved_at: now_ms,
            });
            true
        }
    };
    write(store, FAVORITES_KEY, &favorites)?;
    Ok(added)
}

pub fn remove_favorite<S: KeyValueStore + ?Sized>(store: &mut S, url: &str) -> Result<bool> {
    let mut favorites = load_favorites(store)?;
    let before = favorites.len();
    favorites.retain(|f| f.wallpaper.url != url);
    if favorites.len() == before {
        return Ok(false);
    }
    write(store, FAVORITES_KEY, &favorites)?;
    Ok(true)
}

// Recent sources

pub fn load_recent_sources<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<String>> {
    Ok(read(store, RECENT_SOURCES_KEY)?
        .unwrap_or_else(|| DEFAULT_RECENT_SOURCES.iter().map(|s| s.to_string()).collect()))
}

/// Moves `source` to the front, dropping case-insensitive duplicates and
/// keeping at most `MAX_RECENT_SOURCES`.
fn push_recent(recent: Vec<String>, source: &str) -> Vec<String> {
    let normalized = source.to_lowercase();
    let mut recent: Vec<String> = recent.into_iter().filter(|r| r.to_lowercase() != normalized).collect();
    recent.insert(0, source.to_string());
    recent.truncate(MAX_RECENT_SOURCES);
    recent
}

/// Recent-source entry after pushing each of `sources` in order, so the last
/// one ends up first.
pub fn recent_sources_entry<S: KeyValueStore + ?Sized>(store: &S, sources: &[String]) -> Result<(String, Value)> {
    let recent = sources
        .iter()
        .fold(load_recent_sources(store)?, |recent, source| push_recent(recent, source));
    entry(RECENT_SOURCES_KEY, &recent)
}

pub fn save_recent_source<S: KeyValueStore + ?Sized>(store: &mut S, source: &str) -> Result<Vec<String>> {
    let recent = push_recent(load_recent_sources(store)?, source);
    write(store, RECENT_SOURCES_KEY, &recent)?;
    Ok(recent)
}

// Current wallpaper

pub fn current_entry(wallpaper: &Wallpaper, now_ms: i64) -> Result<(String, Value)> {
    let snapshot = CurrentSnapshot {
        wallpaper: wallpaper.clone(),
        timestamp: now_ms,
    };
    entry(CURRENT_WALLPAPER_KEY, &snapshot)
}

pub fn save_current<S: KeyValueStore + ?Sized>(store: &mut S, wallpaper: &Wallpaper, now_ms: i64) -> Result<()> {
    let (key, value) = current_entry(wallpaper, now_ms)?;
    store.set(&key, value).with_context(|| format!("Failed to write {}", key))?;
    Ok(())
}

/// The last shown wallpaper if it was stored within the last hour.
pub fn load_current<S: KeyValueStore + ?Sized>(store: &S, now_ms: i64) -> Option<Wallpaper> {
    match read::<S, CurrentSnapshot>(store, CURRENT_WALLPAPER_KEY) {
        Ok(Some(snapshot)) if now_ms - snapshot.timestamp < CURRENT_WALLPAPER_TTL_MS => Some(snapshot.wallpaper),
        Ok(_) => None,
        Err(e) => {
            warn!("Error getting current wallpaper: {:#}", e);
            None
        }
    }
}

// History

pub fn load_history<S: KeyValueStore + ?Sized>(store: &S) -> History {
    match read::<S, Vec<Wallpaper>>(store, HISTORY_KEY) {
        Ok(entries) => History::from_entries(entries.unwrap_or_default()),
        Err(e) => {
            warn!("Starting with empty history: {:#}", e);
            History::new()
        }
    }
}

pub fn history_entry(history: &History) -> Result<(String, Value)> {
    entry(HISTORY_KEY, &history.to_vec())
}

pub fn save_history<S: KeyValueStore + ?Sized>(store: &mut S, history: &History) -> Result<()> {
    let (key, value) = history_entry(history)?;
    store.set(&key, value).with_context(|| format!("Failed to write {}", key))?;
    Ok(())
}

// Local uploads

pub fn load_uploads<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<LocalUpload>> {
    Ok(read(store, LOCAL_UPLOADS_KEY)?.unwrap_or_default())
}

/// Adds an upload, replacing any earlier upload with the same name.
pub fn add_upload<S: KeyValueStore + ?Sized>(store: &mut S, name: &str, data: &str, now_ms: i64) -> Result<()> {
    anyhow::ensure!(data.starts_with("data:"), "upload data must be a data: URL");
    let mut uploads = load_uploads(store)?;
    uploads.retain(|u| u.name != name);
    uploads.push(LocalUpload {
        name: name.to_string(),
        data: data.to_string(),
        added_at: now_ms,
    });
    write(store, LOCAL_UPLOADS_KEY, &uploads)
}

pub fn remove_upload<S: KeyValueStore + ?Sized>(store: &mut S, name: &str) -> Result<bool> {
    let mut uploads = load_uploads(store)?;
    let before = uploads.len();
    uploads.retain(|u| u.name != name);
    if uploads.len() == before {
        return Ok(false);
    }
    write(store, LOCAL_UPLOADS_KEY, &uploads)?;
    Ok(true)
}
