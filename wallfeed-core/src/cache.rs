use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::settings::{ColorFilter, Settings, Sort, TimeWindow};
use crate::storage::KeyValueStore;
use crate::Wallpaper;

pub const CACHE_PREFIX: &str = "wallpaper_cache_";
/// Entries older than this are a miss.
pub const CACHE_DURATION_MS: i64 = 30 * 60 * 1000;
/// Entries older than this are shown but refreshed in the background.
pub const REFRESH_AFTER_MS: i64 = 15 * 60 * 1000;

/// Every settings field that changes which candidates survive filtering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub sources: Vec<String>,
    pub sort: Sort,
    pub time: TimeWindow,
    pub min_resolution: u32,
    pub allow_nsfw: bool,
    pub allow_images: bool,
    pub allow_gifs: bool,
    pub allow_videos: bool,
    pub color_filter: ColorFilter,
    pub min_score: i64,
}

impl CacheKey {
    pub fn new(settings: &Settings, sources: &[String]) -> Self {
        Self {
            sources: sources.to_vec(),
            sort: settings.sort,
            time: settings.time,
            min_resolution: settings.min_resolution,
            allow_nsfw: settings.allow_nsfw,
            allow_images: settings.allow_images,
            allow_gifs: settings.allow_gifs,
            allow_videos: settings.allow_videos,
            color_filter: settings.color_filter,
            min_score: settings.min_score,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings, &settings.sources())
    }

    /// Store key: the prefix followed by the key's JSON encoding. Field order
    /// is fixed by the struct, so equal keys always encode identically.
    pub fn storage_key(&self) -> Result<String> {
        let encoded = serde_json::to_string(self).context("Failed to encode cache key")?;
        Ok(format!("{}{}", CACHE_PREFIX, encoded))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(alias = "wallpapers")]
    pub candidates: Vec<Wallpaper>,
    /// Epoch milliseconds of the last `put`.
    pub timestamp: i64,
}

impl CacheEntry {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.timestamp
    }

    pub fn is_fresh(&self, now_ms: i64) -> bool {
        self.age_ms(now_ms) < CACHE_DURATION_MS
    }

    pub fn needs_refresh(&self, now_ms: i64) -> bool {
        self.age_ms(now_ms) > REFRESH_AFTER_MS
    }
}

/// Any stored entry for `key`, regardless of age.
pub fn get_stale<S: KeyValueStore + ?Sized>(store: &S, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let storage_key = key.storage_key()?;
    let Some(value) = store.get(&storage_key)? else {
        return Ok(None);
    };
    match serde_json::from_value::<CacheEntry>(value) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) => {
            warn!("Ignoring undecodable cache entry: {}", e);
            Ok(None)
        }
    }
}

/// The stored entry for `key` only while it is inside the freshness window.
pub fn get_fresh<S: KeyValueStore + ?Sized>(store: &S, key: &CacheKey, now_ms: i64) -> Result<Option<CacheEntry>> {
    Ok(get_stale(store, key)?.filter(|entry| entry.is_fresh(now_ms)))
}

/// Overwrites the entry for `key`. Empty candidate lists are never stored;
/// returns whether anything was written.
pub fn put<S: KeyValueStore + ?Sized>(store: &mut S, key: &CacheKey, candidates: &[Wallpaper], now_ms: i64) -> Result<bool> {
    if candidates.is_empty() {
        debug!("Not caching an empty candidate list");
        return Ok(false);
    }
    let entry = CacheEntry {
        candidates: candidates.to_vec(),
        timestamp: now_ms,
    };
    let value = serde_json::to_value(&entry).context("Failed to encode cache entry")?;
    store.set(&key.storage_key()?, value).context("Failed to write cache entry")?;
    info!("Cached {} candidates", candidates.len());
    Ok(true)
}

pub fn remove<S: KeyValueStore + ?Sized>(store: &mut S, key: &CacheKey) -> Result<()> {
    store.remove(vec![key.storage_key()?]).context("Failed to remove cache entry")?;
    Ok(())
}

/// Store keys of cache entries whose key starts with `prefix` (all when `None`).
pub fn keys<S: KeyValueStore + ?Sized>(store: &S, prefix: Option<&str>) -> Result<Vec<String>> {
    let prefix = prefix.unwrap_or(CACHE_PREFIX);
    Ok(store
        .keys()?
        .into_iter()
        .filter(|k| k.starts_with(CACHE_PREFIX) && k.starts_with(prefix))
        .collect())
}

/// Removes every cache entry whose store key starts with `prefix` (all cache
/// entries when `None`). Returns the number removed.
pub fn clear<S: KeyValueStore + ?Sized>(store: &mut S, prefix: Option<&str>) -> Result<usize> {
    let found = keys(store, prefix)?;
    let count = found.len();
    store.remove(found).context("Failed to clear cache")?;
    info!("Cleared {} cache entries", count);
    Ok(count)
}

/// Every cached candidate across all entries, de-duplicated by URL.
pub fn all_cached<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<Wallpaper>> {
    let mut seen = HashSet::new();
    let mut all = Vec::new();
    for key in keys(store, None)? {
        let Some(value) = store.get(&key)? else {
            continue;
        };
        let Ok(entry) = serde_json::from_value::<CacheEntry>(value) else {
            continue;
        };
        for wallpaper in entry.candidates {
            if seen.insert(wallpaper.url.clone()) {
                all.push(wallpaper);
            }
        }
    }
    Ok(all)
}
