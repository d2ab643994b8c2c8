use anyhow::{Context, Result};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::storage::KeyValueStore;

pub const SETTINGS_KEY: &str = "wallpaper_settings";
pub const DEFAULT_SOURCE: &str = "EarthPorn";
/// Posts at or below 50 points are skipped unless the user lowers this.
pub const DEFAULT_MIN_SCORE: i64 = 51;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    #[default]
    Hot,
    New,
    Top,
    Rising,
    Controversial,
}

impl Sort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sort::Hot => "hot",
            Sort::New => "new",
            Sort::Top => "top",
            Sort::Rising => "rising",
            Sort::Controversial => "controversial",
        }
    }

    /// Ranked listings are the only ones that accept a time window.
    pub fn uses_time_window(&self) -> bool {
        matches!(self, Sort::Top | Sort::Controversial)
    }
}

impl FromStr for Sort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hot" => Ok(Sort::Hot),
            "new" => Ok(Sort::New),
            "top" => Ok(Sort::Top),
            "rising" => Ok(Sort::Rising),
            "controversial" => Ok(Sort::Controversial),
            other => Err(format!("unknown sort '{}'", other)),
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Hour,
    Day,
    #[default]
    Week,
    Month,
    Year,
    All,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::Year => "year",
            TimeWindow::All => "all",
        }
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hour" => Ok(TimeWindow::Hour),
            "day" => Ok(TimeWindow::Day),
            "week" => Ok(TimeWindow::Week),
            "month" => Ok(TimeWindow::Month),
            "year" => Ok(TimeWindow::Year),
            "all" => Ok(TimeWindow::All),
            other => Err(format!("unknown time window '{}'", other)),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Restricts candidates to titles that mention a colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFilter {
    #[default]
    Any,
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Pink,
    Black,
    White,
    Gray,
}

impl ColorFilter {
    fn words(&self) -> &'static [&'static str] {
        match self {
            ColorFilter::Any => &[],
            ColorFilter::Red => &["red", "crimson", "scarlet", "ruby"],
            ColorFilter::Orange => &["orange", "amber", "sunset", "autumn", "fall"],
            ColorFilter::Yellow => &["yellow", "golden", "gold"],
            ColorFilter::Green => &["green", "forest", "emerald", "jungle", "moss"],
            ColorFilter::Blue => &["blue", "ocean", "sea", "azure", "lake"],
            ColorFilter::Purple => &["purple", "violet", "lavender", "magenta"],
            ColorFilter::Pink => &["pink", "blossom", "rose"],
            ColorFilter::Black => &["black", "dark", "night", "midnight"],
            ColorFilter::White => &["white", "snow", "winter", "frost"],
            ColorFilter::Gray => &["gray", "grey", "fog", "foggy", "misty"],
        }
    }

    pub fn matches(&self, title: &str) -> bool {
        if *self == ColorFilter::Any {
            return true;
        }
        let title = title.to_lowercase();
        title
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| self.words().contains(&word))
    }
}

impl FromStr for ColorFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.trim().to_lowercase()))
            .map_err(|_| format!("unknown color filter '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRule {
    pub start_time: String,
    pub end_time: String,
    #[serde(alias = "subreddit")]
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HoverOnly {
    pub clock: bool,
    pub search: bool,
    pub shortcuts: bool,
    pub wallpaper_info: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Comma separated source list, as typed by the user.
    pub subreddit: String,
    pub sort: Sort,
    pub time: TimeWindow,
    pub min_resolution: u32,
    pub allow_nsfw: bool,
    /// Minutes between automatic wallpaper changes; 0 disables the slideshow.
    pub slideshow_interval: u32,
    pub allow_images: bool,
    pub allow_gifs: bool,
    pub allow_videos: bool,
    pub favorites_only: bool,
    pub color_filter: ColorFilter,
    pub min_score: i64,
    pub scheduled_enabled: bool,
    pub schedules: Vec<ScheduleRule>,
    pub use_local_wallpapers: bool,
    pub hover_only: HoverOnly,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            subreddit: DEFAULT_SOURCE.to_string(),
            sort: Sort::Hot,
            time: TimeWindow::Week,
            min_resolution: 0,
            allow_nsfw: false,
            slideshow_interval: 0,
            allow_images: true,
            allow_gifs: true,
            allow_videos: false,
            favorites_only: false,
            color_filter: ColorFilter::Any,
            min_score: DEFAULT_MIN_SCORE,
            scheduled_enabled: false,
            schedules: Vec::new(),
            use_local_wallpapers: false,
            hover_only: HoverOnly::default(),
        }
    }
}

impl Settings {
    /// Shallow-merges a stored settings object over the defaults, key by key.
    ///
    /// A stored value that does not fit its field is dropped and the default
    /// kept; unknown keys are ignored. Never fails.
    pub fn from_stored(stored: Option<&Value>) -> Settings {
        let mut merged = match serde_json::to_value(Settings::default()) {
            Ok(Value::Object(map)) => map,
            _ => return Settings::default(),
        };

        if let Some(Value::Object(overrides)) = stored {
            for (key, value) in overrides {
                if !merged.contains_key(key) {
                    debug!("Ignoring unknown setting '{}'", key);
                    continue;
                }
                let previous = merged.insert(key.clone(), value.clone());
                if !fits(&merged) {
                    warn!("Stored setting '{}' is invalid, using default", key);
                    if let Some(previous) = previous {
                        merged.insert(key.clone(), previous);
                    }
                }
            }
        }

        let mut settings: Settings =
            serde_json::from_value(Value::Object(merged)).unwrap_or_default();
        settings.sanitize();
        settings
    }

    fn sanitize(&mut self) {
        if !self.allow_images && !self.allow_gifs && !self.allow_videos {
            warn!("No media type enabled in stored settings, restoring defaults");
            let defaults = Settings::default();
            self.allow_images = defaults.allow_images;
            self.allow_gifs = defaults.allow_gifs;
            self.allow_videos = defaults.allow_videos;
        }
        if parse_sources(&self.subreddit).is_empty() {
            self.subreddit = DEFAULT_SOURCE.to_string();
        }
    }

    pub fn sources(&self) -> Vec<String> {
        parse_sources(&self.subreddit)
    }

    pub fn has_media_type(&self) -> bool {
        self.allow_images || self.allow_gifs || self.allow_videos
    }
}

fn fits(map: &Map<String, Value>) -> bool {
    serde_json::from_value::<Settings>(Value::Object(map.clone())).is_ok()
}

/// Splits a comma separated source list. Accepts bare names, `r/name` and
/// full listing URLs.
pub fn parse_sources(input: &str) -> Vec<String> {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    let url_re = URL_RE.get_or_init(|| {
        Regex::new(r"(?i)reddit\.com/r/([^/\s?]+)").expect("static regex")
    });

    input
        .split(',')
        .map(|part| {
            let part = part.trim();
            match url_re.captures(part) {
                Some(caps) => caps[1].to_string(),
                None => part.strip_prefix("r/").unwrap_or(part).to_string(),
            }
        })
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn load_settings<S: KeyValueStore + ?Sized>(store: &S) -> Settings {
    match store.get(SETTINGS_KEY) {
        Ok(stored) => Settings::from_stored(stored.as_ref()),
        Err(e) => {
            warn!("Failed to read settings, using defaults: {}", e);
            Settings::default()
        }
    }
}

/// Validated store entry for `settings`, for callers batching it with other writes.
pub fn settings_entry(settings: &Settings) -> Result<(String, Value)> {
    anyhow::ensure!(
        settings.has_media_type(),
        "at least one of images, gifs or videos must be allowed"
    );
    let value = serde_json::to_value(settings).context("Failed to encode settings")?;
    Ok((SETTINGS_KEY.to_string(), value))
}

pub fn save_settings<S: KeyValueStore + ?Sized>(store: &mut S, settings: &Settings) -> Result<()> {
    let (key, value) = settings_entry(settings)?;
    store.set(&key, value).context("Failed to save settings")?;
    Ok(())
}
