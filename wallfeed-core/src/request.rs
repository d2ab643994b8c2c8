use attohttpc::header::{ACCEPT, USER_AGENT};
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::settings::Settings;

pub const FEED_BASE_URL: &str = "https://www.reddit.com";
pub const FEED_LIMIT: u32 = 100;
pub const FEED_TIMEOUT: Duration = Duration::from_secs(30);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const CLIENT_USER_AGENT: &str = "wallfeed/0.0.1 (wallpaper new tab)";

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed listing: {0}")]
    Parse(#[from] serde_json::Error),
}

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One post record of a listing page. Only the fields the pipeline reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPost {
    pub url: Option<String>,
    #[serde(deserialize_with = "null_default")]
    pub title: String,
    #[serde(deserialize_with = "null_default")]
    pub author: String,
    #[serde(deserialize_with = "null_default")]
    pub permalink: String,
    #[serde(deserialize_with = "null_default")]
    pub over_18: bool,
    #[serde(deserialize_with = "null_default")]
    pub is_self: bool,
    #[serde(deserialize_with = "null_default")]
    pub is_video: bool,
    #[serde(deserialize_with = "null_default")]
    pub is_gallery: bool,
    pub gallery_data: Option<Value>,
    pub post_hint: Option<String>,
    #[serde(deserialize_with = "null_default")]
    pub score: i64,
    pub preview: Option<Preview>,
    pub media: Option<Media>,
    pub secure_media: Option<Media>,
    pub url_overridden_by_dest: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preview {
    #[serde(deserialize_with = "null_default")]
    pub images: Vec<PreviewImage>,
    pub reddit_video_preview: Option<VideoInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewImage {
    pub source: Option<ImageSource>,
    #[serde(deserialize_with = "null_default")]
    pub variants: Variants,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Variants {
    pub gif: Option<Variant>,
    pub mp4: Option<Variant>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Variant {
    pub source: Option<ImageSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSource {
    #[serde(deserialize_with = "null_default")]
    pub url: String,
    #[serde(deserialize_with = "null_default")]
    pub width: u32,
    #[serde(deserialize_with = "null_default")]
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Media {
    pub reddit_video: Option<VideoInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoInfo {
    pub fallback_url: Option<String>,
}

impl RawPost {
    pub fn first_preview(&self) -> Option<&PreviewImage> {
        self.preview.as_ref().and_then(|p| p.images.first())
    }

    pub fn hosted_video(&self) -> Option<&VideoInfo> {
        self.media
            .as_ref()
            .and_then(|m| m.reddit_video.as_ref())
            .or_else(|| self.secure_media.as_ref().and_then(|m| m.reddit_video.as_ref()))
    }

    pub fn url_str(&self) -> &str {
        self.url.as_deref().unwrap_or("")
    }
}

/// A raw post together with the source it was fetched from.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub source: String,
    pub post: RawPost,
}

#[derive(Debug, Default)]
pub struct FeedBatch {
    pub items: Vec<FeedItem>,
    pub attempted: usize,
    pub failed_sources: Vec<String>,
}

impl FeedBatch {
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.failed_sources.len() == self.attempted
    }
}

/// Parses a listing document, skipping children that do not decode.
pub fn parse_listing(text: &str) -> Result<Vec<RawPost>, FeedError> {
    let document: Value = serde_json::from_str(text)?;
    let children = document
        .get("data")
        .and_then(|d| d.get("children"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut posts = Vec::with_capacity(children.len());
    for child in children {
        let Some(data) = child.get("data").cloned() else {
            continue;
        };
        match serde_json::from_value::<RawPost>(data) {
            Ok(post) => posts.push(post),
            Err(e) => debug!("Skipping undecodable post: {}", e),
        }
    }
    Ok(posts)
}

pub fn build_feed_url(base_url: &str, source: &str, settings: &Settings, limit: u32) -> String {
    let mut url = format!(
        "{}/r/{}/{}.json?limit={}",
        base_url.trim_end_matches('/'),
        source,
        settings.sort.as_str(),
        limit
    );
    if settings.sort.uses_time_window() {
        url.push_str(&format!("&t={}", settings.time.as_str()));
    }
    url
}

pub trait FeedTransport {
    fn get_text(&self, url: &str) -> Result<String, FeedError>;
}

pub struct HttpTransport {
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(FEED_TIMEOUT)
    }
}

impl FeedTransport for HttpTransport {
    fn get_text(&self, url: &str) -> Result<String, FeedError> {
        let response = attohttpc::get(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .timeout(self.timeout)
            .send()
            .map_err(|e| FeedError::Network(e.to_string()))?;

        if !response.is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }
        response.text().map_err(|e| FeedError::Network(e.to_string()))
    }
}

pub struct FeedClient {
    transport: Box<dyn FeedTransport>,
    base_url: String,
    limit: u32,
}

impl FeedClient {
    pub fn new(transport: Box<dyn FeedTransport>) -> Self {
        Self {
            transport,
            base_url: FEED_BASE_URL.to_string(),
            limit: FEED_LIMIT,
        }
    }

    pub fn http() -> Self {
        Self::new(Box::new(HttpTransport::default()))
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn feed_url(&self, source: &str, settings: &Settings) -> String {
        build_feed_url(&self.base_url, source, settings, self.limit)
    }

    pub fn fetch_source(&self, source: &str, settings: &Settings) -> Result<Vec<RawPost>, FeedError> {
        let url = self.feed_url(source, settings);
        debug!("Fetching {}", url);
        let text = self.transport.get_text(&url)?;
        parse_listing(&text)
    }

    /// Fetches every source in order. A failing source is logged and skipped.
    pub fn fetch_raw(&self, sources: &[String], settings: &Settings) -> FeedBatch {
        let mut batch = FeedBatch {
            attempted: sources.len(),
            ..FeedBatch::default()
        };

        for source in sources {
            match self.fetch_source(source, settings) {
                Ok(posts) => {
                    info!("Fetched {} posts from r/{}", posts.len(), source);
                    batch.items.extend(posts.into_iter().map(|post| FeedItem {
                        source: source.clone(),
                        post,
                    }));
                }
                Err(e) => {
                    warn!("Failed to fetch from r/{}: {}", source, e);
                    batch.failed_sources.push(source.clone());
                }
            }
        }

        batch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Loaded,
    Failed,
    TimedOut,
}

/// Checks that a media URL actually loads before it is presented.
pub trait ImageProbe {
    fn probe(&self, url: &str) -> ProbeOutcome;
}

pub struct HttpProbe {
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(PROBE_TIMEOUT)
    }
}

impl ImageProbe for HttpProbe {
    fn probe(&self, url: &str) -> ProbeOutcome {
        // Inline uploads need no network round trip.
        if url.starts_with("data:") {
            return ProbeOutcome::Loaded;
        }

        let result = attohttpc::get(url)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .header(ACCEPT, "image/webp,image/apng,image/*,video/*,*/*;q=0.8")
            .timeout(self.timeout)
            .send();

        match result {
            Ok(response) if response.is_success() => ProbeOutcome::Loaded,
            Ok(response) => {
                warn!("Probe of {} returned {}", url, response.status());
                ProbeOutcome::Failed
            }
            Err(e) => match e.kind() {
                attohttpc::ErrorKind::Io(io)
                    if matches!(
                        io.kind(),
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                    ) =>
                {
                    warn!("Probe of {} timed out", url);
                    ProbeOutcome::TimedOut
                }
                _ => {
                    warn!("Probe of {} failed: {}", url, e);
                    ProbeOutcome::Failed
                }
            },
        }
    }
}
