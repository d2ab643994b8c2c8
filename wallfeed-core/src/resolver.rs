use regex::Regex;
use std::sync::OnceLock;

use crate::request::RawPost;
use crate::MediaKind;

fn unescape(url: &str) -> String {
    url.replace("&amp;", "&")
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

fn non_empty(url: Option<&str>) -> Option<&str> {
    url.map(str::trim).filter(|u| !u.is_empty())
}

fn direct_media_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.(jpe?g|png|webp|gif)(\?.*)?$").expect("static regex"))
}

fn imgur_thumb_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)/([a-z0-9]{5}|[a-z0-9]{7})[sbtmlh]\.(jpe?g|png|gif|webp)$")
            .expect("static regex")
    })
}

/// Picks the URL the renderer should load for a post, or `None` when the
/// post carries nothing usable.
pub fn resolve_url(post: &RawPost) -> Option<String> {
    if let Some(url) = non_empty(post.hosted_video().and_then(|v| v.fallback_url.as_deref())) {
        return Some(unescape(url));
    }

    let video_preview = post
        .preview
        .as_ref()
        .and_then(|p| p.reddit_video_preview.as_ref())
        .and_then(|v| v.fallback_url.as_deref());
    if let Some(url) = non_empty(video_preview) {
        return Some(unescape(url));
    }

    if let Some(image) = post.first_preview() {
        let animated = image
            .variants
            .gif
            .as_ref()
            .or(image.variants.mp4.as_ref())
            .and_then(|v| v.source.as_ref())
            .map(|s| s.url.as_str());
        if let Some(url) = non_empty(animated) {
            return Some(unescape(url));
        }
    }

    let url = unescape(post.url_str().trim());
    if let Some(cleaned) = clean_known_host(&url) {
        return Some(cleaned);
    }

    if direct_media_re().is_match(&url) {
        return Some(strip_query(&url).to_string());
    }

    let preview_source = post
        .first_preview()
        .and_then(|i| i.source.as_ref())
        .map(|s| s.url.as_str());
    if let Some(url) = non_empty(preview_source) {
        return Some(unescape(url));
    }

    non_empty(post.url_overridden_by_dest.as_deref()).map(unescape)
}

/// Host-specific cleanup for hosts that serve stable direct links.
fn clean_known_host(url: &str) -> Option<String> {
    let host = url
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("")
        .to_lowercase();

    match host.as_str() {
        "i.redd.it" => Some(strip_query(url).to_string()),
        "i.imgur.com" => {
            let base = strip_query(url);
            if let Some(stem) = base.strip_suffix(".gifv") {
                return Some(format!("{}.mp4", stem));
            }
            Some(imgur_thumb_re().replace(base, "/$1.$2").into_owned())
        }
        "imgur.com" | "www.imgur.com" | "m.imgur.com" => {
            let path = strip_query(url)
                .split("://")
                .nth(1)
                .and_then(|rest| rest.split_once('/'))
                .map(|(_, path)| path)
                .unwrap_or("");
            // Albums and galleries hold several images.
            if path.starts_with("a/") || path.starts_with("gallery/") {
                return None;
            }
            let id = path.rsplit('/').next().unwrap_or("").split('.').next().unwrap_or("");
            if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
                return None;
            }
            Some(format!("https://i.imgur.com/{}.jpg", id))
        }
        _ => None,
    }
}

/// Classifies a resolved URL by its extension or host.
pub fn classify_url(url: &str) -> Option<MediaKind> {
    let lower = strip_query(url).to_lowercase();
    if lower.contains("v.redd.it") || lower.ends_with(".mp4") || lower.ends_with(".webm") {
        Some(MediaKind::Video)
    } else if lower.ends_with(".gif") || lower.ends_with(".gifv") {
        Some(MediaKind::Gif)
    } else if [".jpg", ".jpeg", ".png", ".webp"].iter().any(|ext| lower.ends_with(ext)) {
        Some(MediaKind::Image)
    } else {
        None
    }
}

/// Strips resolution tokens and marker tags such as `[OC]` from a title.
pub fn clean_title(title: &str) -> String {
    static TOKENS: OnceLock<Regex> = OnceLock::new();
    static MARKERS: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();

    let tokens = TOKENS.get_or_init(|| {
        Regex::new(r"(?i)[\[\(]?\s*\d{3,5}\s*[x×]\s*\d{3,5}\s*(px)?\s*[\]\)]?").expect("static regex")
    });
    let markers = MARKERS.get_or_init(|| {
        Regex::new(r"(?i)[\[\(]\s*(oc|os|oc\s*/\s*os)\s*[\]\)]").expect("static regex")
    });
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("static regex"));

    let title = title.replace("&amp;", "&");
    let title = tokens.replace_all(&title, " ");
    let title = markers.replace_all(&title, " ");
    spaces.replace_all(&title, " ").trim().to_string()
}
