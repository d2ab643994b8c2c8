use log::debug;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::request::{FeedItem, RawPost};
use crate::resolver::{classify_url, clean_title, resolve_url};
use crate::settings::Settings;
use crate::{MediaKind, Resolution, Wallpaper};

pub const PERMALINK_BASE: &str = "https://www.reddit.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    SelfPost,
    Gallery,
    NoMedia,
    MediaDisabled(MediaKind),
    Nsfw,
    LowResolution,
    LowScore,
    ColorMismatch,
}

fn path_of(url: &str) -> String {
    url.split(['?', '#']).next().unwrap_or(url).to_lowercase()
}

fn host_of(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("")
        .to_lowercase()
}

/// Media kind of a post: video markers first, then animated markers, then a
/// direct image link, then any derivable preview.
pub fn classify(post: &RawPost) -> Option<MediaKind> {
    let url = post.url_str();
    let path = path_of(url);
    let host = host_of(url);

    let preview_video = post
        .preview
        .as_ref()
        .and_then(|p| p.reddit_video_preview.as_ref())
        .and_then(|v| v.fallback_url.as_deref())
        .map(|u| !u.is_empty())
        .unwrap_or(false);
    if post.is_video
        || post.hosted_video().is_some()
        || preview_video
        || host == "v.redd.it"
        || path.ends_with(".mp4")
        || path.ends_with(".webm")
    {
        return Some(MediaKind::Video);
    }

    let animated_variant = post
        .first_preview()
        .map(|i| i.variants.gif.is_some() || i.variants.mp4.is_some())
        .unwrap_or(false);
    if path.ends_with(".gif") || path.ends_with(".gifv") || animated_variant {
        return Some(MediaKind::Gif);
    }

    let direct = [".jpg", ".jpeg", ".png", ".webp"].iter().any(|ext| path.ends_with(ext));
    if direct || host == "i.redd.it" || host == "i.imgur.com" {
        return Some(MediaKind::Image);
    }

    let has_preview = post
        .first_preview()
        .and_then(|i| i.source.as_ref())
        .map(|s| !s.url.is_empty())
        .unwrap_or(false);
    if post.post_hint.as_deref() == Some("image") || has_preview {
        return Some(MediaKind::Image);
    }

    None
}

/// Structured preview dimensions first, then a `WxH` token in the title.
pub fn resolution(post: &RawPost) -> Option<Resolution> {
    if let Some(source) = post.first_preview().and_then(|i| i.source.as_ref()) {
        if source.width > 0 && source.height > 0 {
            return Some(Resolution {
                width: source.width,
                height: source.height,
            });
        }
    }

    static TITLE_RE: OnceLock<Regex> = OnceLock::new();
    let re = TITLE_RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[\s\[\(])(\d{3,5})\s*[x×]\s*(\d{3,5})(?:px)?(?:$|[\s\]\),])")
            .expect("static regex")
    });
    let caps = re.captures(&post.title)?;
    Some(Resolution {
        width: caps[1].parse().ok()?,
        height: caps[2].parse().ok()?,
    })
}

fn allows(settings: &Settings, kind: MediaKind) -> bool {
    match kind {
        MediaKind::Image => settings.allow_images,
        MediaKind::Gif => settings.allow_gifs,
        MediaKind::Video => settings.allow_videos,
    }
}

pub fn check(post: &RawPost, settings: &Settings) -> Result<MediaKind, Rejection> {
    if post.is_self {
        return Err(Rejection::SelfPost);
    }
    if post.is_gallery || post.gallery_data.is_some() {
        return Err(Rejection::Gallery);
    }

    let kind = classify(post).ok_or(Rejection::NoMedia)?;
    if !allows(settings, kind) {
        return Err(Rejection::MediaDisabled(kind));
    }

    if post.over_18 && !settings.allow_nsfw {
        return Err(Rejection::Nsfw);
    }

    if settings.min_resolution > 0 {
        match resolution(post) {
            Some(res) if res.width >= settings.min_resolution => {}
            _ => return Err(Rejection::LowResolution),
        }
    }

    if settings.min_score > 0 && post.score < settings.min_score {
        return Err(Rejection::LowScore);
    }

    if !settings.color_filter.matches(&post.title) {
        return Err(Rejection::ColorMismatch);
    }

    Ok(kind)
}

pub fn is_eligible(post: &RawPost, settings: &Settings) -> bool {
    check(post, settings).is_ok()
}

fn permalink(path: &str) -> String {
    if path.starts_with("http") || path.is_empty() {
        path.to_string()
    } else {
        format!("{}{}", PERMALINK_BASE, path)
    }
}

/// Turns one feed item into a candidate, or `None` when it is filtered out
/// or has no usable URL.
pub fn to_candidate(item: &FeedItem, settings: &Settings) -> Option<Wallpaper> {
    let post = &item.post;
    let kind = match check(post, settings) {
        Ok(kind) => kind,
        Err(reason) => {
            debug!("Rejected '{}' from r/{}: {:?}", post.title, item.source, reason);
            return None;
        }
    };
    let url = resolve_url(post)?;
    // The resolved URL can be a different kind than the post classified as.
    let kind = classify_url(&url).unwrap_or(kind);
    if !allows(settings, kind) {
        debug!(
            "Rejected '{}' from r/{}: {:?}",
            post.title,
            item.source,
            Rejection::MediaDisabled(kind)
        );
        return None;
    }

    Some(Wallpaper {
        kind,
        url,
        title: clean_title(&post.title),
        permalink: permalink(&post.permalink),
        author: post.author.clone(),
        source: item.source.clone(),
        resolution: resolution(post),
    })
}

/// Filters, resolves, drops blacklisted URLs and de-duplicates by URL,
/// keeping first occurrence order.
pub fn build_candidates(items: &[FeedItem], settings: &Settings, blacklist: &HashSet<String>) -> Vec<Wallpaper> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(|item| to_candidate(item, settings))
        .filter(|w| !blacklist.contains(&w.url))
        .filter(|w| seen.insert(w.url.clone()))
        .collect()
}
