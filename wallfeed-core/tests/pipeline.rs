use chrono::{DateTime, Local, NaiveTime, TimeZone};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use wallfeed_core::filter::build_candidates;
use wallfeed_core::request::{FeedItem, FeedTransport};
use wallfeed_core::schedule::resolve_source;
use wallfeed_core::settings::ScheduleRule;
use wallfeed_core::{
    FeedClient, FeedError, ImageProbe, LoadOutcome, LoadState, MemoryStore, Notice, ProbeOutcome, Session, Settings,
};

#[derive(Clone, Default)]
struct Feed {
    listings: Rc<RefCell<Vec<(String, String)>>>,
    calls: Rc<Cell<usize>>,
}

impl Feed {
    fn with(source: &str, posts: Vec<Value>) -> Self {
        let feed = Feed::default();
        feed.add(source, posts);
        feed
    }

    fn add(&self, source: &str, posts: Vec<Value>) {
        let children: Vec<Value> = posts.into_iter().map(|p| json!({ "kind": "t3", "data": p })).collect();
        let body = json!({ "data": { "children": children } }).to_string();
        self.listings.borrow_mut().push((format!("/r/{}/", source), body));
    }
}

impl FeedTransport for Feed {
    fn get_text(&self, url: &str) -> Result<String, FeedError> {
        self.calls.set(self.calls.get() + 1);
        self.listings
            .borrow()
            .iter()
            .find(|(path, _)| url.contains(path.as_str()))
            .map(|(_, body)| body.clone())
            .ok_or_else(|| FeedError::Network("unreachable".to_string()))
    }
}

struct AlwaysFails {
    attempts: Rc<Cell<u32>>,
}

impl ImageProbe for AlwaysFails {
    fn probe(&self, _url: &str) -> ProbeOutcome {
        self.attempts.set(self.attempts.get() + 1);
        ProbeOutcome::Failed
    }
}

struct AlwaysLoads;

impl ImageProbe for AlwaysLoads {
    fn probe(&self, _url: &str) -> ProbeOutcome {
        ProbeOutcome::Loaded
    }
}

fn image_post(id: &str, width: u32) -> Value {
    json!({
        "url": format!("https://i.imgur.com/{}.jpg?tracking=1", id),
        "title": format!("Lake {} [OC]", id),
        "author": "photographer",
        "permalink": format!("/r/EarthPorn/comments/{}/lake/", id),
        "post_hint": "image",
        "over_18": false,
        "is_self": false,
        "score": 200,
        "preview": { "images": [{ "source": { "url": "https://preview.redd.it/x.jpg?s=1", "width": width, "height": 1080 } }] }
    })
}

fn self_post() -> Value {
    json!({
        "url": "https://www.reddit.com/r/EarthPorn/comments/zzz/question/",
        "title": "Which camera do you use?",
        "author": "curious",
        "permalink": "/r/EarthPorn/comments/zzz/question/",
        "is_self": true,
        "score": 3
    })
}

fn noon() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).single().unwrap()
}

fn session_with(feed: &Feed, probe: Box<dyn ImageProbe>) -> Session {
    Session::new(Box::new(MemoryStore::new()), FeedClient::new(Box::new(feed.clone())), probe)
        .with_rng(StdRng::seed_from_u64(3))
}

#[test]
fn one_image_and_one_self_post_yield_one_candidate() {
    let feed = Feed::with("EarthPorn", vec![image_post("abcde12", 3840), self_post()]);
    let client = FeedClient::new(Box::new(feed.clone()));
    let settings = Settings::default();

    let batch = client.fetch_raw(&settings.sources(), &settings);
    assert_eq!(batch.items.len(), 2);

    let candidates = build_candidates(&batch.items, &settings, &HashSet::new());
    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    assert_eq!(candidate.url, "https://i.imgur.com/abcde12.jpg");
    assert_eq!(candidate.title, "Lake abcde12");
    assert_eq!(candidate.source, "EarthPorn");
    assert_eq!(candidate.permalink, "https://www.reddit.com/r/EarthPorn/comments/abcde12/lake/");
}

#[test]
fn duplicate_urls_across_sources_are_kept_once() {
    let feed = Feed::with("EarthPorn", vec![image_post("abcde12", 3840)]);
    feed.add("SkyPorn", vec![image_post("abcde12", 3840)]);
    let client = FeedClient::new(Box::new(feed));
    let settings = Settings {
        subreddit: "EarthPorn, SkyPorn".to_string(),
        ..Settings::default()
    };

    let batch = client.fetch_raw(&settings.sources(), &settings);
    let items: Vec<&FeedItem> = batch.items.iter().collect();
    assert_eq!(items.len(), 2);

    let candidates = build_candidates(&batch.items, &settings, &HashSet::new());
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].source, "EarthPorn");
}

#[test]
fn minimum_resolution_excludes_narrow_previews() {
    let feed = Feed::with("EarthPorn", vec![image_post("narrow1", 1600), image_post("wide123", 3840)]);
    let client = FeedClient::new(Box::new(feed));
    let settings = Settings {
        min_resolution: 1920,
        ..Settings::default()
    };

    let batch = client.fetch_raw(&settings.sources(), &settings);
    let urls: Vec<String> = build_candidates(&batch.items, &settings, &HashSet::new())
        .into_iter()
        .map(|w| w.url)
        .collect();
    assert_eq!(urls, vec!["https://i.imgur.com/wide123.jpg"]);
}

#[test]
fn five_load_failures_stop_without_a_sixth_attempt() {
    let posts = (0..10).map(|i| image_post(&format!("img{:04}", i), 3840)).collect();
    let feed = Feed::with("EarthPorn", posts);
    let attempts = Rc::new(Cell::new(0));
    let mut session = session_with(
        &feed,
        Box::new(AlwaysFails {
            attempts: attempts.clone(),
        }),
    );

    let outcome = session.new_wallpaper(noon()).unwrap();
    assert_eq!(outcome, LoadOutcome::Failed { attempts: 5 });
    assert_eq!(outcome.notice(), Some(Notice::LoadFailed));
    assert_eq!(attempts.get(), 5);
    assert_eq!(session.state(), LoadState::Failed);
}

#[test]
fn second_draw_within_freshness_window_reuses_cache() {
    let feed = Feed::with("EarthPorn", vec![image_post("aaaaa11", 3840), image_post("bbbbb22", 3840)]);
    let mut session = session_with(&feed, Box::new(AlwaysLoads));

    session.new_wallpaper(noon()).unwrap();
    session.new_wallpaper(noon() + chrono::Duration::minutes(29)).unwrap();
    assert_eq!(feed.calls.get(), 1);

    session.new_wallpaper(noon() + chrono::Duration::minutes(31)).unwrap();
    assert_eq!(feed.calls.get(), 2);
}

#[test]
fn back_navigation_stops_at_oldest() {
    let feed = Feed::with("EarthPorn", vec![image_post("aaaaa11", 3840), image_post("bbbbb22", 3840)]);
    let mut session = session_with(&feed, Box::new(AlwaysLoads));

    for minute in 0..8 {
        session.new_wallpaper(noon() + chrono::Duration::minutes(minute)).unwrap();
    }
    let len = session.history().len();
    assert!(len >= 1);

    let mut steps = 0;
    while session.go_back(noon()).unwrap().is_some() {
        steps += 1;
    }
    assert_eq!(steps, len - 1);
    assert_eq!(session.history().cursor(), 0);
}

#[test]
fn schedule_picks_the_queried_source() {
    let feed = Feed::with("SpacePorn", vec![image_post("stars01", 3840)]);
    let mut session = session_with(&feed, Box::new(AlwaysLoads));
    let settings = Settings {
        scheduled_enabled: true,
        schedules: vec![ScheduleRule {
            start_time: "22:00".to_string(),
            end_time: "06:00".to_string(),
            source: "SpacePorn".to_string(),
        }],
        ..Settings::default()
    };
    assert_eq!(resolve_source(&settings, NaiveTime::from_hms_opt(23, 30, 0).unwrap()), "SpacePorn");
    session.apply_settings(settings).unwrap();

    let night = Local.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).single().unwrap();
    let outcome = session.new_wallpaper(night).unwrap();
    assert_eq!(outcome.wallpaper().map(|w| w.source.as_str()), Some("SpacePorn"));

    let outcome = session.new_wallpaper(noon()).unwrap();
    assert_eq!(outcome, LoadOutcome::NoWallpapers(Notice::AllSourcesFailed));
}
